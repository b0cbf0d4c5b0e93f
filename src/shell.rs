//! Shell-style word splitting and quoting.
//!
//! Test documents may give command lines as single strings; these are split
//! the way a POSIX shell tokenises them, minus expansions. The reverse
//! direction (`quote`/`join`) is used when printing reproduction commands.

/// Split a command line into words.
///
/// Whitespace separates words; single and double quotes group verbatim runs
/// (no escapes are recognised inside quotes); a backslash outside quotes
/// escapes the next character.
pub fn split(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            chars.next();
            match c {
                '\'' | '"' => {
                    for inner in chars.by_ref() {
                        if inner == c {
                            break;
                        }
                        word.push(inner);
                    }
                }
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        word.push(escaped);
                    }
                }
                _ => word.push(c),
            }
        }
        result.push(word);
    }

    result
}

fn contains_unsafe(arg: &str) -> bool {
    arg.chars().any(|c| {
        !(c.is_alphanumeric()
            || matches!(c, '_' | '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-'))
    })
}

/// Quote a word for display in a copy-pasteable command line.
pub fn quote(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if !contains_unsafe(arg) {
        return arg.to_string();
    }

    let mut result = String::with_capacity(arg.len() + 2);
    result.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            result.push_str("'\"'\"'");
        } else {
            result.push(c);
        }
    }
    result.push('\'');
    result
}

/// Quote each word and join with spaces.
pub fn join<S: AsRef<str>>(args: impl IntoIterator<Item = S>) -> String {
    args.into_iter()
        .map(|arg| quote(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
