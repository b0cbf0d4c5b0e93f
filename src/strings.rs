//! Small string helpers shared across the runner.

use rand::Rng;

/// Quote a string C-style: wrapped in `"`, control characters as escape
/// sequences, anything else unprintable as `\xHH`.
pub fn repr(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 2);
    result.push('"');
    for b in s.bytes() {
        match b {
            b'"' | b'\\' => {
                result.push('\\');
                result.push(b as char);
            }
            0x07 => result.push_str("\\a"),
            0x08 => result.push_str("\\b"),
            0x0c => result.push_str("\\f"),
            b'\n' => result.push_str("\\n"),
            b'\r' => result.push_str("\\r"),
            b'\t' => result.push_str("\\t"),
            0x0b => result.push_str("\\v"),
            0x20..=0x7e => result.push(b as char),
            _ => result.push_str(&format!("\\x{b:02X}")),
        }
    }
    result.push('"');
    result
}

/// Make a trailing newline visible: `"a\n"` becomes `a\n` spelled out.
///
/// The diff routine works line-wise, so without this a missing final newline
/// would be invisible in its output.
pub fn last_enter(text: &str) -> String {
    match text.strip_suffix('\n') {
        Some(stripped) => format!("{stripped}\\n"),
        None => text.to_string(),
    }
}

/// A run of random ASCII letters, used to give every test its own
/// subdirectory under the shared temp root.
pub fn random_letters(size: usize) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::rng();
    (0..size)
        .map(|_| LETTERS[rng.random_range(0..LETTERS.len())] as char)
        .collect()
}

/// Number of decimal digits needed to print `total`.
pub fn counter_width(total: usize) -> usize {
    let mut digits = 1;
    let mut total = total;
    while total > 9 {
        digits += 1;
        total /= 10;
    }
    digits
}
