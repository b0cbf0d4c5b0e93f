//! Outcome counters and the per-test/summary reporter.

/// ANSI palette for the per-test lines.
pub mod color {
    pub const RESET: &str = "\x1b[m";
    pub const COUNTER: &str = "\x1b[2;49;92m";
    pub const NAME: &str = "\x1b[0;49;90m";
    pub const FAILED: &str = "\x1b[0;49;91m";
    pub const PASSED: &str = "\x1b[2;49;92m";
    pub const SKIPPED: &str = "\x1b[0;49;34m";
}

pub fn painted(clr: &str, label: &str) -> String {
    format!("{clr}{label}{}", color::RESET)
}

/// Final classification of one test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Skipped,
    Saved,
    Failed,
    /// The actual output was too short for the requested check mode; carries
    /// the check's name.
    ClipFailed(String),
}

/// Running tallies plus the failure lines echoed again in the summary.
#[derive(Debug, Default)]
pub struct Counters {
    error: u32,
    skip: u32,
    save: u32,
    echo: Vec<String>,
}

impl Counters {
    /// Print the line for one finished test. The prepare log is shown for
    /// failures, or for every test when `debug` is set.
    pub fn report(
        &mut self,
        outcome: &Outcome,
        ident: &str,
        message: &str,
        prepare_log: &str,
        debug: bool,
    ) {
        let failed = matches!(outcome, Outcome::Failed | Outcome::ClipFailed(_));
        if (failed || debug) && !prepare_log.is_empty() {
            print!("{prepare_log}");
        }

        match outcome {
            Outcome::Skipped => {
                println!("{ident} {}", painted(color::SKIPPED, "SKIPPED"));
                self.skip += 1;
            }
            Outcome::Saved => {
                println!("{ident} {}", painted(color::SKIPPED, "saved"));
                self.skip += 1;
                self.save += 1;
            }
            Outcome::ClipFailed(check_name) => {
                let msg = format!(
                    "{ident} {}",
                    painted(color::FAILED, &format!("FAILED (unknown check '{check_name}')"))
                );
                println!("{msg}");
                self.echo.push(msg);
                self.error += 1;
            }
            Outcome::Failed => {
                if !message.is_empty() {
                    println!("{message}");
                }
                let msg = format!("{ident} {}", painted(color::FAILED, "FAILED"));
                println!("{msg}");
                self.echo.push(msg);
                self.error += 1;
            }
            Outcome::Ok => {
                println!("{ident} {}", painted(color::PASSED, "PASSED"));
            }
        }
    }

    /// Print the closing lines; true when no test failed.
    pub fn summary(&self, total: usize) -> bool {
        println!("Failed {}/{}", self.error, total);
        if self.skip != 0 {
            let test_s = if self.skip == 1 { "test" } else { "tests" };
            if self.save != 0 {
                println!(
                    "Skipped {} {} (including {} due to saving)",
                    self.skip, test_s, self.save
                );
            } else {
                println!("Skipped {} {}", self.skip, test_s);
            }
        }

        if !self.echo.is_empty() {
            println!();
        }
        for line in &self.echo {
            println!("{line}");
        }

        self.error == 0
    }
}
