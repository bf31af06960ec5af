//! Operator interaction: questions answered at the console.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

/// The human in the loop.
///
/// Steps and gated commands talk to the operator only through this trait so
/// tests can script the answers.
pub trait Operator: Send + Sync {
    /// Show `prompt` and return one line of input without the line terminator.
    fn ask(&self, prompt: &str) -> Result<String>;

    /// Show informational text.
    fn show(&self, message: &str);
}

/// Operator at the terminal: prompts on stdout, answers from stdin.
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl Operator for ConsoleOperator {
    fn ask(&self, prompt: &str) -> Result<String> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{prompt}").context("write prompt")?;
        stdout.flush().context("flush stdout")?;
        drop(stdout);

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("read operator answer")?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn show(&self, message: &str) {
        println!("{message}");
    }
}

/// Normalize an answer for keyword comparison.
pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

/// True for `y` or `yes`, in any case.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(normalize_answer(answer).as_str(), "y" | "yes")
}
