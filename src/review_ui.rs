//! Terminal interaction for the review and command loop.
//!
//! [`ReviewUI`] is the line-oriented [`Prompter`] used by the binary. The
//! `render_*` functions format catalog entries, generation results and
//! execution outcomes for display.

use crate::executor::ExecutionOutcome;
use crate::function_catalog::FunctionRecord;
use crate::llm_generator::GeneratedFunction;
use crate::providers::{InputClosed, Prompter};
use anyhow::Result;
use std::io::{self, BufRead, StdinLock, Stdout, Write};
use tracing::debug;

/// Line-oriented prompter over any reader/writer pair.
///
/// # Example
///
/// ```
/// use metaprogrammer::providers::Prompter;
/// use metaprogrammer::review_ui::ReviewUI;
/// use std::io::Cursor;
///
/// let mut ui = ReviewUI::new(Cursor::new(b"add two to x\n".to_vec()), Vec::new());
/// let answer = ui.ask("What should the function do?").unwrap();
/// assert_eq!(answer, "add two to x");
/// ```
pub struct ReviewUI<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl ReviewUI<StdinLock<'static>, Stdout> {
    /// Prompter over the process stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ReviewUI<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Consumes the UI and returns the writer (for inspecting test output).
    pub fn into_output(self) -> W {
        self.output
    }

    fn read_answer(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{}\n> ", prompt)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            writeln!(self.output)?;
            return Err(InputClosed.into());
        }
        let answer = line.trim().to_string();
        debug!("Human answered '{}' to '{}'", answer, prompt);
        Ok(answer)
    }
}

impl<R: BufRead, W: Write> Prompter for ReviewUI<R, W> {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.read_answer(&format!("{} (yes/no)", question))?;
        Ok(matches!(answer.to_lowercase().as_str(), "yes" | "y"))
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        self.read_answer(question)
    }

    fn say(&mut self, message: &str) -> Result<()> {
        writeln!(self.output, "{}", message)?;
        Ok(())
    }
}

pub fn render_generation(function: &GeneratedFunction) -> String {
    format!(
        "Generation result:\nFunction name: {}\nCode:\n---\n{}\n---\nLanguage: {}",
        function.name,
        function.code.trim_end(),
        function.language
    )
}

pub fn render_record(record: &FunctionRecord) -> String {
    format!(
        "Function name: {}\nLanguage: {}\nCode:\n{}",
        record.name, record.language, record.code
    )
}

pub fn render_names(names: &[String]) -> String {
    if names.is_empty() {
        return "No functions found in the catalog.".to_string();
    }
    format!("Function names in the catalog:\n{}", names.join("\n"))
}

/// Frames captured output between delimiter lines.
pub fn render_outcome(outcome: &ExecutionOutcome) -> String {
    let mut framed = String::from("---\nOutput:\n");
    framed.push_str(&outcome.output);
    if !outcome.output.is_empty() && !outcome.output.ends_with('\n') {
        framed.push('\n');
    }
    if let Some(error) = &outcome.error {
        framed.push_str(&format!("Execution yielded error: {}\nPlease try again\n", error));
    }
    framed.push_str("---\nExecution finished");
    framed
}
