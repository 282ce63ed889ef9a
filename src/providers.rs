//! Shared provider traits for dependency injection.
//!
//! The lifecycle and the command router never read from stdin directly.
//! Every human decision goes through a [`Prompter`], so the same logic can be
//! driven by a terminal in production and by scripted input in tests.

use anyhow::Result;

/// Raised when the human input stream ends (EOF on stdin).
///
/// The session loop treats this as an `exit` command.
#[derive(Debug, thiserror::Error)]
#[error("input stream closed")]
pub struct InputClosed;

/// Returns true when `err` was caused by the input stream closing.
pub fn is_input_closed(err: &anyhow::Error) -> bool {
    err.downcast_ref::<InputClosed>().is_some()
}

/// Trait for asking the human for decisions and showing them results.
///
/// # Example
///
/// ```
/// use metaprogrammer::providers::Prompter;
/// use metaprogrammer::review_ui::ReviewUI;
/// use std::io::Cursor;
///
/// let mut ui = ReviewUI::new(Cursor::new(b"yes\n".to_vec()), Vec::new());
/// assert!(ui.confirm("Register it?").unwrap());
/// ```
pub trait Prompter {
    /// Asks a yes/no question. Anything other than an affirmative answer is `false`.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Asks a free-text question and returns the trimmed answer.
    ///
    /// # Errors
    ///
    /// Returns [`InputClosed`] if the input stream has ended.
    fn ask(&mut self, question: &str) -> Result<String>;

    /// Shows a message to the human.
    fn say(&mut self, message: &str) -> Result<()>;
}
