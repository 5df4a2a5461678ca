//! Operator console abstraction.

/// Where the engine reports progress and asks the operator questions.
///
/// The progress total may grow while a run discovers more files.
pub trait Console: Send + Sync {
    /// Print one line of text.
    fn line(&self, text: &str);

    /// Print a table.
    fn table(&self, headers: &[&str], rows: &[Vec<String>]);

    /// Ask a yes/no question.
    fn confirm(&self, question: &str) -> bool;

    /// Begin a progress indicator with an initial (possibly zero) total.
    fn progress_start(&self, total: u64);

    /// Raise the total of the running progress indicator.
    fn progress_set_total(&self, total: u64);

    /// Advance the progress indicator.
    fn progress_advance(&self, step: u64);

    /// Finish the progress indicator.
    fn progress_finish(&self);
}

/// Console that prints nothing and declines every question.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsole;

impl Console for NullConsole {
    fn line(&self, _text: &str) {}

    fn table(&self, _headers: &[&str], _rows: &[Vec<String>]) {}

    fn confirm(&self, _question: &str) -> bool {
        false
    }

    fn progress_start(&self, _total: u64) {}

    fn progress_set_total(&self, _total: u64) {}

    fn progress_advance(&self, _step: u64) {}

    fn progress_finish(&self) {}
}
