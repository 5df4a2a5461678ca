//! Terminal implementation of the operator console.

use std::io::{self, BufRead, Write};
use std::sync::Mutex;

use encryptall_engine::Console;

#[derive(Debug, Default)]
struct Progress {
    active: bool,
    total: u64,
    done: u64,
}

/// Console on stdin/stdout.
///
/// The progress indicator is a single line on stderr redrawn with a
/// carriage return. Other output breaks the line first.
pub struct TerminalConsole {
    assume_yes: bool,
    progress: Mutex<Progress>,
}

impl TerminalConsole {
    /// `assume_yes` answers every question with yes without reading stdin.
    pub fn new(assume_yes: bool) -> Self {
        Self {
            assume_yes,
            progress: Mutex::new(Progress::default()),
        }
    }

    fn with_progress(&self, f: impl FnOnce(&mut Progress)) {
        let mut progress = match self.progress.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut progress);
    }

    fn break_progress_line(&self) {
        self.with_progress(|p| {
            if p.active {
                eprintln!();
            }
        });
    }

    fn redraw(progress: &Progress) {
        let mut out = io::stderr().lock();
        let _ = write!(out, "\r{}/{} files", progress.done, progress.total);
        let _ = out.flush();
    }
}

/// Render `rows` under `headers` with padded columns.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let render = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let separator = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("-+-");

    let mut out = vec![render(headers.to_vec()), separator];
    out.extend(
        rows.iter()
            .map(|row| render(row.iter().map(String::as_str).collect())),
    );
    out.join("\n")
}

impl Console for TerminalConsole {
    fn line(&self, text: &str) {
        self.break_progress_line();
        println!("{}", text);
    }

    fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        self.break_progress_line();
        println!("{}", format_table(headers, rows));
    }

    fn confirm(&self, question: &str) -> bool {
        self.break_progress_line();
        if self.assume_yes {
            println!("{} y", question);
            return true;
        }

        print!("{} ", question);
        let _ = io::stdout().flush();

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    fn progress_start(&self, total: u64) {
        self.with_progress(|p| {
            *p = Progress {
                active: true,
                total,
                done: 0,
            };
            Self::redraw(p);
        });
    }

    fn progress_set_total(&self, total: u64) {
        self.with_progress(|p| {
            p.total = total.max(p.done);
            if p.active {
                Self::redraw(p);
            }
        });
    }

    fn progress_advance(&self, step: u64) {
        self.with_progress(|p| {
            p.done += step;
            p.total = p.total.max(p.done);
            if p.active {
                Self::redraw(p);
            }
        });
    }

    fn progress_finish(&self) {
        self.with_progress(|p| {
            if p.active {
                eprintln!();
                p.active = false;
            }
        });
    }
}
