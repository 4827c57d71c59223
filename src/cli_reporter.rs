use super::reporter::{Report, Reporter};

/// The reporter the binary wires up: counts diagnostics and prints them to stderr.
pub struct CliReporter {
    pub errors: usize,
    pub warnings: usize,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            errors: 0,
            warnings: 0,
        }
    }

    pub fn had_error(&self) -> bool {
        self.errors > 0
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for CliReporter {
    fn warning(&mut self, report: Report) {
        self.warnings += 1;
        eprintln!("warning: {report}");
    }

    fn error(&mut self, report: Report) {
        self.errors += 1;
        eprintln!("error: {report}");
    }
}
