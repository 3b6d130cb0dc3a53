use std::fmt;

use tracing::error;

/// Which pass produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Syntax,
    Lowering,
    Execution,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Syntax => write!(f, "syntax error"),
            Stage::Lowering => write!(f, "compile error"),
            Stage::Execution => write!(f, "runtime error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub stage: Stage,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: Stage, message: impl fmt::Display) -> Self {
        Diagnostic {
            stage,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.message)
    }
}

pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// Forwards diagnostics to `tracing` and counts them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink {
    pub reported: usize,
}

impl DiagnosticSink for LogSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.reported += 1;
        error!(stage = %diagnostic.stage, "{}", diagnostic.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_stage_and_message() {
        let diagnostic = Diagnostic::new(Stage::Lowering, "unknown function f");
        assert_eq!(diagnostic.to_string(), "compile error: unknown function f");
    }

    #[test]
    fn sinks_collect() {
        let mut list: Vec<Diagnostic> = Vec::new();
        list.report(Diagnostic::new(Stage::Syntax, "oops"));
        assert_eq!(list, vec![Diagnostic::new(Stage::Syntax, "oops")]);

        let mut log = LogSink::default();
        log.report(Diagnostic::new(Stage::Execution, "boom"));
        assert_eq!(log.reported, 1);
    }
}
