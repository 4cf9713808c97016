//! Compilation error types and the recoverable-diagnostic sink.
//!
//! Two severities exist. A fatal error is a `CompileError` propagated with
//! `?` all the way out of the pipeline; the process exits with the kind's
//! code. A recoverable error is reported to [`Diagnostics`] and compilation
//! continues, but every later phase boundary refuses to proceed while the
//! counter is non-zero.

/// Classification of a compilation failure. Each variant owns a distinct
/// process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unexpected token.
    BadToken,
    /// Same name declared twice in one scope (recoverable).
    DuplicateSymbol,
    /// Identifier used but never declared.
    MissingSymbol,
    /// Symbol exists but its category cannot be used here.
    BadCategory,
    /// Hard type mismatch (array vs scalar, non-function called, ...).
    WrongType,
    /// Call-site argument count differs from the parameter count.
    ArgumentCount,
    /// Reference argument is not a plain variable or indexed array.
    BadReference,
    /// Reference argument names an object of the wrong category.
    NotReferable,
    /// A required external command is unavailable.
    MissingCommand,
    /// Internal invariant violation.
    Panic,
    /// Aborted by an unrecoverable environment condition.
    Abort,
    /// Bad command-line argument or unreadable input.
    BadArgument,
}

impl ErrorKind {
    /// Process exit code for this failure class.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::BadToken => 100,
            ErrorKind::DuplicateSymbol => 110,
            ErrorKind::MissingSymbol => 111,
            ErrorKind::BadCategory => 112,
            ErrorKind::WrongType => 113,
            ErrorKind::ArgumentCount => 114,
            ErrorKind::BadReference => 115,
            ErrorKind::NotReferable => 106,
            ErrorKind::MissingCommand => 995,
            ErrorKind::Panic => 996,
            ErrorKind::Abort => 997,
            ErrorKind::BadArgument => 998,
        }
    }
}

/// A single diagnostic, fatal or recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    /// Source line the diagnostic refers to, when one exists.
    pub line: Option<usize>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, line: usize, message: impl Into<String>) -> Self {
        CompileError {
            kind,
            message: message.into(),
            line: Some(line),
        }
    }

    /// An error with no meaningful source position.
    pub fn bare(kind: ErrorKind, message: impl Into<String>) -> Self {
        CompileError {
            kind,
            message: message.into(),
            line: None,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// Construct a fatal [`CompileError`] for an internal invariant violation,
/// carrying the compiler's own file and line.
#[macro_export]
macro_rules! internal {
    ($($arg:tt)*) => {
        $crate::error::CompileError::bare(
            $crate::error::ErrorKind::Panic,
            format!("{}:{}: {}", file!(), line!(), format!($($arg)*)),
        )
    };
}

/// Sink for recoverable diagnostics.
///
/// Recoverable errors are printed to stderr as they arrive and counted; the
/// pipeline driver calls [`Diagnostics::check`] at each phase boundary and
/// turns a non-zero count into a fatal error carrying the last kind seen.
#[derive(Debug, Default)]
pub struct Diagnostics {
    reported: Vec<CompileError>,
    quiet: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Suppress stderr echoing of recoverable diagnostics.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Record a recoverable error; compilation continues.
    pub fn report(&mut self, err: CompileError) {
        if !self.quiet {
            eprintln!("ERROR: {}", err);
        }
        self.reported.push(err);
    }

    pub fn error_count(&self) -> usize {
        self.reported.len()
    }

    pub fn reported(&self) -> &[CompileError] {
        &self.reported
    }

    /// Phase-boundary check: refuse to proceed when any recoverable error
    /// has been reported.
    pub fn check(&self, phase_name: &str) -> Result<(), CompileError> {
        match self.reported.last() {
            None => Ok(()),
            Some(last) => Err(CompileError {
                kind: last.kind,
                message: format!("{} fail and exit: {}", phase_name, last),
                line: last.line,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::BadToken,
            ErrorKind::DuplicateSymbol,
            ErrorKind::MissingSymbol,
            ErrorKind::BadCategory,
            ErrorKind::WrongType,
            ErrorKind::ArgumentCount,
            ErrorKind::BadReference,
            ErrorKind::NotReferable,
            ErrorKind::MissingCommand,
            ErrorKind::Panic,
            ErrorKind::Abort,
            ErrorKind::BadArgument,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_diagnostics_counter_blocks_phase() {
        let mut diag = Diagnostics::new().quiet(true);
        assert!(diag.check("parse").is_ok());

        diag.report(CompileError::new(
            ErrorKind::DuplicateSymbol,
            3,
            "variable x already declared",
        ));
        assert_eq!(diag.error_count(), 1);

        let err = diag.check("parse").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol);
        assert!(err.message.contains("parse fail"));
    }

    #[test]
    fn test_display_includes_line() {
        let err = CompileError::new(ErrorKind::MissingSymbol, 7, "symbol y not found");
        assert_eq!(err.to_string(), "line 7: symbol y not found");
    }
}
