//! Compiler configuration.
//!
//! Carries the values the command line resolves for the core: output
//! shape and verbosity. The library never reads process arguments itself.

/// Options threaded through a compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Suppress progress messages and recoverable-diagnostic echoing.
    pub quiet: bool,
    /// Enable debug tracing of the pipeline stages.
    pub verbose: bool,
    /// Emit the structured assembly as JSON instead of text.
    pub emit_json: bool,
    /// Also dump the optimizer's per-block instruction streams.
    pub dump_blocks: bool,
    /// Also dump the symbol tables after compilation.
    pub dump_symtab: bool,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}
