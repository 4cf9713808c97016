//! Pascal-subset compiler for a stack virtual machine.
//!
//! The pipeline is strictly sequential: characters become tokens, tokens a
//! syntax tree, the tree a resolved symbol model plus a linear IR, and the
//! IR a printable assembly listing. Two analysis passes (per-block DAG
//! value numbering and live-variable analysis) run over the flow graph
//! between generation and assembly.
//!
//! ```rust,ignore
//! use pascc::{compile_source, CompilerConfig};
//!
//! let out = compile_source("var x: integer;\nbegin x := 1 end.",
//!                          &CompilerConfig::new())?;
//! print!("{}", out.asm);
//! ```

pub mod analyzer;
pub mod assembler;
pub mod ast;
pub mod config;
pub mod error;
pub mod generate;
pub mod ir;
pub mod optim;
pub mod parser;
pub mod scanner;
pub mod symtab;
pub mod token;

pub use assembler::IrAsm;
pub use config::CompilerConfig;
pub use error::{CompileError, Diagnostics, ErrorKind};
pub use ir::IrList;
pub use optim::FlowGraph;
pub use parser::Parser;
pub use scanner::Scanner;
pub use symtab::SymTab;

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;

use tracing::debug;

/// Name of the synthetic main entry function.
pub const MAIN_FUNC: &str = "_start";

/// Compilation phase tag, advanced at each phase boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Init,
    Lexical,
    Syntax,
    Semantic,
    Ir,
    Optimize,
    Assemble,
    Success,
}

/// Mutable compiler state threaded through the pipeline: the symbol
/// model, the recoverable-diagnostic sink and the phase tag.
#[derive(Debug)]
pub struct Context {
    pub symtab: SymTab,
    pub diag: Diagnostics,
    pub phase: Phase,
}

impl Context {
    pub fn new(config: &CompilerConfig) -> Self {
        Context {
            symtab: SymTab::new(),
            diag: Diagnostics::new().quiet(config.quiet),
            phase: Phase::Init,
        }
    }
}

/// Everything a compilation produces.
#[derive(Debug)]
pub struct CompileOutput {
    pub symtab: SymTab,
    pub ir: IrList,
    pub flow: FlowGraph,
    pub asm: IrAsm,
}

/// Compile from any buffered character source.
pub fn compile_reader<R: BufRead>(
    input: R,
    config: &CompilerConfig,
) -> Result<CompileOutput, CompileError> {
    let mut ctx = Context::new(config);

    ctx.phase = Phase::Lexical;
    let scanner = Scanner::new(input);
    let parser = Parser::new(scanner, &mut ctx.diag)?;
    // the parser owns the scanner and with it the source stream; both are
    // gone when this returns, on success and on error alike
    let mut pgm = parser.parse()?;
    ctx.phase = Phase::Syntax;
    ctx.diag.check("parse")?;

    ctx.phase = Phase::Semantic;
    analyzer::analyze(&mut ctx.symtab, &mut ctx.diag, &mut pgm)?;
    ctx.diag.check("analysis")?;
    debug!("symbol tables:\n{}", ctx.symtab.dump());

    ctx.phase = Phase::Ir;
    let mut ir = generate::generate(&mut ctx.symtab, &pgm)?;
    ctx.diag.check("generate")?;

    ctx.phase = Phase::Optimize;
    let flow = optim::optimize(&ctx.symtab, &mut ir)?;
    ctx.diag.check("optimize")?;

    ctx.phase = Phase::Assemble;
    let asm = assembler::assemble(&ctx.symtab, &ir)?;
    ctx.diag.check("assemble")?;

    ctx.phase = Phase::Success;
    Ok(CompileOutput {
        symtab: ctx.symtab,
        ir,
        flow,
        asm,
    })
}

/// Compile a source string.
pub fn compile_source(
    source: &str,
    config: &CompilerConfig,
) -> Result<CompileOutput, CompileError> {
    compile_reader(Cursor::new(source.to_string()), config)
}

/// Compile a source file.
pub fn compile_file(path: &Path, config: &CompilerConfig) -> Result<CompileOutput, CompileError> {
    let file = File::open(path).map_err(|e| {
        CompileError::bare(
            ErrorKind::BadArgument,
            format!("cannot read file {}: {}", path.display(), e),
        )
    })?;
    compile_reader(BufReader::new(file), config)
}

/// Compile a source string straight to the IR text listing.
pub fn compile_to_text(source: &str) -> Result<String, CompileError> {
    let config = CompilerConfig::new().with_quiet(true);
    Ok(compile_source(source, &config)?.asm.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_is_deterministic() {
        let src = "const one = 1;\nvar i, s: integer;\n\
                   begin s := one; for i := 1 to 3 do s := s + i; write(s) end.";
        let first = compile_to_text(src).unwrap();
        let second = compile_to_text(src).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_recovered_parse_error_stops_at_phase_boundary() {
        let config = CompilerConfig::new().with_quiet(true);
        let err = compile_source("var x: integer;\nbegin x = 1 end.", &config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadToken);
        assert!(err.message.contains("parse fail"));
    }

    #[test]
    fn test_duplicate_declaration_stops_after_analysis() {
        let config = CompilerConfig::new().with_quiet(true);
        let err = compile_source(
            "var x: integer;\nx: integer;\nbegin x := 1 end.",
            &config,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol);
        assert!(err.message.contains("analysis fail"));
    }

    #[test]
    fn test_missing_file_is_bad_argument() {
        let config = CompilerConfig::new().with_quiet(true);
        let err = compile_file(Path::new("no/such/file.pas"), &config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadArgument);
    }

    #[test]
    fn test_scope_stack_empty_after_success() {
        let out = compile_to_text(
            "procedure p(v: integer);\nbegin write(v) end;\nbegin p(3) end.",
        );
        assert!(out.is_ok());
    }
}
