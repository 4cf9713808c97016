//! Command-line interface for the Pascal-subset compiler.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use pascc::{CompilerConfig, ErrorKind};

#[derive(ClapParser)]
#[command(name = "pascc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pascal-subset compiler targeting a stack VM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file to stack-VM IR
    Build {
        /// Input source file
        input: PathBuf,

        /// Output path (defaults to the input with an .ir extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit the structured assembly as JSON
        #[arg(long)]
        emit_json: bool,

        /// Also print the optimizer's per-block instruction streams
        #[arg(long)]
        dump_blocks: bool,

        /// Also print the symbol tables
        #[arg(long)]
        dump_symtab: bool,

        /// Suppress progress messages
        #[arg(short, long)]
        quiet: bool,

        /// Enable debug tracing
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            emit_json,
            dump_blocks,
            dump_symtab,
            quiet,
            verbose,
        } => {
            let config = CompilerConfig {
                quiet,
                verbose,
                emit_json,
                dump_blocks,
                dump_symtab,
            };
            run_build(&input, output, &config);
        }
        Commands::Completions { shell } => {
            run_completions(shell);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "pascc", &mut io::stdout());
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "pascc=debug" } else { "pascc=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.parse().expect("valid filter directive")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_build(input: &Path, output: Option<PathBuf>, config: &CompilerConfig) {
    init_tracing(config.verbose);

    if !config.quiet {
        println!("; pascc {}", env!("CARGO_PKG_VERSION"));
    }

    let output = output.unwrap_or_else(|| input.with_extension("ir"));

    let out = match pascc::compile_file(input, config) {
        Ok(out) => out,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.kind.exit_code());
        }
    };

    let rendered = if config.emit_json {
        match out.asm.to_json() {
            Ok(json) => json,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(ErrorKind::Abort.exit_code());
            }
        }
    } else {
        out.asm.render()
    };

    if let Err(e) = fs::write(&output, rendered) {
        eprintln!("Error: cannot write {}: {}", output.display(), e);
        process::exit(ErrorKind::BadArgument.exit_code());
    }

    if config.dump_blocks {
        dump_blocks(&out);
    }

    if config.dump_symtab {
        print!("{}", out.symtab.dump());
    }

    if !config.quiet {
        println!("compiled {} -> {}", input.display(), output.display());
    }
}

/// Print each function's blocks in their post-optimization form.
fn dump_blocks(out: &pascc::CompileOutput) {
    for fun in &out.flow.funs {
        println!("; fun {}", out.symtab.sym(fun.sym).name);
        for block in &fun.blocks {
            println!(";   block B{}", block.id);
            for inst in &block.live_insts {
                match pascc::assembler::render_inst(&out.symtab, inst) {
                    Ok(line) => println!(";     {}", line),
                    Err(e) => println!(";     <unrenderable: {}>", e),
                }
            }
        }
    }
}
