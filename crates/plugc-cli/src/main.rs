//! plugc CLI - compile script plugins through an out-of-process compiler.

mod compile;
mod plugin;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "plugc")]
#[command(about = "Compile script plugins with a supervised compiler worker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile plugin files into one module
    Compile {
        /// Plugin source files (.cs)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory the compiled module is written to
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Server root holding logs/ and extensions/
        #[arg(long, env = "PLUGC_ROOT", default_value = ".")]
        root: PathBuf,

        /// Compiler executable
        #[arg(long, env = "PLUGC_COMPILER_PATH")]
        compiler: Option<PathBuf>,

        /// Extra directory to search for references (repeatable)
        #[arg(short = 'r', long = "reference-dir")]
        reference_dirs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compile {
            files,
            out,
            root,
            compiler,
            reference_dirs,
        } => {
            compile::execute(compile::CompileArgs {
                files,
                out_dir: out,
                root,
                compiler,
                reference_dirs,
            })
            .await?;
        }
    }

    Ok(())
}
