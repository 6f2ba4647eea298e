//! Reference compiler worker.
//!
//! Speaks the plugc wire protocol on stdin/stdout:
//! 1. Sends Ready once it is listening
//! 2. Answers every Compile with an Assembly (or an Error for empty requests)
//! 3. Exits on Exit, or when stdin closes
//!
//! Usage: `plugc-worker /service [/logPath:<dir>]` or `plugc-worker --version`.

mod compile;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, bail};
use clap::Parser;
use plugc_core::ipc::{CompilerMessage, MessageBody, read_message, write_message};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Exit code used when a source asks the worker to crash.
const CRASH_EXIT_CODE: i32 = 3;

/// Marker that makes the worker exit abruptly mid-compilation.
const CRASH_MARKER: &str = "#crash";

/// Command line as given by the launcher.
///
/// Launch directives use the `/name[:value]` form, so clap only collects
/// them and [`Args::from_cli`] interprets them.
#[derive(Parser, Debug)]
#[command(name = "plugc-worker", disable_version_flag = true)]
struct Cli {
    /// Print the worker version and exit
    #[arg(long)]
    version: bool,

    /// Launch directives: `/service`, `/logPath:<dir>`
    directives: Vec<String>,
}

#[derive(Debug, Default)]
struct Args {
    service: bool,
    version: bool,
    log_dir: Option<PathBuf>,
}

impl Args {
    fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let mut parsed = Args {
            version: cli.version,
            ..Args::default()
        };
        for directive in cli.directives {
            if directive == "/service" {
                parsed.service = true;
            } else if let Some(dir) = directive.strip_prefix("/logPath:") {
                parsed.log_dir = Some(PathBuf::from(dir));
            } else {
                bail!("Unknown argument: {}", directive);
            }
        }
        Ok(parsed)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::from_cli(Cli::parse())?;

    if args.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if !args.service {
        bail!("usage: plugc-worker /service [/logPath:<dir>]");
    }

    init_logging(args.log_dir.as_deref())?;
    info!(
        "Compiler worker {} started (pid {})",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    );

    serve(tokio::io::stdin(), tokio::io::stdout()).await
}

/// Log to `<dir>/compiler_<pid>.txt`, or stderr when no directory is given.
/// Stdout is reserved for protocol frames.
fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::DEBUG.into());

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let path = dir.join(format!("compiler_{}.txt", std::process::id()));
            let file = File::create(&path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }
    Ok(())
}

async fn serve<R, W>(mut reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_message(&mut writer, &CompilerMessage::ready()).await?;

    loop {
        let message = match read_message(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("Host closed the stream, exiting");
                break;
            }
            Err(e) => {
                error!("Failed to read message: {}", e);
                return Err(e.into());
            }
        };

        let id = message.id;
        let kind = message.kind();
        match message.body {
            MessageBody::Compile(request) => {
                debug!(
                    "Compile #{} -> {} ({} sources)",
                    id,
                    request.output_file,
                    request.source_files.len()
                );

                if request
                    .source_files
                    .iter()
                    .any(|f| f.text.as_deref().is_some_and(|t| t.contains(CRASH_MARKER)))
                {
                    error!("Crash requested by compilation #{}", id);
                    std::process::exit(CRASH_EXIT_CODE);
                }

                let body = if request.source_files.is_empty() {
                    MessageBody::Error("No source files to compile".to_string())
                } else {
                    MessageBody::Assembly(compile::compile(&request).await)
                };
                write_message(&mut writer, &CompilerMessage { id, body }).await?;
            }
            MessageBody::Ready => debug!("Host acknowledged ready"),
            MessageBody::Exit => {
                info!("Exit requested");
                break;
            }
            MessageBody::Assembly(_) | MessageBody::Error(_) => {
                warn!("Ignoring unexpected {:?} message #{}", kind, id);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugc_core::ipc::{CompileRequest, CompilerFile};

    #[test]
    fn test_parse_args() {
        let parse = |argv: &[&str]| -> anyhow::Result<Args> {
            let cli = Cli::try_parse_from(std::iter::once("plugc-worker").chain(argv.iter().copied()))?;
            Args::from_cli(cli)
        };

        let args = parse(&["/service", "/logPath:/tmp/logs"]).unwrap();
        assert!(args.service);
        assert!(!args.version);
        assert_eq!(args.log_dir, Some(PathBuf::from("/tmp/logs")));

        assert!(parse(&["--version"]).unwrap().version);
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["/bogus"]).is_err());
    }

    #[tokio::test]
    async fn test_serve_ready_compile_exit() {
        let (host, worker) = tokio::io::duplex(64 * 1024);
        let (worker_read, worker_write) = tokio::io::split(worker);
        let server = tokio::spawn(serve(worker_read, worker_write));

        let (mut host_read, mut host_write) = tokio::io::split(host);
        let ready = read_message(&mut host_read).await.unwrap().unwrap();
        assert_eq!(ready, CompilerMessage::ready());

        write_message(&mut host_write, &CompilerMessage::ready()).await.unwrap();
        let request = CompileRequest {
            output_file: "Foo".to_string(),
            source_files: vec![CompilerFile::inline("Foo.cs", "class Foo { }")],
            reference_files: vec![],
        };
        write_message(&mut host_write, &CompilerMessage::compile(7, request)).await.unwrap();

        let reply = read_message(&mut host_read).await.unwrap().unwrap();
        assert_eq!(reply.id, 7);
        match reply.body {
            MessageBody::Assembly(output) => assert!(output.assembly.is_some()),
            other => panic!("unexpected reply: {:?}", other),
        }

        let empty = CompileRequest {
            output_file: "Empty".to_string(),
            source_files: vec![],
            reference_files: vec![],
        };
        write_message(&mut host_write, &CompilerMessage::compile(8, empty)).await.unwrap();
        let reply = read_message(&mut host_read).await.unwrap().unwrap();
        assert!(matches!(reply.body, MessageBody::Error(_)));

        write_message(&mut host_write, &CompilerMessage::exit()).await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_exits_on_eof() {
        let (host, worker) = tokio::io::duplex(1024);
        let (worker_read, worker_write) = tokio::io::split(worker);
        let server = tokio::spawn(serve(worker_read, worker_write));

        let (mut host_read, host_write) = tokio::io::split(host);
        read_message(&mut host_read).await.unwrap().unwrap();
        drop(host_write);
        drop(host_read);

        server.await.unwrap().unwrap();
    }
}
