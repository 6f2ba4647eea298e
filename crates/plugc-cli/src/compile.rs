//! `plugc compile`: compile plugin files in one batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use plugc_core::{CompilationOutcome, CompilerConfig, LocalProvisioner, PluginCompiler};

use crate::plugin;

/// Name of the worker binary looked up when no compiler is given.
const DEFAULT_COMPILER: &str = "plugc-worker";

pub struct CompileArgs {
    pub files: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub root: PathBuf,
    pub compiler: Option<PathBuf>,
    pub reference_dirs: Vec<PathBuf>,
}

pub async fn execute(args: CompileArgs) -> Result<()> {
    if args.files.is_empty() {
        bail!("No plugin files given");
    }

    let units = args
        .files
        .iter()
        .map(|path| plugin::load(path).map(|unit| unit.shared()))
        .collect::<Result<Vec<_>>>()?;

    let provisioner = match &args.compiler {
        Some(path) => LocalProvisioner::new(path),
        None => LocalProvisioner::discover(DEFAULT_COMPILER).with_context(|| {
            format!(
                "No compiler found; pass --compiler or set {}",
                plugc_core::provision::COMPILER_PATH_ENV
            )
        })?,
    };
    tracing::debug!("Using compiler at {}", provisioner.path().display());

    let mut config = CompilerConfig::for_root(&args.root).with_auto_shutdown(false);
    if let Some(plugin_dir) = args.files[0].parent().filter(|p| !p.as_os_str().is_empty()) {
        config.plugin_dir = plugin_dir.to_path_buf();
    }
    for dir in &args.reference_dirs {
        config = config.with_reference_dir(dir);
    }

    let compiler = PluginCompiler::start(config, Arc::new(provisioner));

    let batch = tokio::select! {
        batch = compiler.compile(units) => batch,
        _ = tokio::signal::ctrl_c() => {
            compiler.shutdown().await;
            bail!("Interrupted");
        }
    };
    compiler.shutdown().await;

    let mut reported = 0;
    for unit in &batch.units {
        if let Some(errors) = unit.last_compiler_errors() {
            eprintln!("{}: {}", unit.script_name, errors);
            reported += 1;
        }
    }

    match &batch.outcome {
        CompilationOutcome::Compiled(assembly) => {
            let path = write_assembly(&args.out_dir, &batch.output_name(), assembly)?;
            let elapsed = batch
                .duration()
                .map(|d| format!(" in {:.2}s", d.as_secs_f64()))
                .unwrap_or_default();
            println!(
                "Compiled {} plugin(s){} -> {}",
                batch.units.len(),
                elapsed,
                path.display()
            );
            Ok(())
        }
        CompilationOutcome::Failed(reason) => {
            if reported == 0 {
                eprintln!("{}", reason);
            }
            bail!("Compilation failed");
        }
        CompilationOutcome::Empty => Ok(()),
    }
}

fn write_assembly(out_dir: &Path, name: &str, assembly: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    let path = out_dir.join(format!("{}.dll", name));
    std::fs::write(&path, assembly)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
