//! Compilation input preparation.
//!
//! Turns a batch of source units into the file lists a Compile message
//! carries. This is the only step of a compilation that touches the
//! filesystem, so it runs off the supervisor task.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::CompilerConfig;
use crate::error::{Error, Result};
use crate::ipc::{CompilerFile, ReferenceFile};
use crate::source::SourceUnit;

/// Source and reference files for one compilation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedInputs {
    pub source_files: Vec<CompilerFile>,
    pub reference_files: Vec<ReferenceFile>,
}

/// Resolves the inputs of a compilation.
pub trait InputResolver: Send + Sync {
    fn prepare(&self, units: Vec<Arc<SourceUnit>>) -> BoxFuture<'static, Result<PreparedInputs>>;
}

/// Resolver that reads references from directories on disk.
#[derive(Debug, Clone)]
pub struct FsInputResolver {
    source_extension: String,
    reference_dirs: Vec<PathBuf>,
}

impl FsInputResolver {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            source_extension: config.source_extension.clone(),
            reference_dirs: config.reference_dirs.clone(),
        }
    }

    /// Source file list: distinct include paths first, then every unit inline.
    pub fn source_files(&self, units: &[Arc<SourceUnit>]) -> Vec<CompilerFile> {
        let mut files: Vec<CompilerFile> = Vec::new();
        for path in units.iter().flat_map(|u| u.include_paths.iter()) {
            let name = path.to_string_lossy();
            if !files.iter().any(|f| f.name == name) {
                files.push(CompilerFile::path(name));
            }
        }
        files.extend(units.iter().map(|u| {
            CompilerFile::inline(
                format!("{}.{}", u.script_name, self.source_extension),
                u.script_source.clone(),
            )
        }));
        files
    }

    async fn load_reference(dirs: &[PathBuf], file_name: &str) -> Result<ReferenceFile> {
        for dir in dirs {
            let path = dir.join(file_name);
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    return Ok(ReferenceFile {
                        name: file_name.to_string(),
                        data,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Err(Error::Reference {
            name: file_name.to_string(),
        })
    }
}

fn reference_file_name(name: &str) -> String {
    if name.ends_with(".dll") {
        name.to_string()
    } else {
        format!("{}.dll", name)
    }
}

impl InputResolver for FsInputResolver {
    fn prepare(&self, units: Vec<Arc<SourceUnit>>) -> BoxFuture<'static, Result<PreparedInputs>> {
        let source_files = self.source_files(&units);
        let dirs = self.reference_dirs.clone();

        let mut names: Vec<String> = Vec::new();
        for name in units.iter().flat_map(|u| u.reference_names.iter()) {
            let file_name = reference_file_name(name);
            if !names.contains(&file_name) {
                names.push(file_name);
            }
        }

        Box::pin(async move {
            let mut reference_files = Vec::with_capacity(names.len());
            for name in &names {
                reference_files.push(Self::load_reference(&dirs, name).await?);
            }
            Ok(PreparedInputs {
                source_files,
                reference_files,
            })
        })
    }
}
