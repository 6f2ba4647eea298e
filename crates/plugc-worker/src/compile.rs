//! Source checks standing in for a real compiler.
//!
//! The worker does not generate code. It runs a few cheap structural checks
//! over every source file and reports failures as csc-style lines, which is
//! the shape the host's diagnostic attribution expects.

use std::fmt;

use plugc_core::ipc::{AssemblyOutput, CompileRequest, CompilerFile};

/// First bytes of every module the worker produces.
pub const ASSEMBLY_HEADER: &[u8] = b"MZ";

/// Tokens rejected outright, with the diagnostic code and message for each.
const FORBIDDEN: &[(&str, &str, &str)] = &[
    (
        "unsafe",
        "CS0227",
        "Unsafe code may only appear if compiling with /unsafe",
    ),
    (
        "extern",
        "CS0626",
        "Method, operator, or accessor is marked external and has no attributes on it",
    ),
];

/// A single compiler error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub code: &'static str,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({},{}): error {}: {}",
            self.file, self.line, self.column, self.code, self.message
        )
    }
}

/// Compile a request into an Assembly payload.
pub async fn compile(request: &CompileRequest) -> AssemblyOutput {
    let mut errors: Vec<String> = Vec::new();

    for file in &request.source_files {
        match load_source(file).await {
            Ok(text) => errors.extend(check_source(&file.name, &text).iter().map(|d| d.to_string())),
            Err(line) => errors.push(line),
        }
    }

    for reference in &request.reference_files {
        if !reference.data.starts_with(ASSEMBLY_HEADER) {
            errors.push(format!(
                "error CS0009: Metadata file `{}' could not be opened -- not a valid module",
                reference.name
            ));
        }
    }

    if !errors.is_empty() {
        tracing::info!(
            "{} failed with {} errors",
            request.output_file,
            errors.len()
        );
        return AssemblyOutput {
            assembly: None,
            std_output: Some(errors.join("\n")),
        };
    }

    let mut assembly = ASSEMBLY_HEADER.to_vec();
    assembly.push(b'\n');
    let names: Vec<&str> = request.source_files.iter().map(|f| f.name.as_str()).collect();
    assembly.extend_from_slice(names.join("\n").as_bytes());

    tracing::info!(
        "Compiled {} ({} sources, {} references)",
        request.output_file,
        request.source_files.len(),
        request.reference_files.len()
    );
    AssemblyOutput {
        assembly: Some(assembly),
        std_output: None,
    }
}

/// Inline text, or the file contents for path-only entries.
async fn load_source(file: &CompilerFile) -> Result<String, String> {
    if let Some(text) = &file.text {
        return Ok(text.clone());
    }
    tokio::fs::read_to_string(&file.name)
        .await
        .map_err(|_| format!("error CS2001: Source file `{}' could not be found", file.name))
}

/// Structural checks on one source file.
pub fn check_source(name: &str, text: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut open: Vec<(usize, usize)> = Vec::new();

    for (line_index, line) in text.lines().enumerate() {
        let line_no = line_index + 1;
        let code = strip_line_comment(line);

        for (col_index, ch) in code.char_indices() {
            match ch {
                '{' => open.push((line_no, col_index + 1)),
                '}' if open.pop().is_none() => diagnostics.push(Diagnostic {
                    file: name.to_string(),
                    line: line_no,
                    column: col_index + 1,
                    code: "CS1022",
                    message: "Type or namespace definition, or end-of-file expected".to_string(),
                }),
                _ => {}
            }
        }

        for &(token, code_id, message) in FORBIDDEN {
            if let Some(column) = find_token(code, token) {
                diagnostics.push(Diagnostic {
                    file: name.to_string(),
                    line: line_no,
                    column: column + 1,
                    code: code_id,
                    message: message.to_string(),
                });
            }
        }
    }

    if !open.is_empty() {
        let line_count = text.lines().count().max(1);
        diagnostics.push(Diagnostic {
            file: name.to_string(),
            line: line_count,
            column: 1,
            code: "CS1513",
            message: "} expected".to_string(),
        });
    }

    diagnostics
}

fn strip_line_comment(line: &str) -> &str {
    match line.find("//") {
        Some(index) => &line[..index],
        None => line,
    }
}

/// Byte offset of `token` as a whole word.
fn find_token(code: &str, token: &str) -> Option<usize> {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    code.match_indices(token).map(|(i, _)| i).find(|&i| {
        let before = code[..i].chars().next_back();
        let after = code[i + token.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}
