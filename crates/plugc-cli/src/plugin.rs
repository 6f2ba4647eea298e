//! Loading plugin source files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use plugc_core::SourceUnit;

/// Build a [`SourceUnit`] from a plugin file.
///
/// The script name is the file stem. Leading comment lines may declare
/// dependencies:
///
/// ```text
/// // Requires: Economics, Kits
/// // Reference: Newtonsoft.Json
/// // Include: shared/Helpers.cs
/// ```
///
/// Include paths are resolved relative to the plugin file.
pub fn load(path: &Path) -> Result<SourceUnit> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plugin {}", path.display()))?;
    let script_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Invalid plugin file name: {}", path.display()))?
        .to_string();
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let header = parse_header(&source);
    let mut unit = SourceUnit::new(script_name, source);
    for name in header.requires {
        unit = unit.with_requirement(name);
    }
    for name in header.references {
        unit = unit.with_reference(name);
    }
    for include in header.includes {
        unit = unit.with_include(base_dir.join(include));
    }
    Ok(unit)
}

#[derive(Debug, Default, PartialEq)]
struct Header {
    requires: Vec<String>,
    references: Vec<String>,
    includes: Vec<PathBuf>,
}

/// Read directives from the comment block at the top of a file.
fn parse_header(source: &str) -> Header {
    let mut header = Header::default();

    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(comment) = line.strip_prefix("//") else {
            break;
        };
        let Some((key, value)) = comment.split_once(':') else {
            continue;
        };
        let names = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        match key.trim().to_ascii_lowercase().as_str() {
            "requires" => header.requires.extend(names),
            "reference" | "references" => header.references.extend(names),
            "include" => header.includes.extend(names.map(PathBuf::from)),
            _ => {}
        }
    }

    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_header() {
        let source = "// Requires: Economics, Kits\n\
                      // Reference: Newtonsoft.Json\n\
                      // Author: someone\n\
                      \n\
                      // Include: shared/Helpers.cs\n\
                      class Foo { }\n\
                      // Requires: Ignored\n";
        let header = parse_header(source);

        assert_eq!(header.requires, vec!["Economics", "Kits"]);
        assert_eq!(header.references, vec!["Newtonsoft.Json"]);
        assert_eq!(header.includes, vec![PathBuf::from("shared/Helpers.cs")]);
    }

    #[test]
    fn test_load_plugin_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Greeter.cs");
        std::fs::write(&path, "// Include: lib/Util.cs\nclass Greeter { }\n").unwrap();

        let unit = load(&path).unwrap();

        assert_eq!(unit.script_name, "Greeter");
        assert!(unit.script_source.contains("class Greeter"));
        assert_eq!(unit.include_paths, vec![temp.path().join("lib/Util.cs")]);
        assert!(load(&temp.path().join("Missing.cs")).is_err());
    }
}
