//! Attribution of compiler diagnostics to source units.
//!
//! The worker compiles every unit of a batch together and reports errors as
//! plain stdout lines. Each error line names a file; the file's base name
//! without extension is the script name of the unit it belongs to.

use std::collections::BTreeMap;
use std::path::{MAIN_SEPARATOR, Path};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::source::SourceUnit;

/// `Foo.cs(10,2): error CS1234: ...` or ``error CS2001: Source file `./Foo.cs' ...``
static FILE_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\w.]+)\(\d+,\d+\+?\): error|error \w+: Source file `[\\./]*([\w.]+)")
        .expect("file error pattern is valid")
});

/// Result of attributing one compiler output to a batch of units.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Attribution {
    /// Error text per script name. Later lines overwrite earlier ones.
    pub errors: BTreeMap<String, String>,
    /// Error lines whose file did not resolve to a unit in the batch.
    pub unresolved: Vec<String>,
}

impl Attribution {
    /// Write the attributed errors into the units they belong to.
    pub fn apply(&self, units: &[Arc<SourceUnit>]) {
        for unit in units {
            if let Some(text) = self.errors.get(&unit.script_name) {
                unit.set_compiler_errors(text.clone());
            }
        }
    }
}

/// Attribute error lines in `std_output` to the units of a batch.
///
/// A unit whose declared requirements are missing from the batch gets a
/// "Missing dependencies" message instead of the raw line, since the raw
/// error is almost always a consequence of the absent dependency.
pub fn attribute(std_output: &str, units: &[Arc<SourceUnit>], plugin_dir: &Path) -> Attribution {
    let mut attribution = Attribution::default();
    let local_prefix = if plugin_dir.as_os_str().is_empty() {
        None
    } else {
        Some(format!("{}{}", plugin_dir.display(), MAIN_SEPARATOR))
    };

    for line in std_output.split(['\r', '\n']) {
        let line = line.trim();
        let Some(captures) = FILE_ERROR.captures(line) else {
            continue;
        };

        for file in captures.iter().skip(1).flatten() {
            let file = file.as_str().trim();
            if file.is_empty() {
                continue;
            }

            let script_name = script_name_of(file);
            let mut matches = units.iter().filter(|u| u.script_name == script_name);
            let unit = match (matches.next(), matches.next()) {
                (Some(unit), None) => unit,
                _ => {
                    attribution.unresolved.push(line.to_string());
                    continue;
                }
            };

            let missing: Vec<&str> = unit
                .requires
                .iter()
                .filter(|name| !units.iter().any(|u| &u.script_name == *name))
                .map(String::as_str)
                .collect();

            let text = if !missing.is_empty() {
                format!("Missing dependencies: {}", to_sentence(&missing))
            } else {
                match &local_prefix {
                    Some(prefix) => line.replace(prefix.as_str(), ""),
                    None => line.to_string(),
                }
            };
            attribution.errors.insert(unit.script_name.clone(), text);
        }
    }

    attribution
}

/// `dir/Foo.cs` -> `Foo`
fn script_name_of(file: &str) -> &str {
    let base = file.rsplit(['/', '\\']).next().unwrap_or(file);
    match base.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => base,
    }
}

/// `A`, `A and B`, `A, B and C`
fn to_sentence(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [one] => one.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(specs: &[(&str, &[&str])]) -> Vec<Arc<SourceUnit>> {
        specs
            .iter()
            .map(|(name, requires)| {
                let mut unit = SourceUnit::new(*name, "");
                for r in *requires {
                    unit = unit.with_requirement(*r);
                }
                unit.shared()
            })
            .collect()
    }

    #[test]
    fn test_attributes_cleaned_line() {
        let batch = units(&[("Foo", &[]), ("Other", &[])]);
        let out = "Foo.cs(10,2): error CS1234: bar\r\nsome noise\n";
        let attribution = attribute(out, &batch, Path::new(""));

        assert_eq!(
            attribution.errors.get("Foo").map(String::as_str),
            Some("Foo.cs(10,2): error CS1234: bar")
        );
        assert!(!attribution.errors.contains_key("Other"));
        assert!(attribution.unresolved.is_empty());

        attribution.apply(&batch);
        assert!(batch[0].last_compiler_errors().unwrap().contains("CS1234"));
        assert!(batch[1].last_compiler_errors().is_none());
    }

    #[test]
    fn test_missing_dependency_outranks_raw_text() {
        let batch = units(&[("Foo", &["Bar"])]);
        let attribution = attribute("Foo.cs(10,2): error CS1234: bar", &batch, Path::new(""));
        assert_eq!(
            attribution.errors.get("Foo").map(String::as_str),
            Some("Missing dependencies: Bar")
        );
    }

    #[test]
    fn test_present_dependency_keeps_raw_text() {
        let batch = units(&[("Foo", &["Bar"]), ("Bar", &[])]);
        let attribution = attribute("Foo.cs(1,1): error CS0246: nope", &batch, Path::new(""));
        assert!(attribution.errors["Foo"].starts_with("Foo.cs(1,1)"));
    }

    #[test]
    fn test_unresolved_and_last_write_wins() {
        let batch = units(&[("Foo", &[])]);
        let out = "Ghost.cs(3,4): error CS0001: who\nFoo.cs(1,1): error CS1: first\nFoo.cs(2,2): error CS2: second";
        let attribution = attribute(out, &batch, Path::new(""));

        assert_eq!(attribution.unresolved, vec!["Ghost.cs(3,4): error CS0001: who"]);
        assert!(attribution.errors["Foo"].contains("second"));
    }

    #[test]
    fn test_source_file_pattern_and_prefix_strip() {
        let batch = units(&[("Foo", &[])]);
        let dir = Path::new("/srv/plugins");
        let line = format!(
            "error CS2001: Source file `./Foo.cs' could not be found in {}{}Foo.cs",
            dir.display(),
            MAIN_SEPARATOR
        );
        let attribution = attribute(&line, &batch, dir);
        assert_eq!(
            attribution.errors["Foo"],
            "error CS2001: Source file `./Foo.cs' could not be found in Foo.cs"
        );
    }

    #[test]
    fn test_helpers() {
        assert_eq!(script_name_of("Foo.cs"), "Foo");
        assert_eq!(script_name_of("dir/My.Plugin.cs"), "My.Plugin");
        assert_eq!(to_sentence(&["A"]), "A");
        assert_eq!(to_sentence(&["A", "B"]), "A and B");
        assert_eq!(to_sentence(&["A", "B", "C"]), "A, B and C");
    }
}
