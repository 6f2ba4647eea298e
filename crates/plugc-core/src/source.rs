//! Plugin source units handed to the compiler.
//!
//! A [`SourceUnit`] is owned by whoever loads plugin sources. The compiler
//! only reads it, except for the last compiler error text, which it writes
//! back after every compilation the unit took part in.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// A single plugin's script source plus its declared dependencies.
#[derive(Debug)]
pub struct SourceUnit {
    /// Script name, without extension. Must be unique within a batch.
    pub script_name: String,

    /// Script source text, sent inline to the worker.
    pub script_source: String,

    /// Additional source files the script includes, sent by path.
    pub include_paths: Vec<PathBuf>,

    /// Names of other plugins this one requires in the same batch.
    pub requires: Vec<String>,

    /// Names of binary references (`<name>.dll`) the script links against.
    pub reference_names: Vec<String>,

    last_compiler_errors: Mutex<Option<String>>,
}

impl SourceUnit {
    /// Create a unit with no includes, requirements or references.
    pub fn new(script_name: impl Into<String>, script_source: impl Into<String>) -> Self {
        Self {
            script_name: script_name.into(),
            script_source: script_source.into(),
            include_paths: Vec::new(),
            requires: Vec::new(),
            reference_names: Vec::new(),
            last_compiler_errors: Mutex::new(None),
        }
    }

    pub fn with_include(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn with_requirement(mut self, name: impl Into<String>) -> Self {
        self.requires.push(name.into());
        self
    }

    pub fn with_reference(mut self, name: impl Into<String>) -> Self {
        self.reference_names.push(name.into());
        self
    }

    /// Wrap in an `Arc` for submission.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Errors reported by the most recent compilation, if any.
    ///
    /// Cleared when a new compilation of this unit is sent to the compiler.
    pub fn last_compiler_errors(&self) -> Option<String> {
        self.last_compiler_errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_compiler_errors(&self, errors: impl Into<String>) {
        *self
            .last_compiler_errors
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(errors.into());
    }

    pub(crate) fn clear_compiler_errors(&self) {
        *self
            .last_compiler_errors
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_errors() {
        let unit = SourceUnit::new("Foo", "class Foo {}")
            .with_requirement("Bar")
            .with_reference("Newtonsoft.Json")
            .with_include("plugins/include/Ext.cs");

        assert_eq!(unit.requires, vec!["Bar"]);
        assert_eq!(unit.reference_names, vec!["Newtonsoft.Json"]);
        assert_eq!(unit.include_paths.len(), 1);
        assert!(unit.last_compiler_errors().is_none());

        unit.set_compiler_errors("boom");
        assert_eq!(unit.last_compiler_errors().as_deref(), Some("boom"));

        unit.clear_compiler_errors();
        assert!(unit.last_compiler_errors().is_none());
    }
}
