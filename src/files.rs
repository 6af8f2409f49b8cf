//! Registry of configured input files.
//!
//! The sender consults this to decide whether an unexpected filesystem event
//! concerns a file it is supposed to ship.

use std::path::{Path, PathBuf};

/// One configured input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Logical name for the file (like `authlog`).
    pub name: String,
    /// Local filesystem path.
    pub path: PathBuf,
    /// Whether filesystem notifications should be set up for it.
    pub watch: bool,
}

/// Lookup table over the configured inputs.
#[derive(Debug, Default)]
pub struct FileRegistry {
    inputs: Vec<InputFile>,
}

impl FileRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input. Callers ensure path uniqueness; duplicates are not
    /// rejected here.
    pub fn add_input(&mut self, input: InputFile) {
        self.inputs.push(input);
    }

    /// All configured inputs, in insertion order.
    #[must_use]
    pub fn inputs(&self) -> &[InputFile] {
        &self.inputs
    }

    /// Find an input by its local path.
    #[must_use]
    pub fn find_by_path(&self, path: &Path) -> Option<&InputFile> {
        self.inputs.iter().find(|f| f.path == path)
    }

    /// Find an input by its logical name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&InputFile> {
        self.inputs.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileRegistry {
        let mut registry = FileRegistry::new();
        registry.add_input(InputFile {
            name: "authlog".to_string(),
            path: PathBuf::from("/var/log/auth.log"),
            watch: true,
        });
        registry.add_input(InputFile {
            name: "syslog".to_string(),
            path: PathBuf::from("/var/log/syslog"),
            watch: false,
        });
        registry
    }

    #[test]
    fn test_find_by_path() {
        let registry = sample();
        let input = registry.find_by_path(Path::new("/var/log/auth.log")).unwrap();
        assert_eq!(input.name, "authlog");
        assert!(registry.find_by_path(Path::new("/var/log/other.log")).is_none());
    }

    #[test]
    fn test_find_by_name() {
        let registry = sample();
        assert!(registry.find_by_name("syslog").is_some());
        assert!(registry.find_by_name("missing").is_none());
    }

    #[test]
    fn test_inputs_keep_insertion_order() {
        let registry = sample();
        let names: Vec<_> = registry.inputs().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["authlog", "syslog"]);
    }
}
