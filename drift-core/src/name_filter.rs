use std::collections::HashSet;
use std::fmt;

use crate::config::FileNameRules;

/// Decides whether a change to a file with the given name is worth an event.
pub trait FileNameFilter: Send + Sync {
    fn is_invalid_or_ignored(&self, file_name: &str) -> bool;
}

/// Rejects names no client could have created plus the configured
/// system/temporary file names.
pub struct DefaultFileNameFilter {
    ignored_names: HashSet<String>,
    ignored_prefixes: Vec<String>,
    ignored_suffixes: Vec<String>,
}

impl fmt::Debug for DefaultFileNameFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultFileNameFilter")
            .field("ignored_names", &self.ignored_names.len())
            .field("ignored_prefixes", &self.ignored_prefixes)
            .field("ignored_suffixes", &self.ignored_suffixes)
            .finish()
    }
}

impl Default for DefaultFileNameFilter {
    fn default() -> Self {
        Self::new(&FileNameRules::default())
    }
}

impl DefaultFileNameFilter {
    pub fn new(rules: &FileNameRules) -> Self {
        let lower = |values: &[String]| -> Vec<String> {
            values
                .iter()
                .map(|value| value.to_lowercase())
                .filter(|value| !value.is_empty())
                .collect()
        };

        Self {
            ignored_names: lower(&rules.ignored_names).into_iter().collect(),
            ignored_prefixes: lower(&rules.ignored_prefixes),
            ignored_suffixes: lower(&rules.ignored_suffixes),
        }
    }

    fn is_invalid(file_name: &str) -> bool {
        if file_name.trim().is_empty() || file_name == "." || file_name == ".." {
            return true;
        }
        if file_name.ends_with(' ') || file_name.ends_with('.') {
            return true;
        }
        file_name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
    }

    fn is_ignored(&self, file_name: &str) -> bool {
        let lowered = file_name.to_lowercase();
        self.ignored_names.contains(&lowered)
            || self
                .ignored_prefixes
                .iter()
                .any(|prefix| lowered.starts_with(prefix.as_str()))
            || self
                .ignored_suffixes
                .iter()
                .any(|suffix| lowered.ends_with(suffix.as_str()))
    }
}

impl FileNameFilter for DefaultFileNameFilter {
    fn is_invalid_or_ignored(&self, file_name: &str) -> bool {
        Self::is_invalid(file_name) || self.is_ignored(file_name)
    }
}
