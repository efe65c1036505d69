//! Target list loading.
//!
//! One target per line. Blank lines and `#` comments are ignored and
//! duplicates are dropped, keeping the first occurrence. Entries starting
//! with `-` would be read by the tools as options and are skipped.

use std::collections::HashSet;
use std::path::Path;

use crate::config::ConfigError;
use crate::metric::Target;

/// Parse newline-delimited targets.
pub fn parse_targets(content: &str) -> Vec<Target> {
    dedupe(content.lines().filter_map(|line| {
        let line = line.split('#').next().unwrap_or_default().trim();
        (!line.is_empty()).then(|| Target::new(line))
    }))
}

/// Read and parse a target file.
pub fn load_targets(path: impl AsRef<Path>) -> Result<Vec<Target>, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let targets = parse_targets(&content);
    tracing::debug!(path = %path.display(), count = targets.len(), "Loaded targets");
    Ok(targets)
}

/// Concatenate target lists, keeping the first occurrence of each target.
pub fn merge_targets(lists: impl IntoIterator<Item = Vec<Target>>) -> Vec<Target> {
    dedupe(lists.into_iter().flatten())
}

fn dedupe(targets: impl Iterator<Item = Target>) -> Vec<Target> {
    let mut seen = HashSet::new();
    targets
        .filter(|t| {
            if t.as_str().starts_with('-') {
                tracing::warn!(target_name = %t, "Skipping target that looks like an option");
                return false;
            }
            !t.as_str().is_empty() && seen.insert(t.clone())
        })
        .collect()
}
