//! Ignore pattern matching for watched paths.

use std::path::{Component, Path};

use glob::Pattern;

use crate::error::ServerError;

/// Compiled ignore patterns.
///
/// A pattern matches when it matches any single segment of the root-relative
/// path, so `node_modules` excludes that directory at every depth. Patterns
/// containing `/` are also tried against the whole relative path.
#[derive(Debug, Default)]
pub(crate) struct IgnoreSet {
    patterns: Vec<Pattern>,
}

impl IgnoreSet {
    pub(crate) fn new(patterns: &[String]) -> Result<Self, ServerError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|source| ServerError::IgnorePattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    /// Source text of every pattern.
    pub(crate) fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }

    /// Check a path relative to the watched root.
    pub(crate) fn is_ignored(&self, relative: &Path) -> bool {
        self.patterns.iter().any(|pattern| {
            relative.components().any(|component| match component {
                Component::Normal(segment) => segment
                    .to_str()
                    .is_some_and(|segment| pattern.matches(segment)),
                _ => false,
            }) || (pattern.as_str().contains('/') && pattern.matches_path(relative))
        })
    }
}
