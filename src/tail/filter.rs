// src/tail/filter.rs

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Decides which children of a watched directory are tailed.
///
/// Patterns are matched against the child's file name only, e.g. `".*"`
/// skips hidden files and `"*.gz"` skips compressed rotations.
#[derive(Clone)]
pub struct ChildFilter {
    patterns: Vec<String>,
    ignore_set: GlobSet,
}

impl fmt::Debug for ChildFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildFilter")
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}

impl ChildFilter {
    pub fn new(ignore: &[String]) -> Result<Self> {
        let ignore_set = build_globset(ignore).context("building directory ignore globset")?;
        Ok(Self {
            patterns: ignore.to_vec(),
            ignore_set,
        })
    }

    /// A filter that lets every child through.
    pub fn allow_all() -> Self {
        Self {
            patterns: Vec::new(),
            ignore_set: GlobSet::empty(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns true if `path` should be tailed as a directory child.
    pub fn allows(&self, path: &Path) -> bool {
        match path.file_name() {
            Some(name) => !self.ignore_set.is_match(Path::new(name)),
            None => false,
        }
    }
}

/// Build a GlobSet from simple string patterns.
pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
