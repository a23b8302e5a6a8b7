//! Module selection.
//!
//! Picks the registered modules a run covers from include and `!`-prefixed
//! exclude patterns.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tally_core::{ModuleId, ModuleRegistry};

/// Patterns excluded unless a run names them explicitly.
pub const DEFAULT_EXCLUDES: &[&str] = &["**/target/**", "**/build.rs"];

#[derive(Debug, thiserror::Error)]
#[error("invalid module pattern `{pattern}`: {source}")]
pub struct PatternError {
    pub pattern: String,
    #[source]
    pub source: globset::Error,
}

/// Registered modules matching `patterns`, sorted and de-duplicated.
///
/// `*` never crosses a `/`; use `**` for that. No include pattern selects
/// every module. Default excludes only apply to
/// modules that no include pattern names literally.
pub fn select_modules<S: AsRef<str>>(
    registry: &ModuleRegistry,
    patterns: &[S],
) -> Result<Vec<ModuleId>, PatternError> {
    let (excludes, includes): (Vec<&str>, Vec<&str>) = patterns
        .iter()
        .map(AsRef::as_ref)
        .partition(|pattern| pattern.starts_with('!'));

    let include = build(includes.iter().copied())?;
    let exclude = build(
        excludes
            .iter()
            .map(|pattern| pattern.strip_prefix('!').unwrap_or(pattern)),
    )?;
    let defaults = build(DEFAULT_EXCLUDES.iter().copied())?;

    let mut selected: Vec<ModuleId> = registry
        .modules()
        .filter(|module| {
            let named = includes.contains(&module.as_str());
            let included = includes.is_empty() || named || include.is_match(module.as_str());
            included
                && !exclude.is_match(module.as_str())
                && (named || !defaults.is_match(module.as_str()))
        })
        .cloned()
        .collect();
    selected.sort();
    selected.dedup();
    tracing::debug!(
        patterns = patterns.len(),
        selected = selected.len(),
        "selected modules"
    );
    Ok(selected)
}

fn build<'p>(patterns: impl Iterator<Item = &'p str>) -> Result<GlobSet, PatternError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| PatternError {
                pattern: pattern.to_owned(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| PatternError {
        pattern: String::from("<set>"),
        source,
    })
}
