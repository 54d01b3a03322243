//! Sweep file discovery and linting.
//!
//! A sweep directory holds curated `<stem>_sweep.yml` files and, under
//! `generated/`, machine-written variants. For every stem exactly one file
//! is chosen, in this order of preference:
//!
//! 1. `generated/<stem>_sweep.yml`
//! 2. `generated/<stem>_sweep.new.yml`
//! 3. `<stem>_sweep.yml`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::ParamMap;
use super::definition::SweepDefinition;
use super::error::SweepError;
use super::expander::{ExpandOptions, Expander};

const GENERATED_DIR: &str = "generated";
const SWEEP_SUFFIXES: [&str; 2] = ["_sweep.yml", "_sweep.yaml"];
const DRAFT_SUFFIXES: [&str; 2] = ["_sweep.new.yml", "_sweep.new.yaml"];

/// Sweep name for a file: its stem with a trailing `.new` removed.
#[must_use]
pub fn sweep_name_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    Some(stem.strip_suffix(".new").unwrap_or(stem).to_string())
}

/// Stem shared by the curated and generated variants of one sweep.
fn sweep_stem(file_name: &str, suffixes: &[&str]) -> Option<String> {
    suffixes
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, SweepError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| SweepError::io(dir, e))? {
        let entry = entry.map_err(|e| SweepError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// Pick one sweep file per stem under `dir`, sorted by path.
pub fn discover_sweep_files(dir: &Path) -> Result<Vec<PathBuf>, SweepError> {
    let mut chosen: BTreeMap<String, (u8, PathBuf)> = BTreeMap::new();
    let mut offer = |stem: String, rank: u8, path: PathBuf| {
        let better = chosen.get(&stem).is_none_or(|(current, _)| rank < *current);
        if better {
            chosen.insert(stem, (rank, path));
        }
    };

    let generated = dir.join(GENERATED_DIR);
    for path in list_files(&generated)? {
        let name = file_name(&path);
        if let Some(stem) = sweep_stem(name, &DRAFT_SUFFIXES) {
            offer(stem, 1, path);
        } else if let Some(stem) = sweep_stem(name, &SWEEP_SUFFIXES) {
            offer(stem, 0, path);
        }
    }
    for path in list_files(dir)? {
        let name = file_name(&path);
        if sweep_stem(name, &DRAFT_SUFFIXES).is_some() {
            continue;
        }
        if let Some(stem) = sweep_stem(name, &SWEEP_SUFFIXES) {
            offer(stem, 2, path);
        }
    }

    let mut paths: Vec<PathBuf> = chosen.into_values().map(|(_, path)| path).collect();
    paths.sort();
    tracing::debug!(dir = %dir.display(), files = paths.len(), "Discovered sweep files");
    Ok(paths)
}

/// Load sweep files, applying meta overrides and an optional
/// `controller_type` filter (case-insensitive).
pub fn load_sweeps(
    paths: &[PathBuf],
    overrides: Option<&ParamMap>,
    controller_type: Option<&str>,
) -> Result<Vec<SweepDefinition>, SweepError> {
    let wanted = controller_type.map(str::to_lowercase);
    let mut definitions = Vec::with_capacity(paths.len());

    for path in paths {
        let mut definition = SweepDefinition::from_path(path)?;
        if let Some(wanted) = &wanted {
            if definition.controller_type().as_deref() != Some(wanted.as_str()) {
                tracing::debug!(path = %path.display(), "Skipping sweep, controller_type filter");
                continue;
            }
        }
        if let Some(overrides) = overrides {
            definition.apply_overrides(overrides)?;
        }
        definitions.push(definition);
    }

    Ok(definitions)
}

/// Read a meta-overrides file: a YAML mapping applied to every sweep
/// with [`SweepDefinition::apply_overrides`]. An empty file is an empty map.
pub fn load_meta_overrides(path: &Path) -> Result<ParamMap, SweepError> {
    let text = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
    if text.trim().is_empty() {
        return Ok(ParamMap::new());
    }
    let root: Value = serde_yaml_bw::from_str(&text).map_err(|source| SweepError::Yaml {
        path: Some(path.to_path_buf()),
        source,
    })?;
    match root {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(ParamMap::new()),
        _ => Err(SweepError::SectionNotAMapping { section: "meta-file" }),
    }
}

/// Outcome of linting one sweep file.
#[derive(Debug)]
pub struct LintReport {
    /// File checked.
    pub path: PathBuf,
    /// Configuration count, or the error that stopped expansion.
    pub outcome: Result<usize, SweepError>,
}

impl LintReport {
    /// Whether the file expanded cleanly.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Expand every file (directories contribute their `*_sweep.yml` files)
/// without dispatching. Each file is checked on its own.
pub fn lint_paths(paths: &[PathBuf], options: &ExpandOptions) -> Result<Vec<LintReport>, SweepError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(
                list_files(path)?
                    .into_iter()
                    .filter(|p| sweep_stem(file_name(p), &SWEEP_SUFFIXES).is_some()),
            );
        } else {
            files.push(path.clone());
        }
    }

    Ok(files
        .into_iter()
        .map(|path| {
            let outcome = SweepDefinition::from_path(&path)
                .and_then(|def| Expander::new(options.clone()).expand(&def))
                .map(|configs| configs.len());
            LintReport { path, outcome }
        })
        .collect())
}
