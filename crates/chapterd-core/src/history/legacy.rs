//! One-time import of the old `.chapters.json` side-channel tracking file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const LEGACY_FILE: &str = ".chapters.json";
pub const IMPORTED_SUFFIX: &str = ".imported";

/// One entry of the legacy tracking file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LegacyEntry {
    pub url: String,
    #[serde(deserialize_with = "number_or_string")]
    pub chapter: String,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    pub file: String,
}

/// Old files wrote chapter numbers both as JSON numbers and strings.
fn number_or_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(d)?;
    match v {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "chapter must be a number or string, got {other}"
        ))),
    }
}

pub fn legacy_path(dir: &Path) -> PathBuf {
    dir.join(LEGACY_FILE)
}

/// Reads the legacy file if present. `None` means there is nothing to import.
pub fn read_legacy(dir: &Path) -> Result<Option<Vec<LegacyEntry>>> {
    let path = legacy_path(dir);
    let data = match std::fs::read(&path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let entries: Vec<LegacyEntry> = serde_json::from_slice(&data)
        .with_context(|| format!("parse legacy tracking file {}", path.display()))?;
    Ok(Some(entries))
}

/// Renames the legacy file so it is never imported again.
pub fn retire_legacy(dir: &Path) -> Result<()> {
    let from = legacy_path(dir);
    let to = dir.join(format!("{LEGACY_FILE}{IMPORTED_SUFFIX}"));
    std::fs::rename(&from, &to)
        .with_context(|| format!("rename {} to {}", from.display(), to.display()))
}
