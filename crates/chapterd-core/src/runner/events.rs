//! Structured lines printed by the download tool on stdout.

use serde::Deserialize;
use std::path::PathBuf;

/// One event from the tool. Lines that are not JSON events are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ToolEvent {
    /// Progress within the current chapter, 0..=100.
    Progress { percent: f64 },
    /// The archive the tool finished writing.
    Done { file: PathBuf },
}

impl ToolEvent {
    pub fn parse_line(line: &str) -> Option<ToolEvent> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        match serde_json::from_str::<ToolEvent>(line) {
            Ok(ToolEvent::Progress { percent }) if percent.is_finite() => Some(ToolEvent::Progress {
                percent: percent.clamp(0.0, 100.0),
            }),
            Ok(ToolEvent::Progress { .. }) => None,
            Ok(ev) => Some(ev),
            Err(_) => None,
        }
    }
}
