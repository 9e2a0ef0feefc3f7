//! Chapter identity: (library, title, chapter number, language, scanlation group).

use crate::store::{ChapterRow, JobId};

/// Key under which a chapter is unique. The same chapter number from a
/// different group is a different chapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChapterKey {
    /// Library subdirectory; empty for the library root.
    pub library: String,
    pub title: String,
    /// Canonical form, see [`canonical_number`].
    pub number: String,
    pub language: String,
    /// Empty when the chapter has no group.
    pub group: String,
}

impl ChapterKey {
    pub fn new(
        library: &str,
        title: &str,
        number: &str,
        language: &str,
        group: Option<&str>,
    ) -> Self {
        Self {
            library: library.trim().to_string(),
            title: title.trim().to_string(),
            number: canonical_number(number),
            language: language.trim().to_ascii_lowercase(),
            group: group.map(str::trim).unwrap_or_default().to_string(),
        }
    }

    /// Numeric sort position; unparsable numbers sort first.
    pub fn sort_value(&self) -> f64 {
        self.number.parse::<f64>().unwrap_or(0.0)
    }
}

/// Normalizes a chapter number so "5", "5.0" and "05" compare equal and
/// sub-chapters keep their fraction ("12.5"). Oneshots without a number map to "0".
pub fn canonical_number(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return "0".to_string();
    }
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => {
            if n.fract() == 0.0 {
                format!("{}", n as i64)
            } else {
                format!("{n}")
            }
        }
        _ => raw.to_string(),
    }
}

/// Durable proof that one chapter was materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRecord {
    pub key: ChapterKey,
    pub job_id: Option<JobId>,
    pub chapter_url: String,
    pub volume: Option<String>,
    /// Archive file name relative to the title directory.
    pub filename: String,
    pub completed_at: i64,
}

impl ChapterRecord {
    pub(crate) fn to_row(&self) -> ChapterRow {
        ChapterRow {
            job_id: self.job_id,
            library: self.key.library.clone(),
            title: self.key.title.clone(),
            chapter_number: self.key.number.clone(),
            chapter_sort: self.key.sort_value(),
            volume: self.volume.clone(),
            language: self.key.language.clone(),
            group_key: self.key.group.clone(),
            chapter_url: self.chapter_url.clone(),
            filename: self.filename.clone(),
            completed_at: self.completed_at,
        }
    }
}
