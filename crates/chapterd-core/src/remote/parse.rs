//! Response parsing for the MangaDex-shaped API.

use serde::Deserialize;
use std::collections::HashSet;

use super::{RemoteChapter, RemoteError};
use crate::history::canonical_number;

/// Title id: the path segment following `/title/`.
pub fn title_id_from_url(source_url: &str) -> Result<String, RemoteError> {
    let unsupported = || RemoteError::UnsupportedUrl(source_url.to_string());
    let parsed = url::Url::parse(source_url).map_err(|_| unsupported())?;
    let mut segments = parsed.path_segments().ok_or_else(unsupported)?;
    segments
        .by_ref()
        .find(|s| *s == "title")
        .ok_or_else(unsupported)?;
    match segments.next() {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(unsupported()),
    }
}

fn parse_err(url: &str, reason: impl ToString) -> RemoteError {
    RemoteError::Parse {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// Distinct chapter numbers across all volumes of an aggregate response.
///
/// `volumes` (and each volume's `chapters`) is an object keyed by number, or an
/// empty array when there is nothing to list.
pub fn parse_aggregate_count(body: &[u8], url: &str) -> Result<i64, RemoteError> {
    let v: serde_json::Value = serde_json::from_slice(body).map_err(|e| parse_err(url, e))?;
    if v.get("result").and_then(|r| r.as_str()) == Some("error") {
        return Err(parse_err(url, "API returned result=error"));
    }
    let volumes = v
        .get("volumes")
        .ok_or_else(|| parse_err(url, "missing volumes"))?;
    let mut numbers = HashSet::new();
    let Some(volumes) = volumes.as_object() else {
        return Ok(0);
    };
    for volume in volumes.values() {
        let Some(chapters) = volume.get("chapters").and_then(|c| c.as_object()) else {
            continue;
        };
        for (key, chapter) in chapters {
            let number = chapter
                .get("chapter")
                .and_then(|c| c.as_str())
                .unwrap_or(key);
            let number = if number == "none" { "" } else { number };
            numbers.insert(canonical_number(number));
        }
    }
    Ok(numbers.len() as i64)
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    data: Vec<FeedChapter>,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    limit: u64,
}

#[derive(Debug, Deserialize)]
struct FeedChapter {
    id: String,
    attributes: ChapterAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterAttributes {
    chapter: Option<String>,
    volume: Option<String>,
    title: Option<String>,
    translated_language: String,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Option<RelationshipAttributes>,
}

#[derive(Debug, Deserialize)]
struct RelationshipAttributes {
    name: Option<String>,
}

/// One page of the chapter feed.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub chapters: Vec<RemoteChapter>,
    pub total: u64,
    pub limit: u64,
}

impl FeedPage {
    /// Offset of the page after this one, fetched at `requested`. The
    /// response's own `offset` field is optional and not trusted.
    pub fn next_offset(&self, requested: u64) -> Option<u64> {
        let next = requested + self.chapters.len() as u64;
        (!self.chapters.is_empty() && next < self.total).then_some(next)
    }
}

pub fn parse_feed_page(body: &[u8], url: &str, site_base_url: &str) -> Result<FeedPage, RemoteError> {
    let resp: FeedResponse = serde_json::from_slice(body).map_err(|e| parse_err(url, e))?;
    let site = site_base_url.trim_end_matches('/');
    let chapters = resp
        .data
        .into_iter()
        .map(|c| {
            let group = c
                .relationships
                .iter()
                .filter(|r| r.kind == "scanlation_group")
                .filter_map(|r| r.attributes.as_ref().and_then(|a| a.name.clone()))
                .collect::<Vec<_>>();
            RemoteChapter {
                url: format!("{site}/chapter/{}", c.id),
                id: c.id,
                number: c.attributes.chapter.filter(|n| !n.trim().is_empty()),
                volume: c.attributes.volume.filter(|v| !v.trim().is_empty()),
                language: c.attributes.translated_language,
                title: c.attributes.title.filter(|t| !t.trim().is_empty()),
                group: (!group.is_empty()).then(|| group.join(" & ")),
            }
        })
        .collect();
    Ok(FeedPage {
        chapters,
        total: resp.total,
        limit: resp.limit,
    })
}
