//! CBZ archives and their embedded `ComicInfo.xml` metadata document.
//!
//! The `<Web>` element carries the chapter's canonical source URL and is the
//! deduplication ground truth. Everything here is blocking I/O; async callers
//! go through `spawn_blocking`.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const COMIC_INFO: &str = "ComicInfo.xml";
pub const ARCHIVE_EXT: &str = "cbz";

/// The subset of ComicInfo fields this crate reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComicInfo {
    pub series: Option<String>,
    pub title: Option<String>,
    pub number: Option<String>,
    pub volume: Option<String>,
    pub language: Option<String>,
    /// Scanlation group.
    pub translator: Option<String>,
    /// Canonical chapter URL.
    pub web: Option<String>,
}

impl ComicInfo {
    /// Fields set in `other` replace ours; unset ones are kept.
    pub fn merged_with(&self, other: &ComicInfo) -> ComicInfo {
        fn pick(new: &Option<String>, old: &Option<String>) -> Option<String> {
            new.clone().or_else(|| old.clone())
        }
        ComicInfo {
            series: pick(&other.series, &self.series),
            title: pick(&other.title, &self.title),
            number: pick(&other.number, &self.number),
            volume: pick(&other.volume, &self.volume),
            language: pick(&other.language, &self.language),
            translator: pick(&other.translator, &self.translator),
            web: pick(&other.web, &self.web),
        }
    }
}

fn element_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<([A-Za-z]+)>([^<]*)</([A-Za-z]+)>").expect("static regex is valid")
    })
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parses the flat ComicInfo document. Unknown elements are ignored.
pub fn parse_comic_info(xml: &str) -> ComicInfo {
    let mut info = ComicInfo::default();
    for cap in element_regex().captures_iter(xml) {
        if cap[1] != cap[3] {
            continue;
        }
        let value = xml_unescape(cap[2].trim());
        if value.is_empty() {
            continue;
        }
        let slot = match &cap[1] {
            "Series" => &mut info.series,
            "Title" => &mut info.title,
            "Number" => &mut info.number,
            "Volume" => &mut info.volume,
            "LanguageISO" => &mut info.language,
            "Translator" => &mut info.translator,
            "Web" => &mut info.web,
            _ => continue,
        };
        *slot = Some(value);
    }
    info
}

pub fn render_comic_info(info: &ComicInfo) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <ComicInfo xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
         xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\">\n",
    );
    let fields = [
        ("Title", &info.title),
        ("Series", &info.series),
        ("Number", &info.number),
        ("Volume", &info.volume),
        ("Translator", &info.translator),
        ("Web", &info.web),
        ("LanguageISO", &info.language),
    ];
    for (name, value) in fields {
        if let Some(v) = value {
            out.push_str(&format!("  <{name}>{}</{name}>\n", xml_escape(v)));
        }
    }
    out.push_str("</ComicInfo>\n");
    out
}

/// Reads `ComicInfo.xml` from an archive; `None` if the archive has none.
pub fn read_comic_info(path: &Path) -> Result<Option<ComicInfo>> {
    let file = File::open(path).with_context(|| format!("open archive {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("read archive {}", path.display()))?;
    let index = (0..archive.len()).find(|&i| {
        archive
            .name_for_index(i)
            .is_some_and(|n| n.eq_ignore_ascii_case(COMIC_INFO))
    });
    let Some(index) = index else {
        return Ok(None);
    };
    let mut entry = archive.by_index(index)?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .with_context(|| format!("read {} in {}", COMIC_INFO, path.display()))?;
    Ok(Some(parse_comic_info(&xml)))
}

/// Temp sibling used while rewriting an archive (`x.cbz` → `x.cbz.part`).
fn temp_path(path: &Path) -> PathBuf {
    let mut o = path.as_os_str().to_owned();
    o.push(".part");
    PathBuf::from(o)
}

/// Rewrites the archive with `info` merged into its ComicInfo document.
/// Page entries are copied without recompression; the result replaces the
/// original by atomic rename after fsync.
pub fn write_comic_info(path: &Path, info: &ComicInfo) -> Result<()> {
    let existing = read_comic_info(path)?.unwrap_or_default();
    let merged = existing.merged_with(info);
    let xml = render_comic_info(&merged);

    let tmp = temp_path(path);
    let result = (|| -> Result<()> {
        let src = File::open(path)?;
        let mut archive = ZipArchive::new(src)?;
        let out = File::create(&tmp)?;
        let mut writer = ZipWriter::new(out);
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            if entry.name().eq_ignore_ascii_case(COMIC_INFO) {
                continue;
            }
            writer.raw_copy_file(entry)?;
        }
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(COMIC_INFO, options)?;
        writer.write_all(xml.as_bytes())?;
        let file = writer.finish()?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.context(format!("rewrite archive {}", path.display())));
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("replace archive {}", path.display()))?;
    Ok(())
}

/// Makes sure the archive's `<Web>` tag (and the other identity fields) match
/// `info`. Returns true if the archive had to be rewritten.
pub fn ensure_comic_info(path: &Path, info: &ComicInfo) -> Result<bool> {
    let existing = read_comic_info(path)?;
    if let Some(existing) = &existing {
        if existing.merged_with(info) == *existing {
            return Ok(false);
        }
    }
    write_comic_info(path, info)?;
    Ok(true)
}

/// Archives directly inside `dir`, sorted by file name. A missing directory yields none.
pub fn list_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("list {}", dir.display())),
    };
    let mut out = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_archive = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXT));
        if is_archive && path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
pub(crate) fn write_test_archive(path: &Path, info: Option<&ComicInfo>) {
    let file = File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    writer.start_file("001.jpg", options).unwrap();
    writer.write_all(b"\xFF\xD8page-one").unwrap();
    writer.start_file("002.jpg", options).unwrap();
    writer.write_all(b"\xFF\xD8page-two").unwrap();
    if let Some(info) = info {
        writer.start_file(COMIC_INFO, options).unwrap();
        writer.write_all(render_comic_info(info).as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ComicInfo {
        ComicInfo {
            series: Some("Foo & Bar".to_string()),
            number: Some("12.5".to_string()),
            language: Some("en".to_string()),
            translator: Some("Group <A>".to_string()),
            web: Some("https://mangadex.org/chapter/abc".to_string()),
            ..ComicInfo::default()
        }
    }

    #[test]
    fn render_then_parse_preserves_escaped_fields() {
        let info = sample();
        let parsed = parse_comic_info(&render_comic_info(&info));
        assert_eq!(parsed, info);
    }

    #[test]
    fn parse_ignores_unknown_and_empty_elements() {
        let xml = "<ComicInfo><Summary>x</Summary><Web></Web><Number>3</Number></ComicInfo>";
        let info = parse_comic_info(xml);
        assert_eq!(info.number.as_deref(), Some("3"));
        assert!(info.web.is_none());
    }

    #[test]
    fn backfill_adds_tag_and_keeps_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Ch.1.cbz");
        write_test_archive(&path, None);
        assert!(read_comic_info(&path).unwrap().is_none());

        assert!(ensure_comic_info(&path, &sample()).unwrap());
        let info = read_comic_info(&path).unwrap().expect("tag written");
        assert_eq!(info.web.as_deref(), Some("https://mangadex.org/chapter/abc"));
        assert!(!temp_path(&path).exists());

        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 3);
        let mut buf = Vec::new();
        archive.by_name("001.jpg").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(&buf[2..], b"page-one");

        // Already up to date: no rewrite.
        assert!(!ensure_comic_info(&path, &sample()).unwrap());
    }

    #[test]
    fn write_merges_existing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Ch.2.cbz");
        let original = ComicInfo {
            series: Some("Foo".to_string()),
            title: Some("The Return".to_string()),
            ..ComicInfo::default()
        };
        write_test_archive(&path, Some(&original));
        let web_only = ComicInfo {
            web: Some("https://example.com/chapter/2".to_string()),
            ..ComicInfo::default()
        };
        write_comic_info(&path, &web_only).unwrap();
        let info = read_comic_info(&path).unwrap().unwrap();
        assert_eq!(info.title.as_deref(), Some("The Return"));
        assert_eq!(info.web.as_deref(), Some("https://example.com/chapter/2"));
    }

    #[test]
    fn list_archives_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_test_archive(&dir.path().join("b.cbz"), None);
        write_test_archive(&dir.path().join("a.CBZ"), None);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let found = list_archives(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.CBZ", "b.cbz"]);
        assert!(list_archives(&dir.path().join("missing")).unwrap().is_empty());
    }
}
