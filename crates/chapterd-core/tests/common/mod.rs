//! Shared fixtures: a scripted download tool, an in-memory remote and configs.

#![allow(dead_code)]

pub mod api_server;

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chapterd_core::config::{ChapterdConfig, RateLimitConfig, ToolConfig};
use chapterd_core::engine::Engine;
use chapterd_core::rate_limit::RateLimiter;
use chapterd_core::remote::{RemoteApi, RemoteChapter, RemoteError};
use chapterd_core::store::{JobStatus, StateDb};

/// Title URL → chapters. Aggregate counts are distinct numbers in the listing.
#[derive(Default)]
pub struct FakeRemote {
    titles: Mutex<HashMap<String, Vec<RemoteChapter>>>,
}

impl FakeRemote {
    pub fn set(&self, source_url: &str, chapters: Vec<RemoteChapter>) {
        self.titles
            .lock()
            .unwrap()
            .insert(source_url.to_string(), chapters);
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn aggregate_count(&self, source_url: &str, _language: &str) -> Result<i64, RemoteError> {
        let chapters = self.list_chapters(source_url, "en").await?;
        let mut numbers: Vec<_> = chapters.iter().map(|c| c.number.clone()).collect();
        numbers.sort();
        numbers.dedup();
        Ok(numbers.len() as i64)
    }

    async fn list_chapters(
        &self,
        source_url: &str,
        _language: &str,
    ) -> Result<Vec<RemoteChapter>, RemoteError> {
        self.titles
            .lock()
            .unwrap()
            .get(source_url)
            .cloned()
            .ok_or_else(|| RemoteError::Http {
                status: 404,
                url: source_url.to_string(),
            })
    }
}

/// Chapter whose id drives the fake tool: `fail-*` exits 2, `hang-*` sleeps.
pub fn chapter(id: &str, number: &str, group: Option<&str>) -> RemoteChapter {
    RemoteChapter {
        id: id.to_string(),
        number: Some(number.to_string()),
        volume: None,
        language: "en".to_string(),
        title: None,
        group: group.map(str::to_string),
        url: format!("https://mangadex.org/chapter/{id}"),
    }
}

/// Workspace for one test: library dir, tool log, template archive.
pub struct Fixture {
    pub root: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("lib")).unwrap();
        write_template(&root.path().join("template.cbz"));
        Self { root }
    }

    pub fn library_dir(&self) -> PathBuf {
        self.root.path().join("lib")
    }

    /// URLs the tool was invoked with, in order.
    pub fn tool_log(&self) -> Vec<String> {
        std::fs::read_to_string(self.root.path().join("tool.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Pid of the last `hang-*` tool run, once it has started.
    pub fn hung_pid(&self) -> Option<i32> {
        std::fs::read_to_string(self.root.path().join("hang.pid"))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    pub fn tool(&self) -> ToolConfig {
        let root = self.root.path().display();
        let script = format!(
            r#"id="${{1##*/}}"
echo "$1" >> "{root}/tool.log"
case "$id" in
  fail-*) echo "remote refused chapter $id" >&2; exit 2 ;;
  hang-*) echo $$ > "{root}/hang.pid"; sleep 30; exit 0 ;;
esac
echo '{{"event":"progress","percent":50}}'
cp "{root}/template.cbz" "$2/$id.cbz"
echo "{{\"event\":\"done\",\"file\":\"$id.cbz\"}}"
"#
        );
        sh_tool(script)
    }

    /// A tool that names every archive `name`, whatever the chapter.
    pub fn fixed_name_tool(&self, name: &str) -> ToolConfig {
        let root = self.root.path().display();
        sh_tool(format!(
            r#"echo "$1" >> "{root}/tool.log"
cp "{root}/template.cbz" "$2/{name}"
echo '{{"event":"done","file":"{name}"}}'
"#
        ))
    }

    pub fn config(&self) -> Arc<ChapterdConfig> {
        Arc::new(ChapterdConfig {
            library_dir: self.library_dir(),
            language: "en".to_string(),
            max_retries: 3,
            retry_base_interval_secs: 0,
            tick_interval_secs: 1,
            stderr_limit: 2000,
            rate_limit: RateLimitConfig {
                requests_per_sec: 1000.0,
                burst: 100,
            },
            tool: self.tool(),
            ..ChapterdConfig::default()
        })
    }

    pub async fn db(&self) -> StateDb {
        StateDb::open_at(self.root.path().join("state.db"))
            .await
            .unwrap()
    }

    pub fn engine(&self, db: &StateDb, remote: Arc<FakeRemote>) -> Engine {
        self.engine_with(db, remote, self.config())
    }

    pub fn engine_with(
        &self,
        db: &StateDb,
        remote: Arc<FakeRemote>,
        cfg: Arc<ChapterdConfig>,
    ) -> Engine {
        let limiter = RateLimiter::from_config(&cfg.rate_limit);
        Engine::new(db.clone(), remote, limiter, cfg)
    }
}

fn sh_tool(script: String) -> ToolConfig {
    ToolConfig {
        program: "/bin/sh".to_string(),
        args: vec![
            "-c".to_string(),
            script,
            "tool".to_string(),
            "{url}".to_string(),
            "{dest}".to_string(),
        ],
    }
}

fn write_template(path: &Path) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    zip.start_file("001.jpg", options).unwrap();
    zip.write_all(b"\xFF\xD8page").unwrap();
    zip.finish().unwrap();
}

/// Ticks until a job starts, then waits for the engine to go idle.
pub async fn run_one(engine: &Engine) -> Option<i64> {
    let started = engine.tick().await.unwrap();
    assert!(engine.wait_idle(Duration::from_secs(10)).await, "job did not finish");
    started
}

pub async fn wait_for_status(db: &StateDb, id: i64, status: JobStatus) {
    for _ in 0..500 {
        if db.get_job(id).await.unwrap().map(|j| j.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {status}");
}
