use super::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::history::archive::write_test_archive;
use crate::history::{comic_info_for, ChapterKey, ChapterRecord};
use crate::remote::{RemoteChapter, RemoteError};
use crate::store::{open_memory, JobFilter, NewFollow};

/// Remote whose aggregate counts come from a map; unknown URLs return 404.
#[derive(Default)]
struct FakeRemote {
    counts: HashMap<String, i64>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl FakeRemote {
    fn with(counts: &[(&str, i64)]) -> Self {
        Self {
            counts: counts.iter().map(|(u, c)| (u.to_string(), *c)).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn aggregate_count(&self, source_url: &str, _language: &str) -> Result<i64, RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counts
            .get(source_url)
            .copied()
            .ok_or_else(|| RemoteError::Http {
                status: 404,
                url: source_url.to_string(),
            })
    }

    async fn list_chapters(
        &self,
        _source_url: &str,
        _language: &str,
    ) -> Result<Vec<RemoteChapter>, RemoteError> {
        Ok(Vec::new())
    }
}

fn config(library_dir: &std::path::Path) -> Arc<ChapterdConfig> {
    Arc::new(ChapterdConfig {
        library_dir: library_dir.to_path_buf(),
        check_concurrency: 2,
        ..ChapterdConfig::default()
    })
}

async fn follow(db: &StateDb, url: &str, title: &str) -> FollowEntry {
    db.add_follow(&NewFollow {
        source_url: url.to_string(),
        title: title.to_string(),
        language: "en".to_string(),
        library: "Manga".to_string(),
    })
    .await
    .unwrap()
}

fn chapter(title: &str, n: u32) -> ChapterRecord {
    ChapterRecord {
        key: ChapterKey::new("Manga", title, &n.to_string(), "en", None),
        job_id: None,
        chapter_url: format!("https://mangadex.org/chapter/{title}-{n}"),
        volume: None,
        filename: format!("Ch.{n}.cbz"),
        completed_at: 1,
    }
}

#[tokio::test]
async fn title_with_all_chapters_is_up_to_date() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_memory().await.unwrap();
    let history = ChapterHistory::new(db.clone());
    follow(&db, "https://mangadex.org/title/foo", "Foo").await;
    for n in 1..=10 {
        history.record(&chapter("Foo", n)).await.unwrap();
    }

    let remote = Arc::new(FakeRemote::with(&[("https://mangadex.org/title/foo", 10)]));
    let checker = ChapterChecker::new(db.clone(), remote, config(dir.path()));
    let summary = checker.check_and_queue_new_chapters().await.unwrap();

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.up_to_date, 1);
    assert_eq!(summary.enqueued, 0);
    assert!(db.list_jobs(&JobFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn rerun_with_unchanged_count_creates_no_new_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_memory().await.unwrap();
    follow(&db, "https://mangadex.org/title/foo", "Foo").await;
    let remote = Arc::new(FakeRemote::with(&[("https://mangadex.org/title/foo", 3)]));
    let checker = ChapterChecker::new(db.clone(), remote, config(dir.path()));

    let first = checker.check_and_queue_new_chapters().await.unwrap();
    assert_eq!(first.enqueued, 1);
    let jobs = db.list_jobs(&JobFilter::default()).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].origin, JobOrigin::Follow);
    assert_eq!(jobs[0].priority, FOLLOW_PRIORITY);

    let second = checker.check_and_queue_new_chapters().await.unwrap();
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.already_queued, 1);

    // Still nothing new after that job completes.
    db.claim_pending(jobs[0].id).await.unwrap();
    db.mark_completed(jobs[0].id).await.unwrap();
    let third = checker.check_and_queue_new_chapters().await.unwrap();
    assert_eq!(third.enqueued, 0);
    assert_eq!(db.list_jobs(&JobFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn one_failing_title_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_memory().await.unwrap();
    follow(&db, "https://mangadex.org/title/foo", "Foo").await;
    follow(&db, "https://mangadex.org/title/removed", "Removed").await;
    follow(&db, "https://mangadex.org/title/bar", "Bar").await;
    let remote = Arc::new(FakeRemote::with(&[
        ("https://mangadex.org/title/foo", 2),
        ("https://mangadex.org/title/bar", 0),
    ]));
    let checker = ChapterChecker::new(db.clone(), remote, config(dir.path()));
    let summary = checker.check_and_queue_new_chapters().await.unwrap();

    assert_eq!(summary.checked, 3);
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.up_to_date, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].title, "Removed");
    assert!(summary.errors[0].error.contains("404"));

    let follows = db.list_follows().await.unwrap();
    let removed = follows.iter().find(|f| f.title == "Removed").unwrap();
    assert!(removed.last_error.as_deref().unwrap().contains("404"));
    let foo = follows.iter().find(|f| f.title == "Foo").unwrap();
    assert_eq!(foo.last_remote_count, Some(2));
    assert!(foo.last_error.is_none());
}

#[tokio::test]
async fn archives_missing_from_index_are_repaired_before_enqueue() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_memory().await.unwrap();
    let cfg = config(dir.path());
    follow(&db, "https://mangadex.org/title/foo", "Foo").await;

    let title_dir = cfg.title_dir("Manga", "Foo");
    std::fs::create_dir_all(&title_dir).unwrap();
    for n in 1..=2 {
        let c = chapter("Foo", n);
        write_test_archive(&title_dir.join(&c.filename), Some(&comic_info_for(&c)));
    }

    let remote = Arc::new(FakeRemote::with(&[("https://mangadex.org/title/foo", 2)]));
    let checker = ChapterChecker::new(db.clone(), remote, cfg);
    let summary = checker.check_and_queue_new_chapters().await.unwrap();
    assert_eq!(summary.up_to_date, 1);
    assert!(db.list_jobs(&JobFilter::default()).await.unwrap().is_empty());
    let history = ChapterHistory::new(db);
    assert_eq!(history.count_for_title("Manga", "Foo", "en").await.unwrap(), 2);
}

#[tokio::test]
async fn checks_run_with_bounded_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_memory().await.unwrap();
    let mut counts = Vec::new();
    for i in 0..6 {
        let url = format!("https://mangadex.org/title/t{i}");
        follow(&db, &url, &format!("T{i}")).await;
        counts.push(url);
    }
    let mut remote = FakeRemote::with(
        &counts.iter().map(|u| (u.as_str(), 0)).collect::<Vec<_>>(),
    );
    remote.delay = Duration::from_millis(30);
    let remote = Arc::new(remote);
    let checker = ChapterChecker::new(db, Arc::clone(&remote) as Arc<dyn RemoteApi>, config(dir.path()));

    let summary = checker.check_and_queue_new_chapters().await.unwrap();
    assert_eq!(summary.checked, 6);
    assert_eq!(summary.up_to_date, 6);
    let max = remote.max_in_flight.load(Ordering::SeqCst);
    assert!(max >= 1 && max <= 2, "max in flight {max}");
}
