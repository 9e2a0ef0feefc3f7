//! Follow list → checker → queue → engine → history, and back to up to date.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chapterd_core::checker::{ChapterChecker, FOLLOW_PRIORITY};
use chapterd_core::history::ChapterHistory;
use chapterd_core::store::{JobFilter, JobStatus, NewFollow};
use common::{chapter, run_one, FakeRemote, Fixture};

const FOO: &str = "https://mangadex.org/title/foo/foo";

#[tokio::test]
async fn new_remote_chapters_are_queued_downloaded_then_settled() {
    let fx = Fixture::new();
    let db = fx.db().await;
    db.add_follow(&NewFollow {
        source_url: FOO.to_string(),
        title: "Foo".to_string(),
        language: "en".to_string(),
        library: String::new(),
    })
    .await
    .unwrap();

    let remote = Arc::new(FakeRemote::default());
    remote.set(FOO, vec![chapter("c1", "1", None), chapter("c2", "2", None)]);
    let checker = ChapterChecker::new(db.clone(), Arc::clone(&remote) as _, fx.config());
    let engine = fx.engine(&db, Arc::clone(&remote));

    let summary = checker.check_and_queue_new_chapters().await.unwrap();
    assert_eq!(summary.enqueued, 1);
    let jobs = db.list_jobs(&JobFilter::default()).await.unwrap();
    assert_eq!(jobs[0].priority, FOLLOW_PRIORITY);

    run_one(&engine).await;
    let history = ChapterHistory::new(db.clone());
    assert_eq!(history.count_for_title("", "Foo", "en").await.unwrap(), 2);

    // Nothing new remotely: no second job.
    let summary = checker.check_and_queue_new_chapters().await.unwrap();
    assert_eq!(summary.up_to_date, 1);
    assert_eq!(db.list_jobs(&JobFilter::default()).await.unwrap().len(), 1);

    // A new chapter appears: a new job downloads only that chapter. Job and
    // follow timestamps have one-second resolution.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    remote.set(
        FOO,
        vec![
            chapter("c1", "1", None),
            chapter("c2", "2", None),
            chapter("c3", "3", None),
        ],
    );
    let summary = checker.check_and_queue_new_chapters().await.unwrap();
    assert_eq!(summary.enqueued, 1);
    run_one(&engine).await;

    assert_eq!(
        fx.tool_log(),
        vec![
            "https://mangadex.org/chapter/c1",
            "https://mangadex.org/chapter/c2",
            "https://mangadex.org/chapter/c3"
        ]
    );
    let jobs = db
        .list_jobs(&JobFilter {
            status: Some(JobStatus::Completed),
            library: None,
        })
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(history.count_for_title("", "Foo", "en").await.unwrap(), 3);
}
