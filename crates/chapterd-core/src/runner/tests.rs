use super::*;
use std::sync::Arc;
use std::time::Instant;

fn sh_tool(script: &str) -> ToolConfig {
    ToolConfig {
        program: "/bin/sh".to_string(),
        args: vec![
            "-c".to_string(),
            script.to_string(),
            "tool".to_string(),
            "{url}".to_string(),
            "{dest}".to_string(),
        ],
    }
}

fn invocation(job_id: JobId, dest: &Path) -> ToolInvocation {
    ToolInvocation {
        job_id,
        url: "https://mangadex.org/chapter/abc".to_string(),
        dest: dest.to_path_buf(),
        language: "en".to_string(),
    }
}

#[tokio::test]
async fn success_streams_events_and_reports_archive() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ProcessRunner::new(
        sh_tool(
            r#"echo '{"event":"progress","percent":50}'
               echo 'plain log line'
               touch "$2/Ch.1.cbz"
               echo '{"event":"done","file":"Ch.1.cbz"}'"#,
        ),
        2000,
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = runner.start(&invocation(1, dir.path()), tx).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Success {
            archive: Some(dir.path().join("Ch.1.cbz"))
        }
    );
    assert_eq!(rx.recv().await, Some(ToolEvent::Progress { percent: 50.0 }));
    assert!(matches!(rx.recv().await, Some(ToolEvent::Done { .. })));
    assert!(!runner.is_running(1));
}

#[tokio::test]
async fn success_without_done_event_finds_new_archive() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ProcessRunner::new(sh_tool(r#"touch "$2/Ch.7.cbz""#), 2000);
    let (tx, _rx) = mpsc::unbounded_channel();
    let outcome = runner.start(&invocation(1, dir.path()), tx).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Success {
            archive: Some(dir.path().join("Ch.7.cbz"))
        }
    );
}

#[tokio::test]
async fn nonzero_exit_keeps_stderr_tail() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ProcessRunner::new(
        sh_tool("echo 'first line of noise' >&2; echo 'rate limited by remote' >&2; exit 3"),
        22,
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    match runner.start(&invocation(1, dir.path()), tx).await.unwrap() {
        RunOutcome::Failed { code, stderr } => {
            assert_eq!(code, Some(3));
            assert_eq!(stderr, "rate limited by remote");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn missing_program_is_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let tool = ToolConfig {
        program: "/nonexistent/chapterd-tool".to_string(),
        args: vec![],
    };
    let runner = ProcessRunner::new(tool, 100);
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = runner.start(&invocation(1, dir.path()), tx).await.unwrap_err();
    assert!(matches!(err, RunnerError::Spawn { .. }));
    assert!(!runner.is_running(1));
}

#[tokio::test]
async fn kill_terminates_hung_tool_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ProcessRunner::new(sh_tool("sleep 30"), 100));
    let (tx, _rx) = mpsc::unbounded_channel();

    let r = Arc::clone(&runner);
    let inv = invocation(9, dir.path());
    let handle = tokio::spawn(async move { r.start(&inv, tx).await });

    for _ in 0..100 {
        if runner.is_running(9) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    let t0 = Instant::now();
    assert!(runner.cancel(9));
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runner returned after kill")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Killed);
    assert!(t0.elapsed() < Duration::from_secs(5));
    assert!(!runner.is_running(9));
    assert!(!runner.kill(9));
}

#[tokio::test]
async fn second_start_for_same_job_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ProcessRunner::new(sh_tool("sleep 30"), 100));
    let (tx, _rx) = mpsc::unbounded_channel();
    let r = Arc::clone(&runner);
    let inv = invocation(4, dir.path());
    let tx2 = tx.clone();
    let handle = tokio::spawn(async move { r.start(&inv, tx).await });
    for _ in 0..100 {
        if runner.is_running(4) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let err = runner
        .start(&invocation(4, dir.path()), tx2)
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::AlreadyRunning(4)));

    assert_eq!(runner.kill_all(), 1);
    assert_eq!(handle.await.unwrap().unwrap(), RunOutcome::Killed);
}

#[tokio::test]
async fn cancel_that_found_no_live_process_still_stops_the_start() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("spawned");
    let runner = ProcessRunner::new(sh_tool(r#"touch "$2/spawned"; sleep 30"#), 100);
    let (tx, _rx) = mpsc::unbounded_channel();

    // The cancel ran first: flag set, nothing live to kill yet.
    let cancelled = AtomicBool::new(true);
    assert!(!runner.cancel(5));
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        runner.start_with_cancel(&invocation(5, dir.path()), tx, &cancelled),
    )
    .await
    .expect("start returned without spawning")
    .unwrap();
    assert_eq!(outcome, RunOutcome::Killed);
    assert!(!marker.exists());
    assert!(!runner.is_running(5));
}

#[test]
fn truncate_tail_respects_char_boundaries() {
    assert_eq!(truncate_tail("short", 10), "short");
    assert_eq!(truncate_tail("abcdef", 3), "def");
    assert_eq!(truncate_tail("xxé", 1), "");
    assert_eq!(truncate_tail("  padded  ", 20), "padded");
}
