//! `chapterd follow add|remove|list`.

use anyhow::Result;
use chapterd_core::config::ChapterdConfig;
use chapterd_core::queue::DownloadQueue;
use chapterd_core::store::StateDb;

use crate::cli::FollowCommand;

pub async fn run_follow(db: &StateDb, cfg: &ChapterdConfig, command: FollowCommand) -> Result<()> {
    let queue = DownloadQueue::new(db.clone(), cfg);
    match command {
        FollowCommand::Add {
            url,
            title,
            library,
            language,
        } => {
            let f = queue
                .follow(&url, title.as_deref(), library.as_deref(), language.as_deref())
                .await?;
            println!("Following {} ({}) at {}", f.title, f.language, f.source_url);
        }
        FollowCommand::Remove { url } => {
            if !queue.unfollow(&url).await? {
                anyhow::bail!("not following {url}");
            }
            println!("Stopped following {url}");
        }
        FollowCommand::List => {
            let follows = queue.follows().await?;
            if follows.is_empty() {
                println!("Not following any titles.");
                return Ok(());
            }
            println!("{:<4} {:<4} {:<8} {:<30} {}", "ID", "LANG", "REMOTE", "TITLE", "URL");
            for f in follows {
                let remote = f
                    .last_remote_count
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<4} {:<4} {:<8} {:<30} {}",
                    f.id, f.language, remote, f.title, f.source_url
                );
                if let Some(err) = f.last_error {
                    println!("     last check failed: {err}");
                }
            }
        }
    }
    Ok(())
}
