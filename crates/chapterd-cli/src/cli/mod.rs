//! CLI for the chapterd download queue.

mod commands;
mod control_socket;

use anyhow::Result;
use chapterd_core::config;
use chapterd_core::store::{JobStatus, StateDb};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use commands::{
    run_add, run_cancel, run_check, run_clear, run_completions, run_daemon, run_delete,
    run_follow, run_list, run_man, run_retry,
};

/// Top-level CLI for chapterd.
#[derive(Debug, Parser)]
#[command(name = "chapterd")]
#[command(about = "chapterd: manga chapter download queue and follow checker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a title for download.
    Add {
        /// Title URL (https://mangadex.org/title/<id>/...).
        url: String,
        /// Title used for the destination directory (default: derived from the URL).
        #[arg(long)]
        title: Option<String>,
        /// Library subdirectory under library_dir.
        #[arg(long)]
        library: Option<String>,
        /// Chapter language (default: from config).
        #[arg(long)]
        language: Option<String>,
        /// Lower runs sooner.
        #[arg(long, value_name = "N")]
        priority: Option<i64>,
        /// Automatic retry ceiling for this job.
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,
    },

    /// List jobs in queue order.
    List {
        /// Only jobs with this status.
        #[arg(long)]
        status: Option<JobStatus>,
        /// Only jobs in this library.
        #[arg(long)]
        library: Option<String>,
    },

    /// Cancel a job. A running job's download tool is killed.
    Cancel {
        /// Job identifier.
        id: i64,
    },

    /// Delete a job record, killing its download tool if it is running.
    Delete {
        /// Job identifier.
        id: i64,
    },

    /// Put a failed job back in the queue with its retry counter reset.
    Retry {
        /// Job identifier.
        id: i64,
    },

    /// Delete every job with the given status.
    Clear {
        #[arg(long)]
        status: JobStatus,
    },

    /// Check followed titles for new chapters now.
    Check,

    /// Manage followed titles.
    Follow {
        #[command(subcommand)]
        command: FollowCommand,
    },

    /// Run the daemon: execution engine, follow scheduler and control socket.
    Run,

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },

    /// Print the man page to stdout.
    Man,
}

#[derive(Debug, Subcommand)]
pub enum FollowCommand {
    /// Follow a title.
    Add {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        library: Option<String>,
        #[arg(long)]
        language: Option<String>,
    },
    /// Stop following a title.
    Remove { url: String },
    /// List followed titles and what the last check saw.
    List,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        // No config or database needed.
        match cli.command {
            CliCommand::Completions { shell } => return run_completions(shell),
            CliCommand::Man => return run_man(),
            _ => {}
        }

        let cfg = Arc::new(config::load_or_init()?);
        tracing::debug!("loaded config: {:?}", cfg);
        let db = StateDb::open_default().await?;

        match cli.command {
            CliCommand::Add {
                url,
                title,
                library,
                language,
                priority,
                max_retries,
            } => {
                let req = chapterd_core::queue::EnqueueRequest {
                    source_url: url,
                    title,
                    library,
                    language,
                    priority,
                    max_retries,
                };
                run_add(&db, &cfg, &req).await?
            }
            CliCommand::List { status, library } => run_list(&db, &cfg, status, library).await?,
            CliCommand::Cancel { id } => run_cancel(&db, &cfg, id).await?,
            CliCommand::Delete { id } => run_delete(&db, &cfg, id).await?,
            CliCommand::Retry { id } => run_retry(&db, &cfg, id).await?,
            CliCommand::Clear { status } => run_clear(&db, &cfg, status).await?,
            CliCommand::Check => run_check(&db, cfg).await?,
            CliCommand::Follow { command } => run_follow(&db, &cfg, command).await?,
            CliCommand::Run => run_daemon(&db, cfg).await?,
            CliCommand::Completions { .. } | CliCommand::Man => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
