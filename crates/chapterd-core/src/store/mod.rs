//! Persistent state database (SQLite via sqlx).
//!
//! One file holds the download queue (`jobs`), the chapter history index
//! (`chapters`) and the follow list (`follows`). Every mutation is a single
//! statement so SQLite's own atomicity is the only concurrency guard needed.

mod chapters;
mod db;
mod error;
mod follows;
mod jobs;
mod types;

pub use chapters::ChapterRow;
pub use db::{unix_timestamp, StateDb};
pub use error::QueueError;
pub use follows::{FollowEntry, NewFollow};
pub use types::*;

#[cfg(test)]
pub(crate) use db::open_memory;
