//! Cached queries over a social-graph API, with watchlist association.
//!
//! Every read goes through a persistent page cache with caller-controlled
//! freshness. Paginated collections are walked lazily and can be resumed
//! after a failure. Association helpers relate fetched data to a watchlist
//! of accounts, imported lists and keywords. Notes and tags can be kept on
//! accounts and their posts.
//!
//! ```no_run
//! # async fn run() -> color_eyre::Result<()> {
//! use birdwatch::{Config, FetchOptions, Session};
//!
//! let config = Config::load(None)?;
//! let _guard = birdwatch::telemetry::init_logging(&config.log)?;
//! let session = Session::open(&config)?;
//!
//! if let Some(user) = session.user_by_name("@example").await? {
//!   let friends = user.get_friends(FetchOptions::default()).await?;
//!   println!("{} follows {} accounts", user.id, friends.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod annotation;
pub mod association;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod model;
pub mod pagination;
pub mod resolve;
pub mod session;
pub mod telemetry;
pub mod user;
pub mod watchlist;

#[cfg(test)]
mod testing;

pub use annotation::{AnnotationStore, Note, PostKind, Tag};
pub use association::RecordFilter;
pub use cache::CacheStore;
pub use config::Config;
pub use error::{Error, FetchFailure, Result};
pub use model::{Cursor, ListInfo, MaxAge, QueryKey, QueryKind, Record, UserId, UserProfile};
pub use pagination::Pages;
pub use session::Session;
pub use user::{FetchOptions, User};
pub use watchlist::{Sublist, Watchlist, WatchlistStore};
