//! pagewatch - sharded page-watching scheduler.
//!
//! Repeatedly scrapes the pages users subscribed to, extracts newly
//! published links with per-page templates, and records them back to
//! the user's document. Users are partitioned into shards; each shard
//! gets one full scrape-and-persist cycle before the next begins.

pub mod config;
pub mod extract;
pub mod identity;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod workers;
