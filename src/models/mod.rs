//! Data models for pagewatch.

mod template;
mod user;

pub use template::{FieldRule, Selectors, Template};
pub use user::{assign_shard, now_ms, Filters, Link, User, UserPage};
