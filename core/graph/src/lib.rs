pub mod alias;
pub mod apply;
pub mod config;
pub mod database;
pub mod error;
pub mod history;
pub mod merge;
pub mod store;
pub mod undo;

pub use alias::{create_edge_resolved, resolve_alias, resolve_edge_endpoints, NewEdge};
pub use apply::apply_merge;
pub use config::Config;
pub use database::Database;
pub use error::{MergeError, MergeResult};
pub use history::{get_merge, list_merges};
pub use merge::{preview_merge, MergeRequest};
pub use undo::undo_merge;
