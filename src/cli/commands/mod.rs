//! CLI command implementations.

mod ask;
mod config;
mod delete;
mod ingest;
mod list;
mod reprocess;
mod search;
mod serve;
mod status;

pub use ask::run_ask;
pub use config::run_config;
pub use delete::run_delete;
pub use ingest::run_ingest;
pub use list::run_list;
pub use reprocess::run_reprocess;
pub use search::run_search;
pub use serve::run_serve;
pub use status::run_status;
