mod cache_cmd;
mod config_cmd;
mod status_cmd;
mod watch_cmd;

pub use cache_cmd::CacheCommand;
pub use config_cmd::ConfigCommand;
pub use status_cmd::StatusCommand;
pub use watch_cmd::WatchCommand;
