pub mod config_cmd;
pub mod page;
pub mod resolve_cmd;
pub mod snapshot_cmd;
pub mod tools_cmd;
