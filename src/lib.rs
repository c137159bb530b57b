pub mod logging;
pub mod paths;
pub mod state;
pub mod settings;

pub mod app;
pub mod db;
pub mod oplog;
pub mod remote;
