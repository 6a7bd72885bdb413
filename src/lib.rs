pub mod config;
pub mod export;
pub mod probe;
pub mod server;
pub mod state;
pub mod trace;
