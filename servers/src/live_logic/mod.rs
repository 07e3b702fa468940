pub mod config;
pub mod feeds;
