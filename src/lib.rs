pub mod cli;
pub mod config;
pub mod crisis;
pub mod movement;
pub mod persistence;
pub mod server;
pub mod store;
