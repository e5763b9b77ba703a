pub mod auth;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod media;
pub mod middleware;
pub mod schedule;
pub mod server;
pub mod staging;
pub mod state;
pub mod types;

#[cfg(test)]
pub mod testing;
