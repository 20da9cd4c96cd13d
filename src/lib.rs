pub mod analysis;
pub mod commands;
pub mod config;
pub mod http_client;
pub mod market_api;
pub mod models;
pub mod report;
pub mod scheduler;
