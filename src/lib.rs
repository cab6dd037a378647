pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod mail;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod types;
pub mod uploads;
