// Rolegate Engine - Core module structure
pub mod admin;
pub mod api;
pub mod app;
pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod database;
pub mod models;
pub mod observability;
pub mod rbac;
pub mod repository;
pub mod seed;

pub use app::App;
pub use config::Config;
pub use database::Database;
