pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod permissions;
pub mod realtime;
pub mod services;
pub mod state;
pub mod types;
pub mod validation;

pub use app::app;
pub use state::AppState;
