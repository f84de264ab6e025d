pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod email;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod notifications;
pub mod records;
pub mod registry;
pub mod server;
pub mod state;
pub mod sync;
pub mod webhooks;

pub use server::app;
pub use state::AppState;
