pub mod audio;
pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod session;
pub mod state;
pub mod touch;
pub mod ws;
