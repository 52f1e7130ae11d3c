pub mod auth;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod server;
pub mod store;
pub mod validate;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::Store,
    /// Signing material for admin session tokens.
    pub sessions: auth::SessionKeys,
}

pub use error::{Error, Result};
pub use server::{read_secret_file, resolve_data_dir, router, run, AdminConfig, ServerConfig};
