//! Fitclub - server-rendered gym management application.
//!
//! Membership sign-up, class scheduling, trainer/class/plan administration
//! and class booking on top of Postgres. Every page is the same shape:
//! validate the form, run a parameterized query, redirect with a flash
//! message.

#[macro_use]
extern crate log;

use std::sync::Arc;

use sqlx::PgPool;

pub mod admin;
pub mod auth;
pub mod booking;
pub mod config;
pub mod db;
pub mod error;
pub mod membership;
pub mod models;
pub mod pages;
pub mod session;
pub mod upload;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use session::SessionStore;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub sessions: SessionStore,
    pub config: Arc<Config>,
}
