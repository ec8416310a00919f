//! Library return reminders
//!
//! Background job of the library backend: polls the loan store for overdue
//! issues and e-mails the borrowers a reminder to bring their books back.

pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
