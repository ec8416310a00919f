//! Business logic services

pub mod email;
pub mod loans;
pub mod reminders;

use crate::{
    config::{EmailConfig, ReminderConfig},
    error::AppResult,
    repository::Repository,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub loans: loans::LoansService,
    pub email: email::EmailService,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(
        repository: Repository,
        email_config: &EmailConfig,
        reminder_config: &ReminderConfig,
    ) -> AppResult<Self> {
        Ok(Self {
            loans: loans::LoansService::new(repository, reminder_config.grace_window()),
            email: email::EmailService::new(
                email_config,
                email::ReminderTemplate::from(reminder_config),
                reminder_config.send_timeout(),
            )?,
        })
    }
}
