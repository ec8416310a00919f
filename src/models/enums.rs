//! Shared domain enums

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DeliveryMode
// ---------------------------------------------------------------------------

/// How a dispatch batch is turned into outgoing mail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One message per recipient
    #[default]
    PerRecipient,
    /// One message per batch, every recipient in Bcc
    Combined,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeliveryMode::PerRecipient => "per_recipient",
            DeliveryMode::Combined => "combined",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// BackpressurePolicy
// ---------------------------------------------------------------------------

/// What the scheduler does when the dispatch channel is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for the worker to free a slot, giving up if a stop is requested
    #[default]
    Wait,
    /// Drop the batch and log a warning
    Skip,
}

impl std::fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BackpressurePolicy::Wait => "wait",
            BackpressurePolicy::Skip => "skip",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// SchedulerState
// ---------------------------------------------------------------------------

/// Lifecycle of the reminder scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Stopped,
    Running,
}
