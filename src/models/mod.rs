//! Data models for the reminder job

pub mod enums;
pub mod reminder;

// Re-export commonly used types
pub use enums::{BackpressurePolicy, DeliveryMode, SchedulerState};
pub use reminder::{BatchReport, DispatchBatch, OverdueRecord};
