//! Overdue loan records and dispatch batches

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// One overdue issue joined with its borrower's address
#[derive(Debug, Clone, FromRow)]
pub struct OverdueRecord {
    pub user_id: Uuid,
    pub email: String,
    pub issue_id: Uuid,
    pub return_date: DateTime<Utc>,
}

/// Recipients produced by a single poll cycle, handed to the worker as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchBatch {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub recipients: Vec<String>,
}

impl DispatchBatch {
    /// Build a batch from raw query output.
    ///
    /// Addresses are trimmed, blanks dropped and duplicates removed (first
    /// occurrence wins). Returns `None` when nothing is left, so an empty
    /// batch can never be posted.
    pub fn from_recipients<I, S>(recipients: I, created_at: DateTime<Utc>) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for recipient in recipients {
            let recipient = recipient.as_ref().trim();
            if recipient.is_empty() || unique.iter().any(|r| r == recipient) {
                continue;
            }
            unique.push(recipient.to_string());
        }

        if unique.is_empty() {
            return None;
        }

        Some(Self {
            id: Uuid::new_v4(),
            created_at,
            recipients: unique,
        })
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

/// Outcome of processing one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub delivered: usize,
    pub failed: usize,
}
