//! Overdue loan lookups

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{
    error::AppResult,
    models::reminder::OverdueRecord,
    repository::Repository,
    services::reminders::OverdueQuery,
};

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    grace_window: Duration,
}

impl LoansService {
    pub fn new(repository: Repository, grace_window: Duration) -> Self {
        Self {
            repository,
            grace_window,
        }
    }

    /// Loans counted as overdue at `now`, i.e. due before `now + grace_window`
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.grace_window
    }

    pub async fn find_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<OverdueRecord>> {
        self.repository.loans.find_overdue(self.cutoff(now)).await
    }

    /// Count overdue loans
    pub async fn count_overdue(&self, now: DateTime<Utc>) -> AppResult<i64> {
        self.repository.loans.count_overdue(self.cutoff(now)).await
    }
}

#[async_trait]
impl OverdueQuery for LoansService {
    async fn overdue_recipients(&self, now: DateTime<Utc>) -> AppResult<Vec<String>> {
        let records = self.find_overdue(now).await?;
        tracing::debug!(loans = records.len(), "Fetched overdue loans");
        Ok(records.into_iter().map(|r| r.email).collect())
    }
}
