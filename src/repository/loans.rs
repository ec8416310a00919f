//! Loans repository for the overdue lookups

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{error::AppResult, models::reminder::OverdueRecord};

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Issues whose return date is strictly before `cutoff`, with the borrower's address
    pub async fn find_overdue(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<OverdueRecord>> {
        let records = sqlx::query_as::<_, OverdueRecord>(
            r#"
            SELECT u.id AS user_id, u.email, i.id AS issue_id, i.return_date
            FROM issue i
            JOIN users u ON u.id = i.user_id
            WHERE i.return_date < $1
            ORDER BY i.return_date, u.email
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Count overdue issues
    pub async fn count_overdue(&self, cutoff: DateTime<Utc>) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issue WHERE return_date < $1")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
