//! Overdue query against a live PostgreSQL database

use chrono::{Duration, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use library_reminders::{
    repository::Repository,
    services::{loans::LoansService, reminders::OverdueQuery},
};

/// Connects to DATABASE_URL and applies the migrations
async fn setup() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

async fn insert_user(pool: &PgPool, email: &str) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO users (firstname, surname, email) VALUES ('Test', 'Reader', $1) RETURNING id",
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .expect("Failed to insert user")
}

/// Removes the users created under `tag`; their issues go with them
async fn cleanup(pool: &PgPool, tag: &str) {
    sqlx::query("DELETE FROM users WHERE email LIKE $1")
        .bind(format!("%-{}@x.com", tag))
        .execute(pool)
        .await
        .expect("Failed to clean up test rows");
}

async fn insert_issue(pool: &PgPool, user_id: Uuid, return_date: chrono::DateTime<Utc>) {
    sqlx::query("INSERT INTO issue (user_id, book_id, return_date) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(Uuid::new_v4())
        .bind(return_date)
        .execute(pool)
        .await
        .expect("Failed to insert issue");
}

#[tokio::test]
#[ignore] // Run with: DATABASE_URL=... cargo test -- --ignored
async fn test_overdue_recipients_respect_grace_window() {
    let pool = setup().await;
    let now = Utc::now();
    let tag = Uuid::new_v4().simple().to_string();

    let late = insert_user(&pool, &format!("late-{}@x.com", tag)).await;
    let soon = insert_user(&pool, &format!("soon-{}@x.com", tag)).await;
    let fine = insert_user(&pool, &format!("fine-{}@x.com", tag)).await;

    insert_issue(&pool, late, now - Duration::days(2)).await;
    insert_issue(&pool, soon, now + Duration::minutes(30)).await;
    insert_issue(&pool, fine, now + Duration::days(7)).await;

    let service = LoansService::new(Repository::new(pool.clone()), Duration::hours(1));
    let recipients = service.overdue_recipients(now).await.expect("query failed");

    assert!(recipients.contains(&format!("late-{}@x.com", tag)));
    assert!(recipients.contains(&format!("soon-{}@x.com", tag)));
    assert!(!recipients.contains(&format!("fine-{}@x.com", tag)));

    let strict = LoansService::new(Repository::new(pool.clone()), Duration::zero());
    let recipients = strict.overdue_recipients(now).await.expect("query failed");
    assert!(recipients.contains(&format!("late-{}@x.com", tag)));
    assert!(!recipients.contains(&format!("soon-{}@x.com", tag)));

    cleanup(&pool, &tag).await;
}

#[tokio::test]
#[ignore]
async fn test_count_matches_records() {
    let pool = setup().await;
    let repository = Repository::new(pool);
    // Well before anything the other tests insert around now
    let cutoff = Utc::now() - Duration::days(30);

    let records = repository.loans.find_overdue(cutoff).await.expect("query failed");
    let count = repository.loans.count_overdue(cutoff).await.expect("count failed");

    assert_eq!(records.len() as i64, count);
    assert!(records.iter().all(|r| r.return_date < cutoff));
}
