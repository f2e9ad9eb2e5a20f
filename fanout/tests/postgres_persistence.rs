//! Integration tests for the Postgres work source and step journal.
//!
//! Requires a running Postgres instance reachable through `DATABASE_URL`.
//! Run with: `cargo test --test postgres_persistence --features postgres -- --ignored`

#![cfg(feature = "postgres")]

use std::sync::Arc;

use fanout::persistence::{PostgresStepJournal, PostgresWorkSource};
use fanout::*;
use fanout_testkit::{fast_config, scheduler, RecordingEventBus};
use sqlx::PgPool;
use uuid::Uuid;

async fn pool() -> PgPool {
    PgPool::connect(&std::env::var("DATABASE_URL").expect("DATABASE_URL required"))
        .await
        .expect("connect")
}

/// Fresh work item table named after the test run.
async fn seed_table(pool: &PgPool, active: usize, paused: usize) -> String {
    let table = format!("fanout_items_{}", Uuid::new_v4().simple());
    sqlx::query(&format!(
        "CREATE TABLE {table} (id TEXT PRIMARY KEY, group_id TEXT, status TEXT NOT NULL)"
    ))
    .execute(pool)
    .await
    .expect("create table");

    for i in 0..active + paused {
        let status = if i < active { "active" } else { "paused" };
        sqlx::query(&format!(
            "INSERT INTO {table} (id, group_id, status) VALUES ($1, $2, $3)"
        ))
        .bind(format!("item-{i:06}"))
        .bind(format!("group-{}", i % 3))
        .bind(status)
        .execute(pool)
        .await
        .expect("insert item");
    }
    table
}

async fn drop_table(pool: &PgPool, table: &str) {
    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(pool)
        .await
        .expect("drop table");
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn test_work_source_pages_active_items() {
    let pool = pool().await;
    let table = seed_table(&pool, 25, 5).await;
    let source = PostgresWorkSource::new(pool.clone())
        .with_table(table.as_str())
        .expect("valid table name");

    let first = source
        .fetch_page(&Selection::active(), PageCursor::start(), 10)
        .await
        .expect("first page");
    assert_eq!(first.len(), 10);
    assert!(first.has_more);

    let last = source
        .fetch_page(&Selection::active(), PageCursor(20), 10)
        .await
        .expect("last page");
    assert_eq!(last.len(), 5);
    assert!(!last.has_more);

    drop_table(&pool, &table).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn test_journal_first_writer_wins() {
    let pool = pool().await;
    let journal = PostgresStepJournal::new(pool);
    journal.ensure_schema().await.expect("schema");
    let invocation = InvocationId::new();

    journal
        .record(&invocation, "load-active-items", serde_json::json!([1, 2]))
        .await
        .expect("record");
    journal
        .record(&invocation, "load-active-items", serde_json::json!([3]))
        .await
        .expect("second record");

    let loaded = journal
        .load(&invocation, "load-active-items")
        .await
        .expect("load");
    assert_eq!(loaded, Some(serde_json::json!([1, 2])));
    assert!(journal.load(&invocation, "send-chunk-1").await.unwrap().is_none());

    assert_eq!(journal.forget(&invocation).await.expect("forget"), 1);
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn test_invocation_resumes_from_postgres_journal() {
    let pool = pool().await;
    let table = seed_table(&pool, 25, 0).await;
    let journal = PostgresStepJournal::new(pool.clone());
    journal.ensure_schema().await.expect("schema");
    let source = PostgresWorkSource::new(pool.clone())
        .with_table(table.as_str())
        .expect("valid table name");

    let bus = RecordingEventBus::new();
    bus.fail_call(2, None);
    let scheduler = scheduler(
        fast_config(10, 10),
        Arc::new(source),
        Arc::new(bus.clone()),
        Arc::new(journal.clone()),
    );
    let invocation = InvocationId::new();

    assert!(scheduler.invoke(&invocation).await.is_err());
    bus.heal();
    let result = scheduler.invoke(&invocation).await.expect("resumed");

    assert_eq!(result.scheduled_count, Some(25));
    assert_eq!(bus.call_sizes(), vec![10, 10, 5]);

    journal.forget(&invocation).await.expect("forget");
    drop_table(&pool, &table).await;
}

#[tokio::test]
async fn test_rejects_unsafe_table_name() {
    // Pool construction is lazy, so no database is needed here.
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/fanout")
        .expect("lazy pool");
    assert!(PostgresWorkSource::new(pool)
        .with_table("items; DROP TABLE users")
        .is_err());
}
