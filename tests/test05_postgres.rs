#![cfg(feature = "postgres")]

//! Runs only when `DBPOOL_TEST_PG_HOST` points at a reachable server. Optional:
//! `DBPOOL_TEST_PG_PORT`, `DBPOOL_TEST_PG_USER`, `DBPOOL_TEST_PG_PASSWORD`, `DBPOOL_TEST_PG_DB`.

use std::env;
use std::sync::Arc;

use dbpool_middleware::prelude::*;

fn target_from_env() -> Option<ConnectionTarget> {
    let host = env::var("DBPOOL_TEST_PG_HOST").ok()?;
    let port = env::var("DBPOOL_TEST_PG_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5432);
    let user = env::var("DBPOOL_TEST_PG_USER").unwrap_or_else(|_| "postgres".into());
    let password = env::var("DBPOOL_TEST_PG_PASSWORD").unwrap_or_default();
    let database = env::var("DBPOOL_TEST_PG_DB").unwrap_or_else(|_| "postgres".into());
    Some(
        ConnectionTarget::postgres(host, database)
            .with_port(port)
            .with_credentials(user, password)
            .with_pool_size(4),
    )
}

#[tokio::test]
async fn postgres_round_trip_with_transactions() -> Result<(), DbPoolError> {
    let Some(target) = target_from_env() else {
        eprintln!("skipping: DBPOOL_TEST_PG_HOST not set");
        return Ok(());
    };
    let registry = PoolRegistry::new();
    let core = Factory::create_with(
        &registry,
        driver_for(DatabaseType::Postgres)?,
        &target,
        FactoryOptions::pooled().with_logging(false),
    )
    .await?;
    let again = Factory::create_with(
        &registry,
        driver_for(DatabaseType::Postgres)?,
        &target,
        FactoryOptions::pooled(),
    )
    .await?;
    assert!(Arc::ptr_eq(&core, &again));

    core.execute("DROP TABLE IF EXISTS dbpool_pg_test", &[]).await?;
    core.execute(
        "CREATE TABLE dbpool_pg_test (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL)",
        &[],
    )
    .await?;

    let inserted = core
        .execute_many(
            "INSERT INTO dbpool_pg_test (name) VALUES ($1)",
            &[vec!["alice".into()], vec!["bob".into()]],
        )
        .await?;
    assert_eq!(inserted, 2);

    let rows = core
        .fetch_all("SELECT id, name FROM dbpool_pg_test ORDER BY id", &[])
        .await?;
    let names: Vec<&str> = rows
        .iter()
        .filter_map(|row| row.get("name").and_then(RowValues::as_text))
        .collect();
    assert_eq!(names, ["alice", "bob"]);

    let (returned, queried) = core
        .transaction_scope(|tx| {
            Box::pin(async move {
                let returned = tx
                    .execute_returning_id("INSERT INTO dbpool_pg_test (name) VALUES ($1)", &["carol".into()])
                    .await?;
                let queried = tx.last_insert_id().await?;
                Ok::<_, DbPoolError>(Outcome::Rollback((returned, queried)))
            })
        })
        .await?
        .into_inner();
    assert_eq!(returned, queried);

    let remaining = core
        .fetch_one("SELECT COUNT(*) AS n FROM dbpool_pg_test", &[])
        .await?
        .and_then(|row| row.get("n").and_then(RowValues::as_int).copied());
    assert_eq!(remaining, Some(2));

    core.execute("DROP TABLE dbpool_pg_test", &[]).await?;
    Ok(())
}

#[tokio::test]
async fn postgres_translates_format_placeholders() -> Result<(), DbPoolError> {
    let Some(target) = target_from_env() else {
        eprintln!("skipping: DBPOOL_TEST_PG_HOST not set");
        return Ok(());
    };
    let core = Factory::create_with(
        &PoolRegistry::new(),
        driver_for(DatabaseType::Postgres)?,
        &target.with_translation(true),
        FactoryOptions::single().with_logging(false),
    )
    .await?;

    let row = core
        .fetch_one("SELECT %s::BIGINT + %s::BIGINT AS total", &[RowValues::Int(2), RowValues::Int(3)])
        .await?
        .expect("row");
    assert_eq!(row.get("total").and_then(RowValues::as_int), Some(&5));
    Ok(())
}

#[tokio::test]
async fn postgres_reads_zoned_and_date_columns_as_timestamps() -> Result<(), DbPoolError> {
    let Some(target) = target_from_env() else {
        eprintln!("skipping: DBPOOL_TEST_PG_HOST not set");
        return Ok(());
    };
    let core = Factory::create_with(
        &PoolRegistry::new(),
        driver_for(DatabaseType::Postgres)?,
        &target,
        FactoryOptions::single().with_logging(false),
    )
    .await?;

    let row = core
        .fetch_one(
            "SELECT TIMESTAMPTZ '2024-03-01 12:30:00+02' AS zoned, DATE '2024-03-01' AS day, \
             12.5::NUMERIC::TEXT AS amount",
            &[],
        )
        .await?
        .expect("row");
    let zoned = row.get("zoned").and_then(RowValues::as_timestamp).expect("zoned");
    assert_eq!(zoned.to_string(), "2024-03-01 10:30:00");
    let day = row.get("day").and_then(RowValues::as_timestamp).expect("day");
    assert_eq!(day.to_string(), "2024-03-01 00:00:00");
    assert_eq!(row.get("amount").and_then(RowValues::as_text), Some("12.5"));
    Ok(())
}

#[tokio::test]
async fn postgres_failed_batch_rolls_back_every_row() -> Result<(), DbPoolError> {
    let Some(target) = target_from_env() else {
        eprintln!("skipping: DBPOOL_TEST_PG_HOST not set");
        return Ok(());
    };
    let core = Factory::create_with(
        &PoolRegistry::new(),
        driver_for(DatabaseType::Postgres)?,
        &target,
        FactoryOptions::single().with_logging(false),
    )
    .await?;
    core.execute("DROP TABLE IF EXISTS dbpool_pg_batch", &[]).await?;
    core.execute("CREATE TABLE dbpool_pg_batch (name TEXT NOT NULL)", &[])
        .await?;

    let err = core
        .execute_many(
            "INSERT INTO dbpool_pg_batch (name) VALUES ($1)",
            &[vec!["kept?".into()], vec![RowValues::Null]],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbPoolError::QueryError { .. }));

    let rows = core.fetch_all("SELECT name FROM dbpool_pg_batch", &[]).await?;
    assert!(rows.is_empty());
    core.execute("DROP TABLE dbpool_pg_batch", &[]).await?;
    Ok(())
}
