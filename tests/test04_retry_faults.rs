#![cfg(all(feature = "sqlite", feature = "test-utils"))]

use std::sync::Arc;

use dbpool_middleware::prelude::*;
use dbpool_middleware::test_utils::{Fault, FaultOp, FaultyDriver};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    target: ConnectionTarget,
    driver: FaultyDriver,
}

impl Fixture {
    fn new(name: &str, pool_size: u32) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(name);
        Self {
            target: ConnectionTarget::sqlite(path.to_string_lossy().into_owned())
                .with_pool_size(pool_size),
            _dir: dir,
            driver: FaultyDriver::new(driver_for(DatabaseType::Sqlite).expect("sqlite driver")),
        }
    }

    async fn core(&self, options: FactoryOptions) -> Result<Arc<ExecutionCore>, DbPoolError> {
        let core = Factory::create_with(
            &PoolRegistry::new(),
            Arc::new(self.driver.clone()),
            &self.target,
            options.with_logging(false),
        )
        .await?;
        core.execute(
            "CREATE TABLE IF NOT EXISTS items (id INTEGER PRIMARY KEY, label TEXT)",
            &[],
        )
        .await?;
        core.execute_many(
            "INSERT OR IGNORE INTO items (id, label) VALUES (?1, ?2)",
            &[
                vec![RowValues::Int(1), "first".into()],
                vec![RowValues::Int(2), "second".into()],
            ],
        )
        .await?;
        self.driver.reset_calls();
        Ok(core)
    }
}

fn both_variants() -> [FactoryOptions; 2] {
    [FactoryOptions::single(), FactoryOptions::pooled()]
}

#[tokio::test]
async fn fetch_all_succeeds_on_second_attempt() -> Result<(), DbPoolError> {
    for options in both_variants() {
        let fx = Fixture::new("second.db", 2);
        let core = fx.core(options).await?;
        fx.driver.fail_next(FaultOp::Query, Fault::ServerGoneAway);

        let rows = core.fetch_all("SELECT label FROM items ORDER BY id", &[]).await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows()[0].get("label").and_then(RowValues::as_text), Some("first"));
        assert_eq!(fx.driver.calls(FaultOp::Query), 2);
    }
    Ok(())
}

#[tokio::test]
async fn fetch_one_succeeds_on_third_attempt() -> Result<(), DbPoolError> {
    for options in both_variants() {
        let fx = Fixture::new("third.db", 2);
        let core = fx.core(options).await?;
        fx.driver.fail_next(FaultOp::Query, Fault::ServerGoneAway);
        fx.driver.fail_next(FaultOp::Query, Fault::LostDuringQuery);

        let row = core
            .fetch_one("SELECT label FROM items WHERE id = ?1", &[RowValues::Int(2)])
            .await?
            .expect("row");
        assert_eq!(row.get("label").and_then(RowValues::as_text), Some("second"));
        assert_eq!(fx.driver.calls(FaultOp::Query), 3);
    }
    Ok(())
}

#[tokio::test]
async fn reads_give_up_after_three_attempts() -> Result<(), DbPoolError> {
    for options in both_variants() {
        let fx = Fixture::new("exhaust.db", 2);
        let core = fx.core(options).await?;
        fx.driver.fail_times(FaultOp::Query, Fault::ServerGoneAway, 5);

        let err = core.fetch_all("SELECT * FROM items", &[]).await.unwrap_err();
        assert!(err.is_connection_lost());
        assert_eq!(err.code(), Some(2006));
        assert_eq!(fx.driver.calls(FaultOp::Query), 3);
        assert_eq!(fx.driver.pending(FaultOp::Query), 2);
    }
    Ok(())
}

#[tokio::test]
async fn query_errors_are_not_retried() -> Result<(), DbPoolError> {
    let fx = Fixture::new("logical.db", 2);
    let core = fx.core(FactoryOptions::pooled()).await?;
    fx.driver
        .fail_next(FaultOp::Query, Fault::Query("syntax error".into()));

    let err = core.fetch_one("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, DbPoolError::QueryError { .. }));
    assert_eq!(fx.driver.calls(FaultOp::Query), 1);
    Ok(())
}

#[tokio::test]
async fn custom_retry_policy_is_honored() -> Result<(), DbPoolError> {
    let fx = Fixture::new("custom.db", 2);
    let core = fx
        .core(FactoryOptions::pooled().with_retry(RetryPolicy::none()))
        .await?;
    fx.driver.fail_next(FaultOp::Query, Fault::ServerGoneAway);

    assert!(core.fetch_all("SELECT * FROM items", &[]).await.is_err());
    assert_eq!(fx.driver.calls(FaultOp::Query), 1);
    Ok(())
}

#[tokio::test]
async fn execute_makes_exactly_one_attempt() -> Result<(), DbPoolError> {
    for options in both_variants() {
        let fx = Fixture::new("write-once.db", 2);
        let core = fx.core(options).await?;
        fx.driver.fail_next(FaultOp::Execute, Fault::ServerGoneAway);

        let err = core
            .execute("INSERT INTO items (id, label) VALUES (?1, ?2)", &[RowValues::Int(3), "third".into()])
            .await
            .unwrap_err();
        assert!(err.is_connection_lost());
        assert_eq!(fx.driver.calls(FaultOp::Execute), 1);

        let next = core
            .execute_returning_id("INSERT INTO items (label) VALUES (?1)", &["x".into()])
            .await?;
        // The scripted fault was consumed; the follow-up write runs on a fresh connection.
        assert_eq!(next, 3);
        assert_eq!(fx.driver.calls(FaultOp::Execute), 2);
    }
    Ok(())
}

#[tokio::test]
async fn execute_many_makes_exactly_one_attempt() -> Result<(), DbPoolError> {
    for options in both_variants() {
        let fx = Fixture::new("batch-once.db", 2);
        let core = fx.core(options).await?;
        fx.driver
            .fail_next(FaultOp::ExecuteMany, Fault::LostDuringQuery);

        let err = core
            .execute_many(
                "INSERT INTO items (label) VALUES (?1)",
                &[vec!["a".into()], vec!["b".into()]],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(2013));
        assert_eq!(fx.driver.calls(FaultOp::ExecuteMany), 1);
        assert_eq!(core.fetch_all("SELECT * FROM items", &[]).await?.len(), 2);
    }
    Ok(())
}

#[tokio::test]
async fn reads_inside_a_scope_are_not_retried() -> Result<(), DbPoolError> {
    for options in both_variants() {
        let fx = Fixture::new("scope-read.db", 2);
        let core = fx.core(options).await?;
        fx.driver.fail_next(FaultOp::Query, Fault::ServerGoneAway);

        let result = core
            .transaction_scope(|tx| {
                Box::pin(async move {
                    let rows = tx.fetch_all("SELECT * FROM items", &[]).await?;
                    Ok::<_, DbPoolError>(rows.len())
                })
            })
            .await;
        assert!(result.is_err_and(|e| e.is_connection_lost()));
        assert_eq!(fx.driver.calls(FaultOp::Query), 1);
        assert_eq!(fx.driver.calls(FaultOp::Rollback), 1);

        // The core recovers on the next operation.
        assert_eq!(core.fetch_all("SELECT * FROM items", &[]).await?.len(), 2);
    }
    Ok(())
}

#[tokio::test]
async fn single_core_reconnects_after_connection_loss() -> Result<(), DbPoolError> {
    let fx = Fixture::new("reconnect.db", 1);
    let core = fx.core(FactoryOptions::single()).await?;
    fx.driver.fail_next(FaultOp::Execute, Fault::ServerGoneAway);

    assert!(core
        .execute("UPDATE items SET label = 'x' WHERE id = 1", &[])
        .await
        .is_err());
    assert_eq!(fx.driver.calls(FaultOp::Connect), 0);

    core.execute("UPDATE items SET label = 'y' WHERE id = 1", &[])
        .await?;
    assert_eq!(fx.driver.calls(FaultOp::Connect), 1);
    Ok(())
}

#[tokio::test]
async fn pooled_connections_are_replaced_after_max_usage() -> Result<(), DbPoolError> {
    let fx = Fixture::new("usage.db", 1);
    let core = fx
        .core(FactoryOptions::pooled().with_max_usage(2))
        .await?;

    for _ in 0..5 {
        core.fetch_one("SELECT label FROM items WHERE id = 1", &[])
            .await?;
    }
    // Setup retired the first connection. Checkouts 2 and 4 retire theirs, so checkouts 1, 3
    // and 5 open new ones.
    assert_eq!(fx.driver.calls(FaultOp::Connect), 3);
    Ok(())
}

#[tokio::test]
async fn unlimited_usage_keeps_one_connection() -> Result<(), DbPoolError> {
    let fx = Fixture::new("unlimited.db", 1);
    let core = fx
        .core(FactoryOptions::pooled().with_max_usage(0))
        .await?;

    for _ in 0..10 {
        core.fetch_all("SELECT * FROM items", &[]).await?;
    }
    assert_eq!(fx.driver.calls(FaultOp::Connect), 0);
    Ok(())
}
