#![cfg(all(feature = "sqlite", feature = "test-utils"))]

use std::sync::Arc;
use std::time::Duration;

use dbpool_middleware::prelude::*;
use dbpool_middleware::test_utils::{Fault, FaultOp, FaultyDriver};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    target: ConnectionTarget,
    driver: FaultyDriver,
    registry: PoolRegistry,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(name);
        Self {
            target: ConnectionTarget::sqlite(path.to_string_lossy().into_owned()).with_pool_size(4),
            _dir: dir,
            driver: FaultyDriver::new(driver_for(DatabaseType::Sqlite).expect("sqlite driver")),
            registry: PoolRegistry::new(),
        }
    }

    async fn core(&self, pooled: bool) -> Result<Arc<ExecutionCore>, DbPoolError> {
        let options = FactoryOptions {
            pooled,
            ..FactoryOptions::default()
        }
        .with_logging(false);
        let core = Factory::create_with(
            &self.registry,
            Arc::new(self.driver.clone()),
            &self.target,
            options,
        )
        .await?;
        core.execute(
            "CREATE TABLE IF NOT EXISTS ledger (id INTEGER PRIMARY KEY AUTOINCREMENT, memo TEXT)",
            &[],
        )
        .await?;
        Ok(core)
    }
}

async fn count(core: &ExecutionCore) -> Result<i64, DbPoolError> {
    let row = core
        .fetch_one("SELECT COUNT(*) AS n FROM ledger", &[])
        .await?
        .expect("count row");
    Ok(*row.get("n").and_then(RowValues::as_int).expect("integer count"))
}

#[tokio::test]
async fn successful_work_commits() -> Result<(), DbPoolError> {
    for pooled in [false, true] {
        let fx = Fixture::new("commit.db");
        let core = fx.core(pooled).await?;

        let inserted = core
            .transaction_scope(|tx| {
                Box::pin(async move {
                    tx.execute("INSERT INTO ledger (memo) VALUES (?1)", &["one".into()])
                        .await?;
                    tx.execute("INSERT INTO ledger (memo) VALUES (?1)", &["two".into()])
                        .await?;
                    let seen = tx.fetch_all("SELECT memo FROM ledger", &[]).await?;
                    Ok::<_, DbPoolError>(seen.len())
                })
            })
            .await?;
        assert_eq!(inserted, 2);
        assert_eq!(count(&core).await?, 2);
        assert!(!core.in_transaction());
    }
    Ok(())
}

#[tokio::test]
async fn false_sentinel_rolls_back_without_error() -> Result<(), DbPoolError> {
    for pooled in [false, true] {
        let fx = Fixture::new("sentinel.db");
        let core = fx.core(pooled).await?;

        let committed = core
            .transaction_scope(|tx| {
                Box::pin(async move {
                    tx.execute("INSERT INTO ledger (memo) VALUES (?1)", &["gone".into()])
                        .await?;
                    Ok::<_, DbPoolError>(false)
                })
            })
            .await?;
        assert!(!committed);
        assert_eq!(count(&core).await?, 0);
    }
    Ok(())
}

#[tokio::test]
async fn outcome_rollback_passes_value_through() -> Result<(), DbPoolError> {
    let fx = Fixture::new("outcome.db");
    let core = fx.core(true).await?;

    let outcome = core
        .transaction_scope(|tx| {
            Box::pin(async move {
                let id = tx
                    .execute_returning_id("INSERT INTO ledger (memo) VALUES (?1)", &["draft".into()])
                    .await?;
                Ok::<_, DbPoolError>(Outcome::Rollback(id))
            })
        })
        .await?;
    assert_eq!(outcome, Outcome::Rollback(1));
    assert_eq!(count(&core).await?, 0);
    Ok(())
}

#[derive(Debug)]
enum AppError {
    Db(DbPoolError),
    Validation(&'static str),
}

impl From<DbPoolError> for AppError {
    fn from(err: DbPoolError) -> Self {
        AppError::Db(err)
    }
}

#[tokio::test]
async fn failing_work_rolls_back_and_returns_original_error() -> Result<(), DbPoolError> {
    for pooled in [false, true] {
        let fx = Fixture::new("failure.db");
        let core = fx.core(pooled).await?;

        let result: Result<(), AppError> = core
            .transaction_scope(|tx| {
                Box::pin(async move {
                    tx.execute("INSERT INTO ledger (memo) VALUES (?1)", &["partial".into()])
                        .await?;
                    Err(AppError::Validation("memo rejected"))
                })
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation("memo rejected"))));
        assert_eq!(count(&core).await?, 0);
    }
    Ok(())
}

#[tokio::test]
async fn database_error_inside_work_rolls_back() -> Result<(), DbPoolError> {
    let fx = Fixture::new("db-failure.db");
    let core = fx.core(false).await?;

    let result: Result<(), DbPoolError> = core
        .transaction_scope(|tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO ledger (memo) VALUES (?1)", &["kept?".into()])
                    .await?;
                tx.execute("INSERT INTO nowhere VALUES (1)", &[]).await?;
                Ok::<(), DbPoolError>(())
            })
        })
        .await;
    assert!(matches!(result, Err(DbPoolError::QueryError { .. })));
    assert_eq!(count(&core).await?, 0);
    Ok(())
}

#[tokio::test]
async fn set_rollback_only_discards_work() -> Result<(), DbPoolError> {
    let fx = Fixture::new("rollback-only.db");
    let core = fx.core(true).await?;

    let mut scope = core.transaction();
    scope.begin().await?;
    scope
        .execute("INSERT INTO ledger (memo) VALUES (?1)", &["nope".into()])
        .await?;
    scope.set_rollback_only();
    assert!(!scope.should_commit());
    scope.finish().await?;
    assert_eq!(count(&core).await?, 0);
    Ok(())
}

#[tokio::test]
async fn run_on_unentered_scope_is_usage_error_without_io() -> Result<(), DbPoolError> {
    let fx = Fixture::new("unentered.db");
    let core = fx.core(true).await?;
    fx.driver.reset_calls();

    let mut scope = core.transaction();
    assert_eq!(scope.state(), ScopeState::Created);
    let result: Result<(), DbPoolError> = scope
        .run(|tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO ledger (memo) VALUES (?1)", &["never".into()])
                    .await?;
                Ok::<(), DbPoolError>(())
            })
        })
        .await;
    assert!(matches!(result, Err(DbPoolError::UsageError(_))));
    scope.finish().await?;

    for op in [
        FaultOp::Connect,
        FaultOp::Begin,
        FaultOp::Execute,
        FaultOp::Query,
        FaultOp::Commit,
        FaultOp::Rollback,
    ] {
        assert_eq!(fx.driver.calls(op), 0, "{op:?} should not have been called");
    }
    Ok(())
}

#[tokio::test]
async fn scope_cannot_be_entered_twice() -> Result<(), DbPoolError> {
    let fx = Fixture::new("twice.db");
    let core = fx.core(true).await?;

    let mut scope = core.transaction();
    scope.begin().await?;
    assert!(matches!(scope.begin().await, Err(DbPoolError::UsageError(_))));
    assert!(scope.is_active());
    scope.finish().await?;
    Ok(())
}

#[tokio::test]
async fn single_core_rejects_nested_scopes_and_direct_calls() -> Result<(), DbPoolError> {
    let fx = Fixture::new("nested.db");
    let core = fx.core(false).await?;

    let mut outer = core.transaction();
    outer.begin().await?;
    assert!(core.in_transaction());

    let mut inner = core.transaction();
    assert!(matches!(inner.begin().await, Err(DbPoolError::UsageError(_))));
    assert!(matches!(
        core.execute("INSERT INTO ledger (memo) VALUES ('direct')", &[]).await,
        Err(DbPoolError::UsageError(_))
    ));
    assert!(matches!(
        core.fetch_all("SELECT * FROM ledger", &[]).await,
        Err(DbPoolError::UsageError(_))
    ));

    outer
        .execute("INSERT INTO ledger (memo) VALUES (?1)", &["outer".into()])
        .await?;
    outer.finish().await?;
    assert!(!core.in_transaction());
    assert_eq!(count(&core).await?, 1);

    // Once the outer scope is gone a new one may begin.
    let mut next = core.transaction();
    next.begin().await?;
    next.finish().await?;
    Ok(())
}

#[tokio::test]
async fn pooled_scopes_are_independent() -> Result<(), DbPoolError> {
    let fx = Fixture::new("independent.db");
    let core = fx.core(true).await?;

    let mut a = core.transaction();
    let mut b = core.transaction();
    a.begin().await?;
    b.begin().await?;
    a.set_rollback_only();
    a.finish().await?;
    b.finish().await?;
    assert!(!core.in_transaction());
    Ok(())
}

#[tokio::test]
async fn execute_returning_id_matches_last_insert_id_in_scope() -> Result<(), DbPoolError> {
    for pooled in [false, true] {
        let fx = Fixture::new("scope-ids.db");
        let core = fx.core(pooled).await?;

        let (returned, queried) = core
            .transaction_scope(|tx| {
                Box::pin(async move {
                    tx.execute("INSERT INTO ledger (memo) VALUES ('seed')", &[]).await?;
                    let returned = tx
                        .execute_returning_id("INSERT INTO ledger (memo) VALUES (?1)", &["x".into()])
                        .await?;
                    let queried = tx.last_insert_id().await?;
                    Ok::<_, DbPoolError>(Outcome::Commit((returned, queried)))
                })
            })
            .await?
            .into_inner();
        assert_eq!(returned, 2);
        assert_eq!(returned, queried);
    }
    Ok(())
}

#[tokio::test]
async fn scope_operations_after_finish_state_are_rejected() -> Result<(), DbPoolError> {
    let fx = Fixture::new("closed.db");
    let core = fx.core(true).await?;

    let mut scope = core.transaction();
    assert!(matches!(
        scope.execute("INSERT INTO ledger (memo) VALUES ('x')", &[]).await,
        Err(DbPoolError::UsageError(_))
    ));
    scope.begin().await?;
    scope.finish().await?;
    Ok(())
}

#[tokio::test]
async fn dropped_active_scope_rolls_back_in_background() -> Result<(), DbPoolError> {
    for pooled in [false, true] {
        let fx = Fixture::new("dropped.db");
        let core = fx.core(pooled).await?;

        {
            let mut scope = core.transaction();
            scope.begin().await?;
            scope
                .execute("INSERT INTO ledger (memo) VALUES (?1)", &["abandoned".into()])
                .await?;
        }

        let mut waited = Duration::ZERO;
        while (core.in_transaction() || fx.driver.calls(FaultOp::Rollback) == 0)
            && waited < Duration::from_secs(5)
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        assert!(!core.in_transaction());
        assert_eq!(count(&core).await?, 0);
        assert_eq!(fx.driver.calls(FaultOp::Rollback), 1);
    }
    Ok(())
}

#[tokio::test]
async fn failed_commit_never_becomes_durable() -> Result<(), DbPoolError> {
    for pooled in [false, true] {
        let fx = Fixture::new("failed_commit.db");
        let core = fx.core(pooled).await?;

        let mut scope = core.transaction();
        scope.begin().await?;
        scope
            .execute("INSERT INTO ledger (memo) VALUES (?1)", &["lost".into()])
            .await?;
        fx.driver
            .fail_next(FaultOp::Commit, Fault::Query("disk I/O error".into()));
        let err = scope.finish().await.unwrap_err();
        assert!(matches!(err, DbPoolError::QueryError { .. }));
        assert_eq!(fx.driver.calls(FaultOp::Rollback), 1);

        // A later auto-committing statement must not pick up the failed scope's writes.
        core.execute("CREATE TABLE other (id INTEGER)", &[]).await?;
        assert_eq!(count(&core).await?, 0);

        let fresh = Factory::create_with(
            &PoolRegistry::new(),
            driver_for(DatabaseType::Sqlite)?,
            &fx.target,
            FactoryOptions::single().with_logging(false),
        )
        .await?;
        assert_eq!(count(&fresh).await?, 0);
    }
    Ok(())
}
