use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbpool_middleware::prelude::*;
use dbpool_middleware::test_utils::{Fault, FaultOp, FaultyDriver};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::args::SimConfig;
use crate::model::LedgerModel;

const INSERT: &str = "INSERT INTO ledger (id, memo) VALUES (?1, ?2)";
const SNAPSHOT: &str = "SELECT id, memo FROM ledger ORDER BY id";

#[derive(Debug)]
enum Step {
    CommitTx { rows: Vec<(i64, String)>, fault: bool },
    RollbackTx { rows: Vec<(i64, String)> },
    FailingTx { rows: Vec<(i64, String)> },
    Batch { rows: Vec<(i64, String)>, fault: bool },
    Write { row: (i64, String), fault: bool },
    Read { faults: usize },
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct Stats {
    pub(crate) steps: u64,
    pub(crate) commits: u64,
    pub(crate) rollbacks: u64,
    pub(crate) rejected_writes: u64,
    pub(crate) recovered_reads: u64,
    pub(crate) exhausted_reads: u64,
    pub(crate) rows: usize,
}

#[derive(Debug)]
pub(crate) enum SimFailure {
    Db(DbPoolError),
    Divergence { step: u64, detail: String },
}

impl fmt::Display for SimFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimFailure::Db(err) => write!(f, "database error outside any scripted fault: {err}"),
            SimFailure::Divergence { step, detail } => write!(f, "step {step}: {detail}"),
        }
    }
}

impl From<DbPoolError> for SimFailure {
    fn from(err: DbPoolError) -> Self {
        SimFailure::Db(err)
    }
}

struct Generator<'a> {
    rng: &'a mut ChaCha8Rng,
    next_id: i64,
    fault_rate: f64,
    rollback_rate: f64,
}

impl Generator<'_> {
    fn rows(&mut self) -> Vec<(i64, String)> {
        let count = self.rng.gen_range(1..=4);
        (0..count).map(|_| self.row()).collect()
    }

    fn row(&mut self) -> (i64, String) {
        self.next_id += 1;
        let tag: u32 = self.rng.gen_range(0..10_000);
        (self.next_id, format!("memo-{tag}"))
    }

    fn step(&mut self) -> Step {
        let fault = self.rng.gen_bool(self.fault_rate);
        match self.rng.gen_range(0..6) {
            0 | 1 => {
                if self.rng.gen_bool(self.rollback_rate) {
                    Step::RollbackTx { rows: self.rows() }
                } else {
                    Step::CommitTx {
                        rows: self.rows(),
                        fault,
                    }
                }
            }
            2 => Step::FailingTx { rows: self.rows() },
            3 => Step::Batch {
                rows: self.rows(),
                fault,
            },
            4 => Step::Write {
                row: self.row(),
                fault,
            },
            _ => Step::Read {
                faults: if fault { self.rng.gen_range(1..=3) } else { 0 },
            },
        }
    }
}

fn params(row: &(i64, String)) -> Vec<RowValues> {
    vec![RowValues::Int(row.0), RowValues::Text(row.1.clone())]
}

/// Drive a seeded workload through one core and check the database against the model after
/// every step.
pub(crate) async fn run(config: &SimConfig, rng: &mut ChaCha8Rng) -> Result<Stats, SimFailure> {
    if config.db.exists() {
        std::fs::remove_file(&config.db)
            .map_err(|e| DbPoolError::configuration(format!("cannot reset {:?}: {e}", config.db)))?;
    }
    let target = ConnectionTarget::sqlite(config.db.to_string_lossy().into_owned())
        .with_pool_size(config.pool_size);
    let faulty = FaultyDriver::new(driver_for(DatabaseType::Sqlite)?);
    let options = FactoryOptions {
        pooled: config.pooled,
        ..FactoryOptions::default()
    }
    .with_logging(false)
    .with_max_usage(config.max_usage);
    let core = Factory::create_with(
        &PoolRegistry::new(),
        Arc::new(faulty.clone()),
        &target,
        options,
    )
    .await?;
    core.execute(
        "CREATE TABLE ledger (id INTEGER PRIMARY KEY, memo TEXT NOT NULL)",
        &[],
    )
    .await?;

    let deadline = config
        .duration_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));
    let mut generator = Generator {
        rng,
        next_id: 0,
        fault_rate: config.fault_rate,
        rollback_rate: config.rollback_rate,
    };
    let mut model = LedgerModel::default();
    let mut stats = Stats::default();

    loop {
        if config.iterations.is_some_and(|max| stats.steps >= max)
            || deadline.is_some_and(|d| Instant::now() >= d)
        {
            break;
        }
        stats.steps += 1;
        let step = generator.step();
        tracing::debug!(step = stats.steps, ?step, "running step");
        apply(&core, &faulty, step, &mut model, &mut stats).await?;

        let snapshot = core.fetch_all(SNAPSHOT, &[]).await?;
        if let Some(detail) = model.diff(&snapshot) {
            return Err(SimFailure::Divergence {
                step: stats.steps,
                detail,
            });
        }
    }

    stats.rows = model.len();
    tracing::info!(
        steps = stats.steps,
        commits = stats.commits,
        rollbacks = stats.rollbacks,
        connects = faulty.calls(FaultOp::Connect),
        "workload finished"
    );
    Ok(stats)
}

async fn apply(
    core: &ExecutionCore,
    faulty: &FaultyDriver,
    step: Step,
    model: &mut LedgerModel,
    stats: &mut Stats,
) -> Result<(), SimFailure> {
    let divergence = |stats: &Stats, detail: String| SimFailure::Divergence {
        step: stats.steps,
        detail,
    };

    match step {
        Step::CommitTx { rows, fault } => {
            if fault {
                faulty.fail_next(FaultOp::Execute, Fault::ServerGoneAway);
            }
            let committed = rows.clone();
            let result = core
                .transaction_scope(move |tx| {
                    Box::pin(async move {
                        for row in &rows {
                            tx.execute(INSERT, &params(row)).await?;
                        }
                        Ok::<_, DbPoolError>(true)
                    })
                })
                .await;
            match (fault, result) {
                (false, Ok(_)) => {
                    for (id, memo) in committed {
                        model.insert(id, memo);
                    }
                    stats.commits += 1;
                }
                (true, Err(err)) if err.is_connection_lost() => stats.rollbacks += 1,
                (_, other) => {
                    return Err(divergence(stats, format!("commit step ended with {other:?}")));
                }
            }
        }
        Step::RollbackTx { rows } => {
            let result = core
                .transaction_scope(move |tx| {
                    Box::pin(async move {
                        for row in &rows {
                            tx.execute(INSERT, &params(row)).await?;
                        }
                        Ok::<_, DbPoolError>(Outcome::Rollback(rows.len()))
                    })
                })
                .await?;
            if !matches!(result, Outcome::Rollback(_)) {
                return Err(divergence(stats, format!("rollback step returned {result:?}")));
            }
            stats.rollbacks += 1;
        }
        Step::FailingTx { rows } => {
            let result: Result<(), DbPoolError> = core
                .transaction_scope(move |tx| {
                    Box::pin(async move {
                        for row in &rows {
                            tx.execute(INSERT, &params(row)).await?;
                        }
                        Err(DbPoolError::usage("simulated abort"))
                    })
                })
                .await;
            if !matches!(result, Err(DbPoolError::UsageError(_))) {
                return Err(divergence(stats, format!("failing step returned {result:?}")));
            }
            stats.rollbacks += 1;
        }
        Step::Batch { rows, fault } => {
            if fault {
                faulty.fail_next(FaultOp::ExecuteMany, Fault::LostDuringQuery);
            }
            let sets: Vec<Vec<RowValues>> = rows.iter().map(params).collect();
            match (fault, core.execute_many(INSERT, &sets).await) {
                (false, Ok(n)) if n == rows.len() => {
                    for (id, memo) in rows {
                        model.insert(id, memo);
                    }
                }
                (true, Err(err)) if err.is_connection_lost() => stats.rejected_writes += 1,
                (_, other) => {
                    return Err(divergence(stats, format!("batch step ended with {other:?}")));
                }
            }
        }
        Step::Write { row, fault } => {
            if fault {
                faulty.fail_next(FaultOp::Execute, Fault::ServerGoneAway);
            }
            match (fault, core.execute(INSERT, &params(&row)).await) {
                (false, Ok(1)) => model.insert(row.0, row.1),
                (true, Err(err)) if err.is_connection_lost() => stats.rejected_writes += 1,
                (_, other) => {
                    return Err(divergence(stats, format!("write step ended with {other:?}")));
                }
            }
        }
        Step::Read { faults } => {
            faulty.fail_times(FaultOp::Query, Fault::ServerGoneAway, faults);
            let budget = core.retry_policy().max_attempts() as usize;
            match core.fetch_all(SNAPSHOT, &[]).await {
                Ok(rows) if faults < budget => {
                    if let Some(detail) = model.diff(&rows) {
                        return Err(divergence(stats, detail));
                    }
                    if faults > 0 {
                        stats.recovered_reads += 1;
                    }
                }
                Err(err) if faults >= budget && err.is_connection_lost() => {
                    stats.exhausted_reads += 1;
                }
                other => {
                    return Err(divergence(
                        stats,
                        format!("read with {faults} faults ended with {other:?}"),
                    ));
                }
            }
            let leftover = faulty.pending(FaultOp::Query);
            if leftover != 0 {
                return Err(divergence(stats, format!("{leftover} query faults never fired")));
            }
        }
    }
    Ok(())
}
