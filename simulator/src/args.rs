use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Deterministic dbpool-middleware workload simulator")]
pub(crate) struct Args {
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    #[arg(long)]
    pub(crate) iterations: Option<u64>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    /// Use the pooled core instead of a single persistent connection.
    #[arg(long)]
    pub(crate) pooled: bool,
    #[arg(long, default_value_t = 4)]
    pub(crate) pool_size: u32,
    #[arg(long, default_value_t = 5)]
    pub(crate) max_usage: u32,
    /// Probability that a step runs with injected connection-loss faults.
    #[arg(long, default_value_t = 0.1)]
    pub(crate) fault_rate: f64,
    /// Probability that a transaction step asks for rollback.
    #[arg(long, default_value_t = 0.3)]
    pub(crate) rollback_rate: f64,
    /// `SQLite` file to run against; defaults to a seed-named file in the temp dir.
    #[arg(long)]
    pub(crate) db: Option<PathBuf>,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    /// Log every generated step.
    #[arg(long, short)]
    pub(crate) verbose: bool,
    #[arg(long)]
    pub(crate) quick: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimConfig {
    pub(crate) duration_ms: Option<u64>,
    pub(crate) iterations: Option<u64>,
    pub(crate) seed: u64,
    pub(crate) pooled: bool,
    pub(crate) pool_size: u32,
    pub(crate) max_usage: u32,
    pub(crate) fault_rate: f64,
    pub(crate) rollback_rate: f64,
    pub(crate) db: PathBuf,
    pub(crate) log: Option<PathBuf>,
    pub(crate) verbose: bool,
    pub(crate) preset: Option<String>,
}

impl SimConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let seed = args.seed.unwrap_or_else(random_seed);
        let mut config = SimConfig {
            duration_ms: args
                .duration
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            iterations: args.iterations,
            seed,
            pooled: args.pooled,
            pool_size: args.pool_size.max(1),
            max_usage: args.max_usage,
            fault_rate: clamp_rate(args.fault_rate),
            rollback_rate: clamp_rate(args.rollback_rate),
            db: args
                .db
                .unwrap_or_else(|| std::env::temp_dir().join(format!("dbpool-sim-{seed}.db"))),
            log: args.log,
            verbose: args.verbose,
            preset: None,
        };

        if args.quick {
            config.apply_quick();
        }
        if config.iterations.is_none() && config.duration_ms.is_none() {
            config.iterations = Some(500);
        }

        config
    }

    fn apply_quick(&mut self) {
        self.preset = Some("quick".to_string());
        self.iterations = Some(200);
        self.duration_ms = None;
        self.pool_size = 2;
        self.max_usage = 3;
        self.fault_rate = 0.2;
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_clamped() {
        assert_eq!(clamp_rate(-1.0), 0.0);
        assert_eq!(clamp_rate(2.0), 1.0);
        assert_eq!(clamp_rate(f64::NAN), 0.0);
        assert_eq!(clamp_rate(0.25), 0.25);
    }

    #[test]
    fn quick_preset_bounds_the_run() {
        let args = Args::parse_from(["simulator", "--quick", "--seed", "7"]);
        let config = SimConfig::from_args(args);
        assert_eq!(config.iterations, Some(200));
        assert_eq!(config.seed, 7);
        assert!(config.db.ends_with("dbpool-sim-7.db"));
    }

    #[test]
    fn default_run_has_an_iteration_cap() {
        let config = SimConfig::from_args(Args::parse_from(["simulator"]));
        assert_eq!(config.iterations, Some(500));
    }
}
