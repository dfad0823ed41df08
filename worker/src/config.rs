use std::{env, fs, num::NonZeroUsize, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkerErr};

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";

/// Where this process sits in the group, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub rank: usize,
    pub world_size: usize,
    pub master_addr: String,
    pub master_port: u16,
}

impl ProcessSpec {
    /// Reads `RANK` (or `LOCAL_RANK`), `WORLD_SIZE`, `MASTER_ADDR` and `MASTER_PORT`.
    ///
    /// # Returns
    /// The process spec or an error if a variable is missing, unparsable or the rank doesn't fit
    /// the world size.
    pub fn from_env() -> Result<Self> {
        let rank = env::var("RANK")
            .or_else(|_| env::var("LOCAL_RANK"))
            .map_err(|e| WorkerErr::Env {
                var: "RANK",
                reason: e.to_string(),
            })
            .and_then(|v| parse("RANK", &v))?;

        let world_size = parse_var("WORLD_SIZE")?;
        let master_port = parse_var("MASTER_PORT")?;
        let master_addr =
            env::var("MASTER_ADDR").unwrap_or_else(|_| DEFAULT_MASTER_ADDR.to_string());

        if world_size == 0 || rank >= world_size {
            return Err(WorkerErr::Env {
                var: "RANK",
                reason: format!("rank {rank} doesn't fit a world size of {world_size}"),
            });
        }

        Ok(Self {
            rank,
            world_size,
            master_addr,
            master_port,
        })
    }

    /// Returns the address of rank 0.
    pub fn master(&self) -> String {
        format!("{}:{}", self.master_addr, self.master_port)
    }
}

fn parse_var<T: FromStr>(var: &'static str) -> Result<T>
where
    T::Err: ToString,
{
    let value = env::var(var).map_err(|e| WorkerErr::Env {
        var,
        reason: e.to_string(),
    })?;

    parse(var, &value)
}

fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T>
where
    T::Err: ToString,
{
    value.trim().parse().map_err(|e: T::Err| WorkerErr::Env {
        var,
        reason: e.to_string(),
    })
}

/// The training hyper-parameters, as read from the JSON file named by `TRAIN_CONFIG`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingSpec {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub momentum: f32,
    pub seed: u64,
    pub features: usize,
    pub hidden: usize,
    pub classes: usize,
    pub train_size: usize,
    pub val_size: usize,
    /// Standard deviation of the synthetic clusters around their centers.
    pub spread: f32,
    /// Log the running training loss every this many batches.
    pub log_every: usize,
}

impl Default for TrainingSpec {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 64,
            learning_rate: 0.01,
            momentum: 0.5,
            seed: 0,
            features: 32,
            hidden: 128,
            classes: 10,
            train_size: 4096,
            val_size: 1000,
            spread: 1.0,
            log_every: 10,
        }
    }
}

impl TrainingSpec {
    /// Reads the spec from the file named by `TRAIN_CONFIG`, the defaults if it isn't set.
    pub fn from_env() -> Result<Self> {
        match env::var("TRAIN_CONFIG") {
            Ok(path) => Self::from_file(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parses the spec from JSON, missing fields take their default value.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Validated execution bounds for a training run.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    epochs: NonZeroUsize,
    batch_size: NonZeroUsize,
    log_every: NonZeroUsize,
    spec: TrainingSpec,
}

impl WorkerConfig {
    /// Creates a new worker configuration.
    ///
    /// # Args
    /// * `spec` - The training hyper-parameters.
    ///
    /// # Returns
    /// A `WorkerConfig` instance or an error if a count is zero, a rate isn't finite or the spread is
    /// negative.
    pub fn new(spec: TrainingSpec) -> Result<Self> {
        let non_zero = |value: usize, what: &str| {
            NonZeroUsize::new(value)
                .ok_or_else(|| WorkerErr::InvalidConfig(format!("{what} must be positive")))
        };

        let epochs = non_zero(spec.epochs, "epochs")?;
        let batch_size = non_zero(spec.batch_size, "batch_size")?;
        let log_every = non_zero(spec.log_every, "log_every")?;
        non_zero(spec.features, "features")?;
        non_zero(spec.hidden, "hidden")?;
        non_zero(spec.classes, "classes")?;

        if !spec.learning_rate.is_finite() || !spec.momentum.is_finite() {
            return Err(WorkerErr::InvalidConfig(
                "learning_rate and momentum must be finite".into(),
            ));
        }

        if !spec.spread.is_finite() || spec.spread < 0.0 {
            return Err(WorkerErr::InvalidConfig(format!(
                "spread must be finite and non negative, got {}",
                spec.spread
            )));
        }

        Ok(Self {
            epochs,
            batch_size,
            log_every,
            spec,
        })
    }

    /// Returns the total number of epochs.
    pub fn epochs(&self) -> usize {
        self.epochs.get()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn log_every(&self) -> usize {
        self.log_every.get()
    }

    pub fn spec(&self) -> &TrainingSpec {
        &self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let spec = TrainingSpec::from_json(r#"{"epochs": 2, "learning_rate": 0.1}"#).unwrap();

        assert_eq!(spec.epochs, 2);
        assert_eq!(spec.learning_rate, 0.1);
        assert_eq!(spec.batch_size, 64);
        assert_eq!(spec.momentum, 0.5);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(TrainingSpec::from_json(r#"{"epoch": 2}"#).is_err());
    }

    #[test]
    fn zero_counts_are_rejected() {
        let spec = TrainingSpec {
            batch_size: 0,
            ..Default::default()
        };

        assert!(matches!(
            WorkerConfig::new(spec),
            Err(WorkerErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn negative_or_non_finite_spread_is_rejected() {
        for spread in [-1.0, f32::NAN, f32::INFINITY] {
            let spec = TrainingSpec {
                spread,
                ..Default::default()
            };

            assert!(matches!(
                WorkerConfig::new(spec),
                Err(WorkerErr::InvalidConfig(_))
            ));
        }

        let spec = TrainingSpec::from_json(r#"{"spread": -1}"#).unwrap();
        assert!(WorkerConfig::new(spec).is_err());
    }

    #[test]
    fn master_joins_addr_and_port() {
        let process = ProcessSpec {
            rank: 1,
            world_size: 2,
            master_addr: "10.0.0.1".into(),
            master_port: 29500,
        };

        assert_eq!(process.master(), "10.0.0.1:29500");
    }
}
