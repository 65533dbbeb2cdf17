use std::{env, num::NonZeroUsize, str::FromStr, time::Duration};

use crate::{Result, WorkerErr};

const DEFAULT_STEPS: usize = 5;
const DEFAULT_DIMENSION: usize = 10;
const DEFAULT_DELAY_MS: u64 = 100;

/// Immutable execution bounds for a worker instance.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    steps: Option<NonZeroUsize>,
    dimension: usize,
    delay: Duration,
    jitter: Duration,
    value: f32,
}

impl WorkerConfig {
    /// Creates a new worker configuration with no delay between rounds.
    ///
    /// # Args
    /// * `steps` - Number of rounds to take part in, `None` to run until the coordinator leaves.
    /// * `dimension` - The model's dimensionality.
    ///
    /// # Returns
    /// A `WorkerConfig` instance.
    pub fn new(steps: Option<NonZeroUsize>, dimension: usize) -> Self {
        Self {
            steps,
            dimension,
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
            value: 1.,
        }
    }

    /// Reads `STEPS`, `DIMENSION`, `DELAY_MS`, `JITTER_MS` and `VALUE` from the environment.
    ///
    /// # Errors
    /// Returns `WorkerErr::Env` if a variable is set but can't be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` but reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let steps = parse_or(&lookup, "STEPS", DEFAULT_STEPS)?;
        let dimension = parse_or(&lookup, "DIMENSION", DEFAULT_DIMENSION)?;
        let delay = parse_or(&lookup, "DELAY_MS", DEFAULT_DELAY_MS)?;
        let jitter = parse_or(&lookup, "JITTER_MS", 0)?;
        let value = parse_or(&lookup, "VALUE", 1.)?;

        Ok(Self::new(NonZeroUsize::new(steps), dimension)
            .with_delay(Duration::from_millis(delay))
            .with_jitter(Duration::from_millis(jitter))
            .with_value(value))
    }

    /// Simulated compute time before every contribution.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Upper bound of a random extra delay added to every round.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// The value sent in every position of the contribution.
    pub fn with_value(mut self, value: f32) -> Self {
        self.value = value;
        self
    }

    /// Returns the number of rounds to take part in, if bounded.
    pub fn steps(&self) -> Option<usize> {
        self.steps.map(NonZeroUsize::get)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value.parse().map_err(|_| WorkerErr::Env { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let config = WorkerConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.steps(), Some(5));
        assert_eq!(config.dimension(), 10);
        assert_eq!(config.delay(), Duration::from_millis(100));
        assert_eq!(config.jitter(), Duration::ZERO);
        assert_eq!(config.value(), 1.);
    }

    #[test]
    fn zero_steps_means_unbounded() {
        let config = WorkerConfig::from_lookup(|key| (key == "STEPS").then(|| "0".into())).unwrap();
        assert_eq!(config.steps(), None);
    }

    #[test]
    fn unparsable_variable_names_its_key() {
        let err = WorkerConfig::from_lookup(|key| (key == "DELAY_MS").then(|| "soon".into()))
            .unwrap_err();

        assert!(matches!(err, WorkerErr::Env { key: "DELAY_MS", .. }));
    }
}
