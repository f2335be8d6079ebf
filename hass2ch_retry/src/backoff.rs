use std::time::Duration;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound of the (non-randomized) delay.
    pub max_interval: Duration,
    /// Factor applied to the delay after every attempt.
    pub multiplier: f64,
    /// Jitter factor in `[0, 1]`. Zero disables jitter.
    pub randomization_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            multiplier: 1.5,
            randomization_factor: 0.5,
        }
    }
}

impl RetryConfig {
    /// Defaults used for writes to the analytical store.
    pub fn sink_default() -> Self {
        Self {
            max_retries: 5,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            randomization_factor: 0.5,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_interval(mut self, initial_interval: Duration) -> Self {
        self.initial_interval = initial_interval;
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_randomization_factor(mut self, randomization_factor: f64) -> Self {
        self.randomization_factor = randomization_factor;
        self
    }

    /// Returns the capped delay before jitter is applied.
    pub fn expected_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_interval.as_secs_f64();
        let max = self.max_interval.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = initial * self.multiplier.powi(exponent);

        if !delay.is_finite() || delay >= max {
            return self.max_interval;
        }

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Returns the jittered delay to wait after the given (zero based) attempt.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        backoff_delay(self, attempt, rand::random::<f64>())
    }
}

/// Computes the delay after `attempt` given a uniform draw `unit` in `[0, 1)`.
///
/// The result is `min(initial * multiplier^attempt, max)` spread uniformly over
/// `[delay * (1 - f), delay * (1 + f)]` where `f` is the randomization factor.
pub fn backoff_delay(config: &RetryConfig, attempt: u32, unit: f64) -> Duration {
    let delay = config.expected_delay(attempt).as_secs_f64();
    let factor = config.randomization_factor.clamp(0.0, 1.0);

    if factor == 0.0 {
        return Duration::from_secs_f64(delay);
    }

    let delta = factor * delay;
    let min = delay - delta;
    let max = delay + delta;
    let unit = unit.clamp(0.0, 1.0);

    Duration::from_secs_f64(min + unit * (max - min))
}
