use std::time::Duration;

/// Options for the Home Assistant client.
#[derive(Debug, Clone)]
pub struct HassClientOptions {
    /// Timeout for establishing the websocket connection.
    pub connect_timeout: Duration,
    /// How long to wait for `auth_ok` after a reconnect.
    pub auth_timeout: Duration,
    /// How long to wait for a `subscribe_events` acknowledgement.
    pub subscribe_timeout: Duration,
    /// How long to wait for the result of a one-shot command.
    pub request_timeout: Duration,
    /// Capacity of every subscription output channel.
    pub subscription_buffer: usize,
    pub user_agent: String,
    pub reconnect: ReconnectOptions,
}

/// Backoff used between reconnection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectOptions {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for HassClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            subscribe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            subscription_buffer: 100,
            user_agent: "hass2ch".to_string(),
            reconnect: ReconnectOptions::default(),
        }
    }
}

impl HassClientOptions {
    pub fn with_reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_subscription_buffer(mut self, capacity: usize) -> Self {
        self.subscription_buffer = capacity.max(1);
        self
    }
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
        }
    }
}

impl ReconnectOptions {
    pub fn new(initial_interval: Duration, max_interval: Duration, multiplier: f64) -> Self {
        Self {
            initial_interval,
            max_interval,
            multiplier,
        }
    }

    /// Interval before the first retry, never above `max_interval`.
    pub fn first_interval(&self) -> Duration {
        self.initial_interval.min(self.max_interval)
    }

    /// Returns the interval to wait after `current`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.multiplier.max(1.0);

        if !next.is_finite() || next >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }

        Duration::from_secs_f64(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_interval_growth() {
        let options = ReconnectOptions::default();

        let mut interval = options.initial_interval;
        let mut seen = vec![interval];
        for _ in 0..12 {
            interval = options.next_interval(interval);
            seen.push(interval);
        }

        assert_eq!(seen[1], Duration::from_millis(1500));
        assert_eq!(seen[2], Duration::from_millis(2250));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_first_interval_is_capped() {
        let options = ReconnectOptions::new(Duration::from_secs(60), Duration::from_secs(5), 2.0);
        assert_eq!(options.first_interval(), Duration::from_secs(5));
        assert_eq!(options.next_interval(options.first_interval()), Duration::from_secs(5));

        let options = ReconnectOptions::default();
        assert_eq!(options.first_interval(), Duration::from_secs(1));
    }
}
