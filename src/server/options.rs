//! Configuration for [`super::ProcessingServer`].

use std::time::Duration;

/// Timeouts and retry limits governing the server's shutdown protocol and
/// its per-process restart envelope.
#[derive(Debug, Clone)]
pub struct ProcessingServerOptions {
    /// How long, after `send_stop`, processes get to wind down cooperatively
    /// before the `stopped` signal escalates cancellation.
    pub stop_timeout: Duration,

    /// How long, after `send_stop`, before the `shutdown` signal fires and
    /// the server abandons waiting for processes to exit.
    pub shutdown_timeout: Duration,

    /// Extra grace period `wait_for_shutdown` allows after `shutdown_timeout`
    /// before giving up entirely.
    pub last_chance_timeout: Duration,

    /// Delay before the supervisor restarts its own dispatch loop after an
    /// internal failure.
    pub restart_delay: Duration,

    /// Maximum attempts `AutomaticRetryTask` makes before giving up on a
    /// process, including the first attempt.
    pub max_attempts: u32,

    /// Upper bound on the jittered exponential backoff between attempts.
    pub max_retry_delay: Duration,
}

impl Default for ProcessingServerOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(15),
            last_chance_timeout: Duration::from_secs(5),
            restart_delay: Duration::from_secs(15),
            max_attempts: 10,
            max_retry_delay: Duration::from_secs(60 * 60),
        }
    }
}
