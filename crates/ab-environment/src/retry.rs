use crate::error::EnvResult;
use std::time::Duration;

/// Bounded exponential backoff parameters, read from an environment's
/// const args (`total_retries`, `backoff_factor`; defaults 3 and 2.0) per
/// spec §5 Retry discipline.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub total_retries: u32,
    pub backoff_factor: f64,
    pub initial_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            total_retries: 3,
            backoff_factor: 2.0,
            initial_delay: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    pub fn from_const_args(const_args: &crate::environment::ConstArgs) -> Self {
        let mut cfg = RetryConfig::default();
        if let Some(n) = const_args.get("total_retries").and_then(|v| v.as_u64()) {
            cfg.total_retries = n as u32;
        }
        if let Some(f) = const_args.get("backoff_factor").and_then(|v| v.as_f64()) {
            cfg.backoff_factor = f;
        }
        cfg
    }
}

/// Retries `op` with bounded exponential backoff while its error is
/// transient (`EnvironmentError::is_transient`); permanent failures and
/// exhausted retries propagate immediately.
pub fn with_backoff<T>(cfg: &RetryConfig, mut op: impl FnMut() -> EnvResult<T>) -> EnvResult<T> {
    let mut attempt = 0u32;
    let mut delay = cfg.initial_delay;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < cfg.total_retries => {
                attempt += 1;
                tracing::warn!(attempt, ?delay, error = %e, "transient environment error, retrying");
                std::thread::sleep(delay);
                delay = delay.mul_f64(cfg.backoff_factor);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnvironmentError;
    use std::cell::Cell;

    #[test]
    fn retries_transient_errors_until_success() {
        let cfg = RetryConfig {
            total_retries: 3,
            backoff_factor: 1.0,
            initial_delay: Duration::from_millis(0),
        };
        let attempts = Cell::new(0);
        let result = with_backoff(&cfg, || {
            let n = attempts.get() + 1;
            attempts.set(n);
            if n < 3 {
                Err(EnvironmentError::Io("transient".into()))
            } else {
                Ok(n)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn does_not_retry_permanent_errors() {
        let cfg = RetryConfig::default();
        let attempts = Cell::new(0);
        let result: EnvResult<()> = with_backoff(&cfg, || {
            attempts.set(attempts.get() + 1);
            Err(EnvironmentError::SetupFailed("nope".into()))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn gives_up_after_total_retries() {
        let cfg = RetryConfig {
            total_retries: 2,
            backoff_factor: 1.0,
            initial_delay: Duration::from_millis(0),
        };
        let attempts = Cell::new(0);
        let result: EnvResult<()> = with_backoff(&cfg, || {
            attempts.set(attempts.get() + 1);
            Err(EnvironmentError::Io("still failing".into()))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 3); // initial + 2 retries
    }
}
