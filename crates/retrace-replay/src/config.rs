//! Replay configuration.

/// What the dispatcher does when a class of failure occurs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Halt the replay and return the error.
    #[default]
    Abort,
    /// Record the failure and move on to the next record.
    Continue,
}

/// Configuration for a [`Dispatcher`](crate::Dispatcher).
#[derive(Clone, Debug, Default)]
pub struct ReplayConfig {
    /// Live call failed where the capture succeeded. Default: abort.
    pub on_live_failure: FailurePolicy,
    /// Record that cannot be decoded or whose handles cannot be resolved.
    /// Default: abort.
    pub on_malformed_record: FailurePolicy,
    /// With [`FailurePolicy::Continue`] for live failures, halt once this
    /// many divergences have been recorded. `None` never halts.
    pub max_divergences: Option<usize>,
}

impl ReplayConfig {
    /// Best-effort replay: continue past every record-local failure.
    pub fn best_effort() -> Self {
        Self {
            on_live_failure: FailurePolicy::Continue,
            on_malformed_record: FailurePolicy::Continue,
            max_divergences: None,
        }
    }

    /// Check the configuration before replay starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_divergences == Some(0) {
            return Err(ConfigError::ZeroMaxDivergences);
        }
        if self.max_divergences.is_some() && self.on_live_failure == FailurePolicy::Abort {
            return Err(ConfigError::DivergenceCapWithAbort);
        }
        Ok(())
    }
}

/// Invalid [`ReplayConfig`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_divergences` is `Some(0)`.
    #[error("max_divergences must be at least 1")]
    ZeroMaxDivergences,
    /// `max_divergences` has no effect when live failures abort.
    #[error("max_divergences requires on_live_failure = Continue")]
    DivergenceCapWithAbort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_abort_and_validate() {
        let cfg = ReplayConfig::default();
        assert_eq!(cfg.on_live_failure, FailurePolicy::Abort);
        assert_eq!(cfg.on_malformed_record, FailurePolicy::Abort);
        assert!(cfg.validate().is_ok());
        assert!(ReplayConfig::best_effort().validate().is_ok());
    }

    #[test]
    fn divergence_cap_checks() {
        let mut cfg = ReplayConfig::best_effort();
        cfg.max_divergences = Some(0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroMaxDivergences));

        let cfg = ReplayConfig {
            max_divergences: Some(3),
            ..ReplayConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::DivergenceCapWithAbort));
    }
}
