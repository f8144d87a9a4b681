//! The five-parameter configuration surface of spec.md §6.

use serde::Deserialize;

use crate::error::NrpaError;

/// Scheduler configuration: iteration count, tree shape, adaptation rate,
/// and the seed stream's root.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SchedulerConfig {
    /// Number of children per parallel/root node (`I` in spec.md).
    pub iterations: u32,
    /// Depth of parallel nodes before the atomic boundary (`P`).
    pub parallel_levels: u32,
    /// Nesting depth handed to the external atomic NRPA routine (`A`).
    pub atomic_levels: u32,
    /// Policy adaptation step size.
    pub alpha: f64,
    /// Root seed for the deterministic atomic-seed table.
    pub random_seed: u64,
}

impl SchedulerConfig {
    /// Validates the configuration, per spec.md §7's `ConfigurationInvalid`.
    pub fn validate(&self) -> Result<(), NrpaError> {
        if self.iterations == 0 {
            return Err(NrpaError::ConfigurationInvalid(
                "iterations must be >= 1".into(),
            ));
        }
        if self.parallel_levels == 0 {
            return Err(NrpaError::ConfigurationInvalid(
                "parallel_levels must be >= 1".into(),
            ));
        }
        if self.atomic_levels == 0 {
            return Err(NrpaError::ConfigurationInvalid(
                "atomic_levels must be >= 1".into(),
            ));
        }
        if !(self.alpha > 0.0) {
            return Err(NrpaError::ConfigurationInvalid(
                "alpha must be strictly positive".into(),
            ));
        }
        Ok(())
    }

    /// Size of the deterministic atomic-seed table, `I^P`.
    pub fn seed_table_size(&self) -> u64 {
        (self.iterations as u64).pow(self.parallel_levels)
    }

    /// Expected total atomic rollouts, `I^(P+A)`.
    pub fn total_expected_sequences(&self) -> u64 {
        (self.iterations as u64).pow(self.parallel_levels + self.atomic_levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SchedulerConfig {
        SchedulerConfig {
            iterations: 3,
            parallel_levels: 2,
            atomic_levels: 1,
            alpha: 1.0,
            random_seed: 1,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut c = valid();
        c.iterations = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn non_positive_alpha_rejected() {
        let mut c = valid();
        c.alpha = 0.0;
        assert!(c.validate().is_err());
        c.alpha = -1.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn seed_table_size_matches_formula() {
        let c = valid();
        assert_eq!(c.seed_table_size(), 9);
        assert_eq!(c.total_expected_sequences(), 27);
    }
}
