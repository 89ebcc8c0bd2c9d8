//! Per-host scalar immunity trajectory.
//!
//! Immunity rises toward 1 while blood parasites are present and decays
//! toward 0 once the host is parasite-free. The level feeds three couplings:
//! the probability that a new blood-stage infection turns clinical, the
//! growth or clearance rate of parasite densities, and the probability that
//! an infectious bite takes hold.

use crate::config::ImmuneSystemInformation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmuneSystem {
    current_value: f64,
    increasing: bool,
}

impl ImmuneSystem {
    #[must_use]
    pub fn new() -> ImmuneSystem {
        ImmuneSystem {
            current_value: 0.0,
            increasing: false,
        }
    }

    #[must_use]
    pub fn current_value(&self) -> f64 {
        self.current_value
    }

    #[must_use]
    pub fn is_increasing(&self) -> bool {
        self.increasing
    }

    pub fn set_increase(&mut self, value: bool) {
        self.increasing = value;
    }

    #[cfg(test)]
    pub(crate) fn set_current_value(&mut self, value: f64) {
        self.current_value = value.clamp(0.0, 1.0);
    }

    /// Advances the trajectory by `duration` days of exponential approach
    /// toward 1 (acquiring) or 0 (waning).
    pub fn update(&mut self, duration: i32, age: u32, info: &ImmuneSystemInformation) {
        if duration <= 0 {
            return;
        }
        let days = f64::from(duration);
        if self.increasing {
            let rate = info.acquire_rate(age);
            self.current_value = 1.0 - (1.0 - self.current_value) * (-rate * days).exp();
        } else {
            self.current_value *= (-info.decay_rate * days).exp();
        }
    }

    /// Probability that a blood-stage infection progresses to a clinical
    /// episode, decreasing from the configured maximum for naive hosts to
    /// the minimum for fully immune ones.
    #[must_use]
    pub fn clinical_progression_probability(&self, info: &ImmuneSystemInformation) -> f64 {
        let naive_share = (1.0 - self.current_value)
            .powf(info.immune_effect_on_progression_to_clinical);
        info.min_clinical_probability
            + (info.max_clinical_probability - info.min_clinical_probability) * naive_share
    }

    /// Log10 parasite density after `duration` days of immune-mediated
    /// growth or clearance, for a lineage with the given fitness.
    #[must_use]
    pub fn parasite_size_after_t_days(
        &self,
        duration: i32,
        original_size: f64,
        fitness: f64,
        info: &ImmuneSystemInformation,
    ) -> f64 {
        let daily_factor =
            info.c_max * (1.0 - self.current_value) + info.c_min * self.current_value;
        original_size + f64::from(duration) * (daily_factor.log10() + fitness.log10())
    }
}

impl Default for ImmuneSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn acquires_toward_one_and_wanes_toward_zero() {
        let info = test_config().immune_system_information;
        let mut immune = ImmuneSystem::new();
        immune.set_increase(true);
        immune.update(400, 30, &info);
        let acquired = immune.current_value();
        assert!(acquired > 0.9);

        immune.set_increase(false);
        immune.update(2000, 30, &info);
        assert!(immune.current_value() < acquired / 2.0);
    }

    #[test]
    fn zero_duration_is_a_no_op() {
        let info = test_config().immune_system_information;
        let mut immune = ImmuneSystem::new();
        immune.set_current_value(0.4);
        immune.set_increase(true);
        immune.update(0, 30, &info);
        assert_approx_eq!(immune.current_value(), 0.4, 1e-12);
    }

    #[test]
    fn clinical_probability_spans_configured_range() {
        let info = test_config().immune_system_information;
        let mut immune = ImmuneSystem::new();
        assert_approx_eq!(
            immune.clinical_progression_probability(&info),
            info.max_clinical_probability,
            1e-12
        );
        immune.set_current_value(1.0);
        assert_approx_eq!(
            immune.clinical_progression_probability(&info),
            info.min_clinical_probability,
            1e-12
        );
        immune.set_current_value(0.5);
        let mid = immune.clinical_progression_probability(&info);
        assert!(mid > info.min_clinical_probability && mid < info.max_clinical_probability);
    }

    #[test]
    fn parasites_grow_in_naive_hosts_and_clear_in_immune_hosts() {
        let info = test_config().immune_system_information;
        let mut immune = ImmuneSystem::new();
        assert!(immune.parasite_size_after_t_days(1, 2.0, 1.0, &info) > 2.0);
        immune.set_current_value(1.0);
        assert!(immune.parasite_size_after_t_days(1, 2.0, 1.0, &info) < 2.0);
    }
}
