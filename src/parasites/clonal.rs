//! A single genotype-lineage density track inside one host.

use crate::config::Config;
use crate::immune::ImmuneSystem;
use crate::therapy::GenotypeId;
use serde::{Deserialize, Serialize};

pub type ParasiteUid = u64;

/// Sentinel log10 density meaning "zero/undetectable", kept far below any
/// biological level for numerical stability.
pub const LOG_ZERO_PARASITE_DENSITY: f64 = -1000.0;

/// The pluggable per-lineage density behavior. Switching tags is an
/// explicit, auditable transition; each tag has one pure update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DensityUpdate {
    /// Density holds until another behavior takes over.
    Latent,
    /// Immune-mediated growth or clearance.
    ImmuneClearance,
    /// Same trajectory as immune clearance, under active drug pressure;
    /// the killing itself is applied separately from concentrations.
    DrugExposed,
    /// Held at the asymptomatic baseline while a clinical onset is pending.
    ProgressToClinical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClonalParasitePopulation {
    pub uid: ParasiteUid,
    pub genotype: GenotypeId,
    log10_density: f64,
    gametocyte_level: f64,
    pub first_day_in_blood: i32,
    pub update_mode: DensityUpdate,
}

impl ClonalParasitePopulation {
    #[must_use]
    pub fn new(uid: ParasiteUid, genotype: GenotypeId, day: i32) -> ClonalParasitePopulation {
        ClonalParasitePopulation {
            uid,
            genotype,
            log10_density: LOG_ZERO_PARASITE_DENSITY,
            gametocyte_level: 0.0,
            first_day_in_blood: day,
            update_mode: DensityUpdate::Latent,
        }
    }

    #[must_use]
    pub fn log10_density(&self) -> f64 {
        self.log10_density
    }

    pub fn set_log10_density(&mut self, value: f64) {
        self.log10_density = value;
    }

    #[must_use]
    pub fn gametocyte_level(&self) -> f64 {
        self.gametocyte_level
    }

    pub fn set_gametocyte_level(&mut self, value: f64) {
        self.gametocyte_level = value;
    }

    /// Transmissible density: the blood density discounted by gametocyte
    /// carriage. The sentinel propagates so immature lineages contribute
    /// nothing to the force of infection.
    #[must_use]
    pub fn log10_relative_density(&self) -> f64 {
        if self.log10_density == LOG_ZERO_PARASITE_DENSITY || self.gametocyte_level == 0.0 {
            return LOG_ZERO_PARASITE_DENSITY;
        }
        self.log10_density + self.gametocyte_level.log10()
    }

    /// Whether the lineage has fallen to or below the undetectable
    /// threshold and must be purged from its host.
    #[must_use]
    pub fn is_cured(&self, config: &Config) -> bool {
        self.log10_density <= config.parasite_density_levels.log_parasite_density_cured
    }

    /// The density this lineage would reach after `duration` days under its
    /// current update behavior.
    #[must_use]
    pub fn next_density(&self, duration: i32, immune: &ImmuneSystem, config: &Config) -> f64 {
        match self.update_mode {
            DensityUpdate::Latent => self.log10_density,
            DensityUpdate::ImmuneClearance | DensityUpdate::DrugExposed => {
                let fitness = config.genotype_db[self.genotype].daily_fitness_multiple_infection;
                immune.parasite_size_after_t_days(
                    duration,
                    self.log10_density,
                    fitness,
                    &config.immune_system_information,
                )
            }
            DensityUpdate::ProgressToClinical => {
                config.parasite_density_levels.log_parasite_density_asymptomatic
            }
        }
    }

    /// Removes the given fraction of parasites, flooring at the cured
    /// threshold.
    pub fn perform_drug_action(&mut self, percent_parasite_remove: f64, config: &Config) {
        let cured = config.parasite_density_levels.log_parasite_density_cured;
        let mut new_size = self.log10_density;
        if percent_parasite_remove >= 1.0 {
            new_size = cured;
        } else {
            new_size += (1.0 - percent_parasite_remove).log10();
        }
        if new_size < cured {
            new_size = cured;
        }
        self.log10_density = new_size;
    }
}
