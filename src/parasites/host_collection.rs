//! The per-host collection of clonal parasite lineages.
//!
//! Holds the lineages infecting one individual, the per-entry
//! relative-effective-density cache, and the host's log10 total relative
//! density. All force-of-infection coupling goes through an explicit
//! two-step protocol: the caller detaches the host's contribution, mutates
//! lineages, recalculates the cache, then attaches the new contribution —
//! never as an implicit side effect of storage mutation.

use crate::config::{Config, LocationId, RelativeInfectivity};
use crate::drugs::DrugsInBlood;
use crate::immune::ImmuneSystem;
use crate::parasites::clonal::{
    ClonalParasitePopulation, DensityUpdate, ParasiteUid, LOG_ZERO_PARASITE_DENSITY,
};
use crate::population::foi::ForceOfInfection;
use crate::random::{cdf_standard_normal, RandomEngine};
use crate::therapy::GenotypeId;
use serde::{Deserialize, Serialize};

/// Maps a log10 transmissible density to the probability-like infectivity
/// weight used in force-of-infection accumulation.
#[must_use]
pub fn relative_infectivity(params: &RelativeInfectivity, log10_density: f64) -> f64 {
    if log10_density == LOG_ZERO_PARASITE_DENSITY {
        return 0.0;
    }
    let d_n = log10_density * params.sigma + params.ro_star;
    let p = cdf_standard_normal(d_n);
    p * p + 0.01
}

/// Apportions density across co-infecting lineages. Implementations return
/// one pre-normalization weight per lineage; the collection normalizes so
/// relative effective densities always sum to the host's total relative
/// density.
pub trait CoInfectionWeighting {
    fn weights(&self, linear_densities: &[f64]) -> Vec<f64>;
}

/// Free recombination: each lineage weighted in proportion to its own
/// density.
pub struct FreeRecombination;

impl CoInfectionWeighting for FreeRecombination {
    fn weights(&self, linear_densities: &[f64]) -> Vec<f64> {
        linear_densities.to_vec()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleHostClonalParasitePopulations {
    parasites: Vec<ClonalParasitePopulation>,
    /// Normalized relative effective density per lineage, aligned with
    /// `parasites`; sums to one whenever any lineage is transmissible.
    relative_effective_density: Vec<f64>,
    log10_total_relative_density: f64,
    uid_counter: u64,
}

impl SingleHostClonalParasitePopulations {
    #[must_use]
    pub fn new() -> SingleHostClonalParasitePopulations {
        SingleHostClonalParasitePopulations {
            parasites: Vec::new(),
            relative_effective_density: Vec::new(),
            log10_total_relative_density: LOG_ZERO_PARASITE_DENSITY,
            uid_counter: 0,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.parasites.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parasites.is_empty()
    }

    #[must_use]
    pub fn log10_total_relative_density(&self) -> f64 {
        self.log10_total_relative_density
    }

    #[must_use]
    pub fn relative_effective_density(&self) -> &[f64] {
        &self.relative_effective_density
    }

    #[must_use]
    pub fn contains(&self, uid: ParasiteUid) -> bool {
        self.parasites.iter().any(|parasite| parasite.uid == uid)
    }

    #[must_use]
    pub fn get(&self, uid: ParasiteUid) -> Option<&ClonalParasitePopulation> {
        self.parasites.iter().find(|parasite| parasite.uid == uid)
    }

    pub fn get_mut(&mut self, uid: ParasiteUid) -> Option<&mut ClonalParasitePopulation> {
        self.parasites
            .iter_mut()
            .find(|parasite| parasite.uid == uid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClonalParasitePopulation> {
        self.parasites.iter()
    }

    /// Adds a lineage track. The caller is responsible for the surrounding
    /// detach/recalculate/attach bracket.
    pub fn add(&mut self, genotype: GenotypeId, day: i32) -> ParasiteUid {
        let uid = self.uid_counter;
        self.uid_counter += 1;
        self.parasites
            .push(ClonalParasitePopulation::new(uid, genotype, day));
        uid
    }

    /// Drops every lineage at or below the cured threshold. Returns how
    /// many were removed.
    pub fn clear_cured_parasites(&mut self, config: &Config) -> usize {
        let before = self.parasites.len();
        self.parasites.retain(|parasite| !parasite.is_cured(config));
        before - self.parasites.len()
    }

    pub fn clear(&mut self) {
        self.parasites.clear();
    }

    /// Advances every lineage's density by its current update behavior.
    pub fn update(&mut self, duration: i32, immune: &ImmuneSystem, config: &Config) {
        for parasite in &mut self.parasites {
            let next = parasite.next_density(duration, immune, config);
            parasite.set_log10_density(next);
        }
    }

    /// Applies drug-mediated killing using current concentrations, then
    /// draws mutation steps for lineages under drug pressure. Returns the
    /// applied mutations as `(from, to)` genotype pairs.
    pub fn update_by_drugs(
        &mut self,
        drugs_in_blood: &DrugsInBlood,
        config: &Config,
        rng: &mut RandomEngine,
    ) -> Vec<(GenotypeId, GenotypeId)> {
        let mut mutations = Vec::new();
        if drugs_in_blood.is_empty() {
            return mutations;
        }
        for parasite in &mut self.parasites {
            let mut percent_parasite_remove = 0.0;
            for (drug_id, drug) in drugs_in_blood.iter() {
                let record = &config.drug_db[*drug_id];
                let ec50 = config.genotype_db[parasite.genotype].ec50_by_drug[*drug_id];
                let p = drug.parasite_killing_rate(record, ec50);
                percent_parasite_remove = percent_parasite_remove + p - percent_parasite_remove * p;
            }
            if percent_parasite_remove > 0.0 {
                parasite.perform_drug_action(percent_parasite_remove, config);
            }
            if parasite.is_cured(config) {
                continue;
            }
            let neighbors = &config.genotype_db[parasite.genotype].mutation_neighbors;
            if !neighbors.is_empty() && rng.random_flat() < config.mutation_probability {
                let target = neighbors[rng.random_uniform(neighbors.len())];
                mutations.push((parasite.genotype, target));
                parasite.genotype = target;
            }
        }
        mutations
    }

    pub fn change_all_update_modes(&mut self, from: DensityUpdate, to: DensityUpdate) {
        for parasite in &mut self.parasites {
            if parasite.update_mode == from {
                parasite.update_mode = to;
            }
        }
    }

    pub fn set_all_update_modes(&mut self, to: DensityUpdate) {
        for parasite in &mut self.parasites {
            parasite.update_mode = to;
        }
    }

    #[must_use]
    pub fn has_detectable_parasite(&self, config: &Config) -> bool {
        self.parasites.iter().any(|parasite| {
            parasite.log10_density()
                >= config.parasite_density_levels.log_parasite_density_detectable
        })
    }

    #[must_use]
    pub fn is_gametocytaemic(&self) -> bool {
        self.parasites
            .iter()
            .any(|parasite| parasite.gametocyte_level() > 0.0)
    }

    /// Rebuilds the relative-effective-density cache and the log10 total
    /// from current lineage state. Weights from the co-infection policy are
    /// normalized so the cache sums to the host's total relative density
    /// (one, in normalized units).
    pub fn recalculate(&mut self, weighting: &dyn CoInfectionWeighting) {
        let linear: Vec<f64> = self
            .parasites
            .iter()
            .map(|parasite| {
                let log10 = parasite.log10_relative_density();
                if log10 == LOG_ZERO_PARASITE_DENSITY {
                    0.0
                } else {
                    10f64.powf(log10)
                }
            })
            .collect();
        let total: f64 = linear.iter().sum();
        if total <= 0.0 {
            self.relative_effective_density = vec![0.0; self.parasites.len()];
            self.log10_total_relative_density = LOG_ZERO_PARASITE_DENSITY;
            return;
        }
        let weights = weighting.weights(&linear);
        debug_assert_eq!(weights.len(), self.parasites.len());
        let weight_total: f64 = weights.iter().sum();
        if weight_total <= 0.0 {
            self.relative_effective_density = vec![0.0; self.parasites.len()];
            self.log10_total_relative_density = LOG_ZERO_PARASITE_DENSITY;
            return;
        }
        self.relative_effective_density = weights
            .iter()
            .map(|weight| weight / weight_total)
            .collect();
        self.log10_total_relative_density = total.log10();
    }

    /// Adds (`sign = 1.0`) or removes (`sign = -1.0`) this host's current
    /// contribution to the location/genotype force-of-infection aggregate.
    pub fn change_infection_force(
        &self,
        sign: f64,
        location: LocationId,
        biting_level_value: f64,
        config: &Config,
        foi: &mut ForceOfInfection,
    ) {
        if self.log10_total_relative_density == LOG_ZERO_PARASITE_DENSITY {
            return;
        }
        let infectivity = relative_infectivity(
            &config.relative_infectivity,
            self.log10_total_relative_density,
        );
        for (parasite, density) in self.parasites.iter().zip(&self.relative_effective_density) {
            if *density == 0.0 {
                continue;
            }
            foi.deposit(
                location,
                parasite.genotype,
                sign * biting_level_value * infectivity * density,
            );
        }
    }
}

impl Default for SingleHostClonalParasitePopulations {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use assert_approx_eq::assert_approx_eq;

    fn collection_with_densities(densities: &[f64]) -> SingleHostClonalParasitePopulations {
        let mut collection = SingleHostClonalParasitePopulations::new();
        for (genotype, density) in densities.iter().enumerate() {
            let uid = collection.add(genotype % 2, 0);
            let parasite = collection.get_mut(uid).unwrap();
            parasite.set_log10_density(*density);
            parasite.set_gametocyte_level(1.0);
        }
        collection
    }

    #[test]
    fn free_recombination_shares_are_proportional() {
        let mut collection = collection_with_densities(&[2.0, 2.0]);
        collection.recalculate(&FreeRecombination);
        let total: f64 = 2.0 * 100.0;
        assert_approx_eq!(
            collection.log10_total_relative_density(),
            total.log10(),
            1e-12
        );
        assert_approx_eq!(collection.relative_effective_density()[0], 0.5, 1e-9);
        assert_approx_eq!(collection.relative_effective_density()[1], 0.5, 1e-9);
    }

    #[test]
    fn effective_densities_sum_to_the_host_total_for_any_policy() {
        struct SkewToFirst;
        impl CoInfectionWeighting for SkewToFirst {
            fn weights(&self, linear_densities: &[f64]) -> Vec<f64> {
                let mut weights = vec![1.0; linear_densities.len()];
                weights[0] = 9.0;
                weights
            }
        }
        let mut collection = collection_with_densities(&[3.0, 2.0, 1.0]);
        collection.recalculate(&SkewToFirst);
        let cache_total: f64 = collection.relative_effective_density().iter().sum();
        assert_approx_eq!(cache_total, 1.0, 1e-9);
        assert!(
            collection.relative_effective_density()[0]
                > collection.relative_effective_density()[1]
        );
    }

    #[test]
    fn empty_collection_has_sentinel_total() {
        let mut collection = SingleHostClonalParasitePopulations::new();
        collection.recalculate(&FreeRecombination);
        assert_eq!(
            collection.log10_total_relative_density(),
            LOG_ZERO_PARASITE_DENSITY
        );
    }

    #[test]
    fn immature_gametocytes_carry_no_weight() {
        let mut collection = SingleHostClonalParasitePopulations::new();
        let uid = collection.add(0, 0);
        collection.get_mut(uid).unwrap().set_log10_density(3.0);
        collection.recalculate(&FreeRecombination);
        assert_eq!(
            collection.log10_total_relative_density(),
            LOG_ZERO_PARASITE_DENSITY
        );
        assert_eq!(collection.relative_effective_density()[0], 0.0);
    }

    #[test]
    fn attach_then_detach_restores_the_aggregate_exactly() {
        let config = test_config();
        let mut foi = ForceOfInfection::new(
            config.number_of_locations(),
            config.number_of_genotypes(),
        );
        let mut collection = collection_with_densities(&[2.5, 1.5]);
        collection.recalculate(&FreeRecombination);

        let before = foi.current(0).to_vec();
        collection.change_infection_force(1.0, 0, 2.0, &config, &mut foi);
        assert!(foi.current(0).iter().sum::<f64>() > 0.0);
        collection.change_infection_force(-1.0, 0, 2.0, &config, &mut foi);
        for (restored, original) in foi.current(0).iter().zip(&before) {
            assert_eq!(*restored, *original);
        }
    }

    #[test]
    fn cured_parasites_are_purged() {
        let config = test_config();
        let mut collection = collection_with_densities(&[2.0]);
        let uid = collection.add(1, 0);
        collection
            .get_mut(uid)
            .unwrap()
            .set_log10_density(config.parasite_density_levels.log_parasite_density_cured);
        assert_eq!(collection.clear_cured_parasites(&config), 1);
        assert_eq!(collection.size(), 1);
    }

    #[test]
    fn drug_killing_reduces_every_lineage() {
        let config = test_config();
        let mut rng = RandomEngine::new(3);
        let mut collection = collection_with_densities(&[3.0, 2.0]);
        let mut drugs = DrugsInBlood::new();
        drugs.add_drug(crate::drugs::Drug {
            drug_id: 0,
            starting_value: 1.0,
            last_update_value: 1.0,
            last_update_day: 1,
            start_day: 0,
            end_day: 10,
            dosing_days: 3,
        });
        let densities_before: Vec<f64> = collection.iter().map(|p| p.log10_density()).collect();
        collection.update_by_drugs(&drugs, &config, &mut rng);
        for (parasite, before) in collection.iter().zip(&densities_before) {
            assert!(parasite.log10_density() < *before);
        }
    }

    #[test]
    fn relative_infectivity_is_monotone_in_density() {
        let config = test_config();
        let low = relative_infectivity(&config.relative_infectivity, 1.0);
        let high = relative_infectivity(&config.relative_infectivity, 5.0);
        assert!(high > low);
        assert_eq!(
            relative_infectivity(&config.relative_infectivity, LOG_ZERO_PARASITE_DENSITY),
            0.0
        );
    }
}
