//! Per-host pharmacokinetic tracks, one per active compound.
//!
//! Concentrations are relative to the individually drawn absorption level:
//! they build linearly over the dosing days, then decay exponentially with
//! the compound's half-life. A track is purged once it falls below the
//! compound's cutoff.

use crate::config::Config;
use crate::therapy::{DrugId, DrugRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drug {
    pub drug_id: DrugId,
    pub starting_value: f64,
    pub last_update_value: f64,
    pub last_update_day: i32,
    pub start_day: i32,
    pub end_day: i32,
    pub dosing_days: i32,
}

impl Drug {
    /// Concentration on the given day: linear build-up while dosing, then
    /// exponential decay at the compound's half-life.
    #[must_use]
    pub fn concentration_at(&self, day: i32, record: &DrugRecord) -> f64 {
        let days = day - self.start_day;
        if days <= 0 {
            return 0.0;
        }
        if days <= self.dosing_days {
            return self.starting_value * f64::from(days) / f64::from(self.dosing_days);
        }
        let decay_days = f64::from(days - self.dosing_days);
        self.starting_value * (-decay_days * std::f64::consts::LN_2 / record.drug_half_life).exp()
    }

    pub fn update(&mut self, day: i32, record: &DrugRecord) {
        self.last_update_value = self.concentration_at(day, record);
        self.last_update_day = day;
    }

    /// Fraction of parasites with the given EC50 killed per day at the
    /// current concentration.
    #[must_use]
    pub fn parasite_killing_rate(&self, record: &DrugRecord, ec50: f64) -> f64 {
        record.parasite_killing_rate(self.last_update_value, ec50)
    }
}

/// The set of drug tracks currently in a host's blood, keyed by compound
/// id. Keyed iteration order is part of the reproducibility contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrugsInBlood {
    drugs: BTreeMap<DrugId, Drug>,
}

impl DrugsInBlood {
    #[must_use]
    pub fn new() -> DrugsInBlood {
        DrugsInBlood {
            drugs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drugs.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.drugs.len()
    }

    #[must_use]
    pub fn contains(&self, drug_id: DrugId) -> bool {
        self.drugs.contains_key(&drug_id)
    }

    #[must_use]
    pub fn get(&self, drug_id: DrugId) -> Option<&Drug> {
        self.drugs.get(&drug_id)
    }

    /// Adds a course of treatment, replacing any track of the same compound.
    pub fn add_drug(&mut self, drug: Drug) {
        self.drugs.insert(drug.drug_id, drug);
    }

    /// Decays every track to the given day.
    pub fn update(&mut self, day: i32, config: &Config) {
        for drug in self.drugs.values_mut() {
            let record = &config.drug_db[drug.drug_id];
            drug.update(day, record);
        }
    }

    /// Purges tracks that decayed below their compound's cutoff.
    pub fn clear_cut_off_drugs(&mut self, config: &Config) {
        self.drugs
            .retain(|id, drug| drug.last_update_value > config.drug_db[*id].cut_off_value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DrugId, &Drug)> {
        self.drugs.iter()
    }

    pub fn clear(&mut self) {
        self.drugs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use assert_approx_eq::assert_approx_eq;

    fn course(drug_id: DrugId, start_day: i32, dosing_days: i32) -> Drug {
        Drug {
            drug_id,
            starting_value: 1.0,
            last_update_value: 0.0,
            last_update_day: start_day,
            start_day,
            end_day: start_day + 10,
            dosing_days,
        }
    }

    #[test]
    fn builds_up_then_decays() {
        let config = test_config();
        let record = &config.drug_db[0];
        let drug = course(0, 0, 3);
        assert_eq!(drug.concentration_at(0, record), 0.0);
        assert_approx_eq!(drug.concentration_at(1, record), 1.0 / 3.0, 1e-12);
        assert_approx_eq!(drug.concentration_at(3, record), 1.0, 1e-12);
        // Half-life of one day halves the peak each day after dosing.
        assert_approx_eq!(drug.concentration_at(4, record), 0.5, 1e-12);
        assert_approx_eq!(drug.concentration_at(5, record), 0.25, 1e-12);
    }

    #[test]
    fn update_tracks_current_day() {
        let config = test_config();
        let mut blood = DrugsInBlood::new();
        blood.add_drug(course(0, 0, 3));
        blood.update(4, &config);
        assert_approx_eq!(blood.get(0).unwrap().last_update_value, 0.5, 1e-12);
        assert_eq!(blood.get(0).unwrap().last_update_day, 4);
    }

    #[test]
    fn purges_below_cutoff() {
        let config = test_config();
        let mut blood = DrugsInBlood::new();
        blood.add_drug(course(0, 0, 3));
        blood.add_drug(course(1, 0, 3));
        // Day 8: the short half-life compound is at 1/32, the long one well
        // above its cutoff.
        blood.update(8, &config);
        blood.clear_cut_off_drugs(&config);
        assert!(!blood.contains(0));
        assert!(blood.contains(1));
    }

    #[test]
    fn re_adding_a_compound_replaces_the_track() {
        let mut blood = DrugsInBlood::new();
        blood.add_drug(course(0, 0, 3));
        blood.add_drug(Drug {
            starting_value: 2.0,
            ..course(0, 5, 3)
        });
        assert_eq!(blood.len(), 1);
        assert_approx_eq!(blood.get(0).unwrap().starting_value, 2.0, 1e-12);
    }
}
