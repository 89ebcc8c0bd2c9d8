//! Reference tables for drugs, therapies and parasite genotypes.
//!
//! The engine consumes these as opaque lookup tables keyed by small integer
//! ids; they are deserialized as part of [`Config`](crate::config::Config)
//! and never mutated during a run.

use serde::{Deserialize, Serialize};

pub type DrugId = usize;
pub type TherapyId = usize;
pub type GenotypeId = usize;

/// Pharmacokinetic and pharmacodynamic parameters for one compound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugRecord {
    pub id: DrugId,
    pub name: String,
    /// Elimination half-life in days once dosing has finished.
    pub drug_half_life: f64,
    /// Maximum fraction of parasites killed per day at saturating
    /// concentration.
    pub maximum_parasite_killing_rate: f64,
    /// Hill coefficient of the concentration-killing curve.
    pub n: f64,
    /// Concentration below which the blood track is purged.
    pub cut_off_value: f64,
    /// Mean relative absorption by age class.
    pub age_specific_drug_absorption: Vec<f64>,
    /// Standard deviation of absorption by age class.
    pub age_specific_drug_concentration_sd: Vec<f64>,
}

impl DrugRecord {
    /// Days from first dose until the concentration decays below the
    /// cutoff, assuming a unit starting level.
    #[must_use]
    pub fn total_duration_of_drug_activity(&self, dosing_days: i32) -> i32 {
        #[allow(clippy::cast_possible_truncation)]
        let decay_days = (self.drug_half_life * (1.0 / self.cut_off_value).log2()).ceil() as i32;
        dosing_days + decay_days
    }

    /// Fraction of parasites killed per day at the given concentration,
    /// against a genotype with the given EC50.
    #[must_use]
    pub fn parasite_killing_rate(&self, concentration: f64, ec50: f64) -> f64 {
        if concentration <= 0.0 {
            return 0.0;
        }
        let cn = concentration.powf(self.n);
        self.maximum_parasite_killing_rate * cn / (cn + ec50.powf(self.n))
    }
}

/// A single dosing regimen with one compliance model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleTherapy {
    pub id: TherapyId,
    pub drug_ids: Vec<DrugId>,
    pub max_dosing_day: i32,
    pub full_compliance: bool,
    /// Probability of completing the regimen on day 1, 2, ... Ignored when
    /// `full_compliance` is set.
    pub pr_completed_days: Vec<f64>,
}

/// A multi-day regimen composed of simple therapies started at offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeTherapy {
    pub id: TherapyId,
    pub therapy_ids: Vec<TherapyId>,
    /// One-based start day for each referenced therapy.
    pub start_at_days: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Therapy {
    Simple(SimpleTherapy),
    Composite(CompositeTherapy),
}

impl Therapy {
    #[must_use]
    pub fn id(&self) -> TherapyId {
        match self {
            Therapy::Simple(therapy) => therapy.id,
            Therapy::Composite(therapy) => therapy.id,
        }
    }
}

/// One parasite genotype, with its drug response and mutation neighborhood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenotypeRecord {
    pub id: GenotypeId,
    /// Daily growth penalty applied when competing in a multi-genotype
    /// infection.
    pub daily_fitness_multiple_infection: f64,
    /// EC50 against each drug, indexed by drug id.
    pub ec50_by_drug: Vec<f64>,
    /// Genotypes reachable by a single mutation step under drug pressure.
    pub mutation_neighbors: Vec<GenotypeId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn drug() -> DrugRecord {
        DrugRecord {
            id: 0,
            name: "AS".to_string(),
            drug_half_life: 2.0,
            maximum_parasite_killing_rate: 0.999,
            n: 10.0,
            cut_off_value: 0.1,
            age_specific_drug_absorption: vec![1.0; 4],
            age_specific_drug_concentration_sd: vec![0.1; 4],
        }
    }

    #[test]
    fn killing_rate_saturates_at_max() {
        let drug = drug();
        let rate = drug.parasite_killing_rate(10.0, 0.5);
        assert!(rate < drug.maximum_parasite_killing_rate);
        assert_approx_eq!(rate, drug.maximum_parasite_killing_rate, 1e-3);
    }

    #[test]
    fn killing_rate_zero_without_drug() {
        assert_eq!(drug().parasite_killing_rate(0.0, 0.5), 0.0);
    }

    #[test]
    fn killing_rate_half_max_at_ec50() {
        let drug = drug();
        let rate = drug.parasite_killing_rate(0.5, 0.5);
        assert_approx_eq!(rate, drug.maximum_parasite_killing_rate / 2.0, 1e-9);
    }

    #[test]
    fn activity_duration_includes_decay_tail() {
        // Half-life 2d, cutoff 0.1: ceil(2 * log2(10)) = 7 extra days.
        assert_eq!(drug().total_duration_of_drug_activity(3), 10);
    }

    #[test]
    fn therapy_json_tagging() {
        let json = r#"{
            "type": "Simple",
            "id": 0,
            "drug_ids": [0],
            "max_dosing_day": 3,
            "full_compliance": true,
            "pr_completed_days": []
        }"#;
        let therapy: Therapy = serde_json::from_str(json).unwrap();
        assert!(matches!(therapy, Therapy::Simple(_)));
        assert_eq!(therapy.id(), 0);
    }
}
