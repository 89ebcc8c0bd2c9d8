//! Configuration consumed by the engine.
//!
//! The engine does not own configuration discovery: callers deserialize a
//! [`Config`] from JSON (or build one directly) and hand it to
//! [`Simulation`](crate::simulation::Simulation). `validate` turns invalid
//! cross-references into descriptive errors before a run starts, since they
//! indicate bad input data rather than a runtime condition.

use crate::error::MalsimError;
use crate::therapy::{DrugId, DrugRecord, GenotypeId, GenotypeRecord, Therapy, TherapyId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub const DAYS_IN_YEAR: i32 = 365;

pub type LocationId = usize;

/// Static description of one spatial location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationInfo {
    /// Number of residents created at initialization.
    pub population_size: usize,
    /// Scale factor from force of infection to daily infectious bites.
    pub beta: f64,
    /// Relative weight of each age class when seeding initial ages.
    pub age_distribution: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitingLevelInfo {
    pub number_of_biting_levels: usize,
    /// Probability of a new person landing in each biting level.
    pub biting_level_distribution: Vec<f64>,
    /// Relative number of bites received per level.
    pub biting_level_values: Vec<f64>,
    pub max_relative_biting_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingLevelInfo {
    pub number_of_moving_levels: usize,
    pub moving_level_distribution: Vec<f64>,
    /// Relative propensity to travel per level.
    pub moving_level_values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CirculationInfo {
    /// Fraction of a location's population that starts a trip per day.
    pub circulation_percent: f64,
    pub length_of_stay_mean: f64,
    pub length_of_stay_sd: f64,
}

/// Parameters of the density-to-infectivity curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelativeInfectivity {
    pub sigma: f64,
    pub ro_star: f64,
}

/// Distinguished log10 density levels. `cured` is the undetectable
/// threshold at which a lineage is purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParasiteDensityLevels {
    pub log_parasite_density_cured: f64,
    pub log_parasite_density_from_liver: f64,
    pub log_parasite_density_asymptomatic: f64,
    pub log_parasite_density_clinical: f64,
    pub log_parasite_density_detectable: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmuneSystemInformation {
    /// Daily immunity acquisition rate while parasites are present,
    /// indexed by age in years (the last entry applies onward).
    pub acquire_rate_by_age: Vec<f64>,
    /// Daily immunity decay rate while parasite-free.
    pub decay_rate: f64,
    /// Daily log10 growth factor of parasites in a fully naive host.
    pub c_max: f64,
    /// Daily log10 growth factor of parasites in a fully immune host.
    pub c_min: f64,
    pub min_clinical_probability: f64,
    pub max_clinical_probability: f64,
    /// Shape exponent of the immunity-to-clinical-progression curve.
    pub immune_effect_on_progression_to_clinical: f64,
}

impl ImmuneSystemInformation {
    #[must_use]
    pub fn acquire_rate(&self, age: u32) -> f64 {
        let index = (age as usize).min(self.acquire_rate_by_age.len() - 1);
        self.acquire_rate_by_age[index]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentCoverage {
    pub p_treatment_under_5_by_location: Vec<f64>,
    pub p_treatment_over_5_by_location: Vec<f64>,
    /// Therapy administered to treated clinical cases, per location.
    pub therapy_id_by_location: Vec<TherapyId>,
}

impl TreatmentCoverage {
    /// Probability that a clinical case at this location seeks treatment.
    /// Presumes 0-59 months for under-5.
    #[must_use]
    pub fn probability_to_be_treated(&self, location: LocationId, age: u32) -> f64 {
        if age < 5 {
            self.p_treatment_under_5_by_location[location]
        } else {
            self.p_treatment_over_5_by_location[location]
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetaShape {
    pub alpha: f64,
    pub beta: f64,
}

/// Parameters for the per-person probability of being present at a mass
/// drug administration round, by age bracket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdaPresence {
    pub mean_prob_individual_present_at_mda: Vec<f64>,
    pub prob_present_at_mda_distribution: Vec<BetaShape>,
    pub age_bracket_prob_individual_present_at_mda: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialParasiteCase {
    pub location: LocationId,
    pub genotype: GenotypeId,
    pub number_of_cases: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of simulated days.
    pub total_time: i32,
    /// Day from which lifetime bite counts are accumulated.
    pub start_collect_data_day: i32,
    /// Upper age bound (exclusive, years) of each age class.
    pub age_structure: Vec<u32>,
    pub locations: Vec<LocationInfo>,
    /// Births per person per year.
    pub birth_rate: f64,
    /// Deaths per person per year, by age class.
    pub death_rate_by_age_class: Vec<f64>,
    pub mortality_when_treatment_fail_by_age_class: Vec<f64>,
    /// Probability that an infectious bite infects a fully naive host.
    pub transmission_parameter: f64,
    pub relative_biting_info: BitingLevelInfo,
    pub using_age_dependent_biting_level: bool,
    pub relative_infectivity: RelativeInfectivity,
    pub moving_level_info: MovingLevelInfo,
    pub circulation_info: CirculationInfo,
    /// Relative weight of travelling from row location to column location.
    pub spatial_weights: Vec<Vec<f64>>,
    pub parasite_density_levels: ParasiteDensityLevels,
    pub immune_system_information: ImmuneSystemInformation,
    pub days_to_clinical_under_five: i32,
    pub days_to_clinical_over_five: i32,
    pub days_mature_gametocyte_under_five: i32,
    pub days_mature_gametocyte_over_five: i32,
    pub gametocyte_level_full: f64,
    pub p_relapse: f64,
    pub relapse_duration: i32,
    /// Period of the recurring whole-host update event, in days.
    pub update_frequency: i32,
    /// Days after treatment at which failure is tested.
    pub tf_testing_day: i32,
    pub p_interrupted_feeding: f64,
    /// Daily probability that a lineage under drug pressure mutates.
    pub mutation_probability: f64,
    pub treatment_coverage: TreatmentCoverage,
    pub mda: MdaPresence,
    pub drug_db: Vec<DrugRecord>,
    pub therapy_db: Vec<Therapy>,
    pub genotype_db: Vec<GenotypeRecord>,
    pub initial_parasite_cases: Vec<InitialParasiteCase>,
}

impl Config {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Config, MalsimError> {
        let file = File::open(path)?;
        let config: Config = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error when the string cannot be parsed or validated.
    pub fn from_json_str(json: &str) -> Result<Config, MalsimError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn number_of_locations(&self) -> usize {
        self.locations.len()
    }

    #[must_use]
    pub fn number_of_age_classes(&self) -> usize {
        self.age_structure.len()
    }

    #[must_use]
    pub fn number_of_genotypes(&self) -> usize {
        self.genotype_db.len()
    }

    /// Age class containing the given age in years.
    #[must_use]
    pub fn age_class_of(&self, age: u32) -> usize {
        let mut age_class = 0;
        while age_class < self.age_structure.len() - 1 && age >= self.age_structure[age_class] {
            age_class += 1;
        }
        age_class
    }

    /// Looks up a drug record; an unknown id is a configuration-reference
    /// error.
    pub fn drug(&self, id: DrugId) -> Result<&DrugRecord, MalsimError> {
        self.drug_db
            .get(id)
            .ok_or_else(|| MalsimError::from(format!("unknown drug id ({id})")))
    }

    /// Looks up a therapy; an unknown id is a configuration-reference error.
    pub fn therapy(&self, id: TherapyId) -> Result<&Therapy, MalsimError> {
        self.therapy_db
            .get(id)
            .ok_or_else(|| MalsimError::from(format!("unknown therapy id ({id})")))
    }

    /// Looks up a genotype; an unknown id is a configuration-reference
    /// error.
    pub fn genotype(&self, id: GenotypeId) -> Result<&GenotypeRecord, MalsimError> {
        self.genotype_db
            .get(id)
            .ok_or_else(|| MalsimError::from(format!("unknown genotype id ({id})")))
    }

    /// Checks internal cross-references and table shapes.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error for the first inconsistency found.
    pub fn validate(&self) -> Result<(), MalsimError> {
        let locations = self.number_of_locations();
        let age_classes = self.number_of_age_classes();
        if locations == 0 {
            return Err("at least one location is required".into());
        }
        if age_classes == 0 {
            return Err("at least one age class is required".into());
        }
        if self.death_rate_by_age_class.len() != age_classes
            || self.mortality_when_treatment_fail_by_age_class.len() != age_classes
        {
            return Err("mortality tables must cover every age class".into());
        }
        if self.spatial_weights.len() != locations
            || self.spatial_weights.iter().any(|row| row.len() != locations)
        {
            return Err("spatial weights must be a square location matrix".into());
        }
        let coverage = &self.treatment_coverage;
        if coverage.p_treatment_under_5_by_location.len() != locations
            || coverage.p_treatment_over_5_by_location.len() != locations
            || coverage.therapy_id_by_location.len() != locations
        {
            return Err("treatment coverage tables must cover every location".into());
        }
        let biting = &self.relative_biting_info;
        if biting.biting_level_distribution.len() != biting.number_of_biting_levels
            || biting.biting_level_values.len() != biting.number_of_biting_levels
        {
            return Err("biting level tables must match the number of levels".into());
        }
        let moving = &self.moving_level_info;
        if moving.moving_level_distribution.len() != moving.number_of_moving_levels
            || moving.moving_level_values.len() != moving.number_of_moving_levels
        {
            return Err("moving level tables must match the number of levels".into());
        }
        if self.immune_system_information.acquire_rate_by_age.is_empty() {
            return Err("immunity acquisition rates must not be empty".into());
        }
        for (index, drug) in self.drug_db.iter().enumerate() {
            if drug.id != index {
                return Err(format!("drug db entry {index} has mismatched id {}", drug.id).into());
            }
            if drug.age_specific_drug_absorption.len() != age_classes
                || drug.age_specific_drug_concentration_sd.len() != age_classes
            {
                return Err(format!(
                    "drug ({}) absorption tables must cover every age class",
                    drug.id
                )
                .into());
            }
        }
        for (index, genotype) in self.genotype_db.iter().enumerate() {
            if genotype.id != index {
                return Err(format!(
                    "genotype db entry {index} has mismatched id {}",
                    genotype.id
                )
                .into());
            }
            if genotype.ec50_by_drug.len() != self.drug_db.len() {
                return Err(format!(
                    "genotype ({}) must declare an EC50 for every drug",
                    genotype.id
                )
                .into());
            }
            if genotype
                .mutation_neighbors
                .iter()
                .any(|id| *id >= self.genotype_db.len())
            {
                return Err(format!(
                    "genotype ({}) has a mutation neighbor outside the genotype db",
                    genotype.id
                )
                .into());
            }
        }
        for (index, therapy) in self.therapy_db.iter().enumerate() {
            if therapy.id() != index {
                return Err(format!(
                    "therapy db entry {index} has mismatched id {}",
                    therapy.id()
                )
                .into());
            }
            match therapy {
                Therapy::Simple(simple) => {
                    for drug_id in &simple.drug_ids {
                        self.drug(*drug_id)?;
                    }
                    if !simple.full_compliance && simple.pr_completed_days.is_empty() {
                        return Err(format!(
                            "therapy ({}) without full compliance needs completion probabilities",
                            simple.id
                        )
                        .into());
                    }
                }
                Therapy::Composite(composite) => {
                    if composite.therapy_ids.len() != composite.start_at_days.len() {
                        return Err(format!(
                            "complex therapy ({}) must pair every sub-therapy with a start day",
                            composite.id
                        )
                        .into());
                    }
                    for (therapy_id, start_day) in
                        composite.therapy_ids.iter().zip(&composite.start_at_days)
                    {
                        match self.therapy_db.get(*therapy_id) {
                            Some(Therapy::Simple(simple)) if simple.full_compliance => {}
                            Some(Therapy::Simple(_)) => {
                                return Err(format!(
                                    "complex therapy ({}) contains a reference to a therapy \
                                     ({therapy_id}) that has variable compliance",
                                    composite.id
                                )
                                .into());
                            }
                            _ => {
                                return Err(format!(
                                    "complex therapy ({}) contains a reference to an unknown \
                                     therapy id ({therapy_id})",
                                    composite.id
                                )
                                .into());
                            }
                        }
                        if *start_day < 1 {
                            return Err(format!(
                                "complex therapy ({}) has a start day before day 1",
                                composite.id
                            )
                            .into());
                        }
                    }
                }
            }
        }
        for case in &self.initial_parasite_cases {
            if case.location >= locations {
                return Err("initial parasite case references an unknown location".into());
            }
            self.genotype(case.genotype)?;
        }
        for therapy_id in &coverage.therapy_id_by_location {
            self.therapy(*therapy_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    use crate::therapy::{CompositeTherapy, SimpleTherapy};

    Config {
        total_time: 120,
        start_collect_data_day: 0,
        age_structure: vec![5, 15, 60, 100],
        locations: vec![
            LocationInfo {
                population_size: 40,
                beta: 0.05,
                age_distribution: vec![0.25, 0.25, 0.4, 0.1],
            },
            LocationInfo {
                population_size: 30,
                beta: 0.08,
                age_distribution: vec![0.25, 0.25, 0.4, 0.1],
            },
        ],
        birth_rate: 0.03,
        death_rate_by_age_class: vec![0.05, 0.01, 0.01, 0.2],
        mortality_when_treatment_fail_by_age_class: vec![0.1, 0.05, 0.05, 0.1],
        transmission_parameter: 0.3,
        relative_biting_info: BitingLevelInfo {
            number_of_biting_levels: 5,
            biting_level_distribution: vec![0.3, 0.3, 0.2, 0.15, 0.05],
            biting_level_values: vec![1.0, 2.0, 4.0, 8.0, 16.0],
            max_relative_biting_value: 16.0,
        },
        using_age_dependent_biting_level: false,
        relative_infectivity: RelativeInfectivity {
            sigma: 0.3,
            ro_star: 0.1,
        },
        moving_level_info: MovingLevelInfo {
            number_of_moving_levels: 3,
            moving_level_distribution: vec![0.7, 0.2, 0.1],
            moving_level_values: vec![1.0, 3.0, 9.0],
        },
        circulation_info: CirculationInfo {
            circulation_percent: 0.01,
            length_of_stay_mean: 5.0,
            length_of_stay_sd: 2.0,
        },
        spatial_weights: vec![vec![0.0, 1.0], vec![1.0, 0.0]],
        parasite_density_levels: ParasiteDensityLevels {
            log_parasite_density_cured: -4.699,
            log_parasite_density_from_liver: -2.0,
            log_parasite_density_asymptomatic: 3.0,
            log_parasite_density_clinical: 4.301,
            log_parasite_density_detectable: 1.0,
        },
        immune_system_information: ImmuneSystemInformation {
            acquire_rate_by_age: vec![0.00125, 0.0025, 0.005, 0.01],
            decay_rate: 0.0025,
            c_max: 1.23,
            c_min: 0.8,
            min_clinical_probability: 0.05,
            max_clinical_probability: 0.99,
            immune_effect_on_progression_to_clinical: 4.0,
        },
        days_to_clinical_under_five: 4,
        days_to_clinical_over_five: 6,
        days_mature_gametocyte_under_five: 4,
        days_mature_gametocyte_over_five: 6,
        gametocyte_level_full: 1.0,
        p_relapse: 0.1,
        relapse_duration: 30,
        update_frequency: 7,
        tf_testing_day: 28,
        p_interrupted_feeding: 0.19,
        mutation_probability: 0.005,
        treatment_coverage: TreatmentCoverage {
            p_treatment_under_5_by_location: vec![0.6, 0.5],
            p_treatment_over_5_by_location: vec![0.5, 0.4],
            therapy_id_by_location: vec![0, 0],
        },
        mda: MdaPresence {
            mean_prob_individual_present_at_mda: vec![0.85, 0.75, 0.85],
            prob_present_at_mda_distribution: vec![
                BetaShape {
                    alpha: 8.5,
                    beta: 1.5,
                },
                BetaShape {
                    alpha: 7.5,
                    beta: 2.5,
                },
                BetaShape {
                    alpha: 8.5,
                    beta: 1.5,
                },
            ],
            age_bracket_prob_individual_present_at_mda: vec![10, 40],
        },
        drug_db: vec![
            DrugRecord {
                id: 0,
                name: "ART".to_string(),
                drug_half_life: 1.0,
                maximum_parasite_killing_rate: 0.999,
                n: 25.0,
                cut_off_value: 0.1,
                age_specific_drug_absorption: vec![0.7, 0.85, 1.0, 1.0],
                age_specific_drug_concentration_sd: vec![0.4, 0.4, 0.4, 0.4],
            },
            DrugRecord {
                id: 1,
                name: "LUM".to_string(),
                drug_half_life: 4.5,
                maximum_parasite_killing_rate: 0.99,
                n: 20.0,
                cut_off_value: 0.1,
                age_specific_drug_absorption: vec![0.7, 0.85, 1.0, 1.0],
                age_specific_drug_concentration_sd: vec![0.4, 0.4, 0.4, 0.4],
            },
        ],
        therapy_db: vec![
            Therapy::Simple(SimpleTherapy {
                id: 0,
                drug_ids: vec![0, 1],
                max_dosing_day: 3,
                full_compliance: true,
                pr_completed_days: vec![],
            }),
            Therapy::Simple(SimpleTherapy {
                id: 1,
                drug_ids: vec![1],
                max_dosing_day: 3,
                full_compliance: false,
                pr_completed_days: vec![0.2, 0.3, 0.5],
            }),
            Therapy::Composite(CompositeTherapy {
                id: 2,
                therapy_ids: vec![0, 0],
                start_at_days: vec![1, 8],
            }),
        ],
        genotype_db: vec![
            GenotypeRecord {
                id: 0,
                daily_fitness_multiple_infection: 1.0,
                ec50_by_drug: vec![0.75, 0.6],
                mutation_neighbors: vec![1],
            },
            GenotypeRecord {
                id: 1,
                daily_fitness_multiple_infection: 0.95,
                ec50_by_drug: vec![1.2, 0.6],
                mutation_neighbors: vec![0],
            },
        ],
        initial_parasite_cases: vec![
            InitialParasiteCase {
                location: 0,
                genotype: 0,
                number_of_cases: 4,
            },
            InitialParasiteCase {
                location: 1,
                genotype: 1,
                number_of_cases: 3,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_validates() {
        test_config().validate().unwrap();
    }

    #[test]
    fn age_class_boundaries() {
        let config = test_config();
        assert_eq!(config.age_class_of(0), 0);
        assert_eq!(config.age_class_of(4), 0);
        assert_eq!(config.age_class_of(5), 1);
        assert_eq!(config.age_class_of(59), 2);
        assert_eq!(config.age_class_of(200), 3);
    }

    #[test]
    fn composite_referencing_unknown_therapy_fails() {
        let mut config = test_config();
        if let Therapy::Composite(composite) = &mut config.therapy_db[2] {
            composite.therapy_ids[0] = 99;
        }
        let error = config.validate().unwrap_err();
        assert!(format!("{error}").contains("unknown"));
    }

    #[test]
    fn composite_referencing_variable_compliance_fails() {
        let mut config = test_config();
        if let Therapy::Composite(composite) = &mut config.therapy_db[2] {
            composite.therapy_ids[0] = 1;
        }
        let error = config.validate().unwrap_err();
        assert!(format!("{error}").contains("variable compliance"));
    }

    #[test]
    fn json_round_trip() {
        let config = test_config();
        let json = serde_json::to_string(&config).unwrap();
        let restored = Config::from_json_str(&json).unwrap();
        assert_eq!(restored.number_of_locations(), 2);
        assert_eq!(restored.therapy_db.len(), 3);
    }

    #[test]
    fn treatment_coverage_age_split() {
        let config = test_config();
        let coverage = &config.treatment_coverage;
        assert_eq!(coverage.probability_to_be_treated(0, 4), 0.6);
        assert_eq!(coverage.probability_to_be_treated(0, 5), 0.5);
    }
}
