//! End-to-end tests of the engine against a JSON-loaded configuration.

use malsim::prelude::*;
use malsim::reporting::LocationTally;
use std::io::Write;

const CONFIG_JSON: &str = r#"{
    "total_time": 60,
    "start_collect_data_day": 0,
    "age_structure": [5, 15, 60, 100],
    "locations": [
        { "population_size": 50, "beta": 0.05, "age_distribution": [0.25, 0.25, 0.4, 0.1] },
        { "population_size": 30, "beta": 0.08, "age_distribution": [0.25, 0.25, 0.4, 0.1] }
    ],
    "birth_rate": 0.03,
    "death_rate_by_age_class": [0.05, 0.01, 0.01, 0.2],
    "mortality_when_treatment_fail_by_age_class": [0.1, 0.05, 0.05, 0.1],
    "transmission_parameter": 0.3,
    "relative_biting_info": {
        "number_of_biting_levels": 5,
        "biting_level_distribution": [0.3, 0.3, 0.2, 0.15, 0.05],
        "biting_level_values": [1.0, 2.0, 4.0, 8.0, 16.0],
        "max_relative_biting_value": 16.0
    },
    "using_age_dependent_biting_level": false,
    "relative_infectivity": { "sigma": 0.3, "ro_star": 0.1 },
    "moving_level_info": {
        "number_of_moving_levels": 3,
        "moving_level_distribution": [0.7, 0.2, 0.1],
        "moving_level_values": [1.0, 3.0, 9.0]
    },
    "circulation_info": {
        "circulation_percent": 0.01,
        "length_of_stay_mean": 5.0,
        "length_of_stay_sd": 2.0
    },
    "spatial_weights": [[0.0, 1.0], [1.0, 0.0]],
    "parasite_density_levels": {
        "log_parasite_density_cured": -4.699,
        "log_parasite_density_from_liver": -2.0,
        "log_parasite_density_asymptomatic": 3.0,
        "log_parasite_density_clinical": 4.301,
        "log_parasite_density_detectable": 1.0
    },
    "immune_system_information": {
        "acquire_rate_by_age": [0.00125, 0.0025, 0.005, 0.01],
        "decay_rate": 0.0025,
        "c_max": 1.23,
        "c_min": 0.8,
        "min_clinical_probability": 0.05,
        "max_clinical_probability": 0.99,
        "immune_effect_on_progression_to_clinical": 4.0
    },
    "days_to_clinical_under_five": 4,
    "days_to_clinical_over_five": 6,
    "days_mature_gametocyte_under_five": 4,
    "days_mature_gametocyte_over_five": 6,
    "gametocyte_level_full": 1.0,
    "p_relapse": 0.1,
    "relapse_duration": 30,
    "update_frequency": 7,
    "tf_testing_day": 28,
    "p_interrupted_feeding": 0.19,
    "mutation_probability": 0.005,
    "treatment_coverage": {
        "p_treatment_under_5_by_location": [0.6, 0.5],
        "p_treatment_over_5_by_location": [0.5, 0.4],
        "therapy_id_by_location": [0, 0]
    },
    "mda": {
        "mean_prob_individual_present_at_mda": [0.85, 0.75, 0.85],
        "prob_present_at_mda_distribution": [
            { "alpha": 8.5, "beta": 1.5 },
            { "alpha": 7.5, "beta": 2.5 },
            { "alpha": 8.5, "beta": 1.5 }
        ],
        "age_bracket_prob_individual_present_at_mda": [10, 40]
    },
    "drug_db": [
        {
            "id": 0,
            "name": "ART",
            "drug_half_life": 1.0,
            "maximum_parasite_killing_rate": 0.999,
            "n": 25.0,
            "cut_off_value": 0.1,
            "age_specific_drug_absorption": [0.7, 0.85, 1.0, 1.0],
            "age_specific_drug_concentration_sd": [0.4, 0.4, 0.4, 0.4]
        },
        {
            "id": 1,
            "name": "LUM",
            "drug_half_life": 4.5,
            "maximum_parasite_killing_rate": 0.99,
            "n": 20.0,
            "cut_off_value": 0.1,
            "age_specific_drug_absorption": [0.7, 0.85, 1.0, 1.0],
            "age_specific_drug_concentration_sd": [0.4, 0.4, 0.4, 0.4]
        }
    ],
    "therapy_db": [
        {
            "type": "Simple",
            "id": 0,
            "drug_ids": [0, 1],
            "max_dosing_day": 3,
            "full_compliance": true,
            "pr_completed_days": []
        },
        {
            "type": "Simple",
            "id": 1,
            "drug_ids": [1],
            "max_dosing_day": 3,
            "full_compliance": false,
            "pr_completed_days": [0.2, 0.3, 0.5]
        },
        {
            "type": "Composite",
            "id": 2,
            "therapy_ids": [0, 0],
            "start_at_days": [1, 8]
        }
    ],
    "genotype_db": [
        {
            "id": 0,
            "daily_fitness_multiple_infection": 1.0,
            "ec50_by_drug": [0.75, 0.6],
            "mutation_neighbors": [1]
        },
        {
            "id": 1,
            "daily_fitness_multiple_infection": 0.95,
            "ec50_by_drug": [1.2, 0.6],
            "mutation_neighbors": [0]
        }
    ],
    "initial_parasite_cases": [
        { "location": 0, "genotype": 0, "number_of_cases": 5 },
        { "location": 1, "genotype": 1, "number_of_cases": 3 }
    ]
}"#;

fn run_once(seed: u64) -> (usize, i32, Vec<LocationTally>) {
    let config = Config::from_json_str(CONFIG_JSON).unwrap();
    let locations = config.number_of_locations();
    let mut simulation =
        Simulation::new(config, seed, Box::new(TallyReporter::new(locations))).unwrap();
    simulation.run().unwrap();
    let size = simulation.population().size();
    let day = simulation.current_day();
    let reporter: Box<dyn std::any::Any> = simulation.into_reporter();
    let tallies = reporter.downcast::<TallyReporter>().unwrap().snapshot();
    (size, day, tallies)
}

#[test]
fn config_loads_from_json_and_from_disk() {
    let config = Config::from_json_str(CONFIG_JSON).unwrap();
    assert_eq!(config.number_of_locations(), 2);
    assert_eq!(config.number_of_age_classes(), 4);
    assert_eq!(config.therapy_db.len(), 3);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG_JSON.as_bytes()).unwrap();
    let from_disk = Config::load(file.path()).unwrap();
    assert_eq!(from_disk.total_time, config.total_time);
}

#[test]
fn a_full_run_completes_and_produces_activity() {
    let (size, day, tallies) = run_once(2024);
    assert_eq!(day, 60);
    assert!(size > 0);
    let total_infections: u64 = tallies.iter().map(|tally| tally.new_infections).sum();
    assert!(total_infections > 0, "no transmission over sixty days");
}

#[test]
fn fixed_seed_reproduces_aggregate_statistics_exactly() {
    let first = run_once(42);
    let second = run_once(42);
    assert_eq!(first, second);
}

#[test]
fn tallies_serialize_to_csv() {
    let config = Config::from_json_str(CONFIG_JSON).unwrap();
    let locations = config.number_of_locations();
    let mut simulation =
        Simulation::new(config, 7, Box::new(TallyReporter::new(locations))).unwrap();
    for _ in 0..10 {
        simulation.advance_one_day().unwrap();
    }
    let reporter: Box<dyn std::any::Any> = simulation.into_reporter();
    let tally = reporter.downcast::<TallyReporter>().unwrap();
    let mut buffer = Vec::new();
    tally.write_csv(&mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert_eq!(text.trim().lines().count(), locations + 1);
}

#[test]
fn injected_policies_change_transmission_but_not_validity() {
    struct SecondParent;
    impl VectorRecombination for SecondParent {
        fn recombine(&self, _first: usize, second: usize) -> usize {
            second
        }
    }
    struct EvenSplit;
    impl CoInfectionWeighting for EvenSplit {
        fn weights(&self, linear_densities: &[f64]) -> Vec<f64> {
            vec![1.0; linear_densities.len()]
        }
    }

    let config = Config::from_json_str(CONFIG_JSON).unwrap();
    let mut simulation = Simulation::new(config, 11, Box::new(NullReporter)).unwrap();
    simulation.set_vector_recombination(Box::new(SecondParent));
    simulation.set_co_infection_weighting(Box::new(EvenSplit));
    for _ in 0..20 {
        simulation.advance_one_day().unwrap();
    }
    assert_eq!(simulation.current_day(), 20);
}
