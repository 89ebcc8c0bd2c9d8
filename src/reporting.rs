//! The statistics sink consumed by the engine.
//!
//! The engine emits discrete notifications through the [`Reporter`] trait
//! and never aggregates statistics itself. [`TallyReporter`] accumulates
//! per-location counters and can serialize them as CSV rows; it is also
//! what the determinism tests compare between runs.

use crate::config::LocationId;
use crate::error::MalsimError;
use crate::therapy::TherapyId;
use serde::{Deserialize, Serialize};
use std::io::Write;

#[allow(unused_variables)]
pub trait Reporter: std::any::Any {
    /// Begin-of-day hook, before any event fires.
    fn begin_day(&mut self, day: i32) {}

    fn record_birth(&mut self, location: LocationId, age_class: usize) {}

    fn record_death(
        &mut self,
        location: LocationId,
        birthday: i32,
        number_of_times_bitten: u32,
        age_class: usize,
    ) {
    }

    fn record_malaria_death(&mut self, location: LocationId, age_class: usize) {}

    fn record_new_infection(&mut self, location: LocationId, age_class: usize) {}

    fn record_clinical_episode(&mut self, location: LocationId, age_class: usize) {}

    fn record_treatment(&mut self, location: LocationId, age_class: usize, therapy: TherapyId) {}

    fn record_treatment_outcome(
        &mut self,
        location: LocationId,
        age_class: usize,
        therapy: TherapyId,
        success: bool,
    ) {
    }

    fn record_mutation(&mut self, location: LocationId, age_class: usize) {}

    fn record_non_treated_case(&mut self, location: LocationId, age_class: usize) {}
}

/// Discards every notification.
pub struct NullReporter;

impl Reporter for NullReporter {}

/// One location's accumulated counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationTally {
    pub location: LocationId,
    pub births: u64,
    pub deaths: u64,
    pub malaria_deaths: u64,
    pub new_infections: u64,
    pub clinical_episodes: u64,
    pub treatments: u64,
    pub treatment_failures: u64,
    pub treatment_successes: u64,
    pub mutations: u64,
    pub non_treated_cases: u64,
}

/// Accumulates counters per location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyReporter {
    tallies: Vec<LocationTally>,
    pub last_day: i32,
}

impl TallyReporter {
    #[must_use]
    pub fn new(locations: usize) -> TallyReporter {
        TallyReporter {
            tallies: (0..locations)
                .map(|location| LocationTally {
                    location,
                    ..LocationTally::default()
                })
                .collect(),
            last_day: 0,
        }
    }

    #[must_use]
    pub fn tally(&self, location: LocationId) -> &LocationTally {
        &self.tallies[location]
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<LocationTally> {
        self.tallies.clone()
    }

    /// Writes one CSV row per location.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the underlying writer fails.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), MalsimError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for tally in &self.tallies {
            csv_writer.serialize(tally)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

impl Reporter for TallyReporter {
    fn begin_day(&mut self, day: i32) {
        self.last_day = day;
    }

    fn record_birth(&mut self, location: LocationId, _age_class: usize) {
        self.tallies[location].births += 1;
    }

    fn record_death(
        &mut self,
        location: LocationId,
        _birthday: i32,
        _number_of_times_bitten: u32,
        _age_class: usize,
    ) {
        self.tallies[location].deaths += 1;
    }

    fn record_malaria_death(&mut self, location: LocationId, _age_class: usize) {
        self.tallies[location].malaria_deaths += 1;
    }

    fn record_new_infection(&mut self, location: LocationId, _age_class: usize) {
        self.tallies[location].new_infections += 1;
    }

    fn record_clinical_episode(&mut self, location: LocationId, _age_class: usize) {
        self.tallies[location].clinical_episodes += 1;
    }

    fn record_treatment(&mut self, location: LocationId, _age_class: usize, _therapy: TherapyId) {
        self.tallies[location].treatments += 1;
    }

    fn record_treatment_outcome(
        &mut self,
        location: LocationId,
        _age_class: usize,
        _therapy: TherapyId,
        success: bool,
    ) {
        if success {
            self.tallies[location].treatment_successes += 1;
        } else {
            self.tallies[location].treatment_failures += 1;
        }
    }

    fn record_mutation(&mut self, location: LocationId, _age_class: usize) {
        self.tallies[location].mutations += 1;
    }

    fn record_non_treated_case(&mut self, location: LocationId, _age_class: usize) {
        self.tallies[location].non_treated_cases += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tallies_accumulate_per_location() {
        let mut reporter = TallyReporter::new(2);
        reporter.record_birth(0, 0);
        reporter.record_birth(1, 2);
        reporter.record_clinical_episode(1, 2);
        reporter.record_treatment_outcome(1, 2, 0, false);
        reporter.record_treatment_outcome(1, 2, 0, true);
        assert_eq!(reporter.tally(0).births, 1);
        assert_eq!(reporter.tally(1).clinical_episodes, 1);
        assert_eq!(reporter.tally(1).treatment_failures, 1);
        assert_eq!(reporter.tally(1).treatment_successes, 1);
    }

    #[test]
    fn csv_output_has_one_row_per_location() {
        let mut reporter = TallyReporter::new(2);
        reporter.record_new_infection(0, 1);
        let mut buffer = Vec::new();
        reporter.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.trim().lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("location,births"));
        assert!(lines[1].starts_with("0,"));
    }

    #[test]
    fn snapshots_compare_equal_for_identical_histories() {
        let mut first = TallyReporter::new(1);
        let mut second = TallyReporter::new(1);
        for reporter in [&mut first, &mut second] {
            reporter.record_birth(0, 0);
            reporter.record_mutation(0, 1);
        }
        assert_eq!(first.snapshot(), second.snapshot());
    }
}
