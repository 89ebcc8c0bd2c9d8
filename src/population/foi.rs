//! Force-of-infection aggregation.
//!
//! The engine maintains the current (location, genotype) transmission
//! pressure incrementally through the hosts' attach/detach protocol, plus a
//! rolling window of daily snapshots. Infectious bites sample from the
//! oldest snapshot in the window, modelling the sporogony delay between a
//! vector's blood meal and its becoming infectious; the snapshot itself is
//! transformed by interrupted-feeding recombination before entering the
//! window.

use crate::config::LocationId;
use crate::therapy::GenotypeId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Length of the rolling snapshot window in days.
pub const FOI_WINDOW_DAYS: usize = 7;

/// Cross-host recombination of vector exposures: the genotype transmitted
/// when an interrupted bite mixes two recent blood meals. The concrete rule
/// lives in the genotype database's domain and is injected, not hard-coded.
pub trait VectorRecombination {
    fn recombine(&self, first: GenotypeId, second: GenotypeId) -> GenotypeId;
}

/// Default policy: the first blood meal dominates, so no novel genotypes
/// are produced and the mixture leaves the distribution unchanged.
pub struct ParentalRecombination;

impl VectorRecombination for ParentalRecombination {
    fn recombine(&self, first: GenotypeId, _second: GenotypeId) -> GenotypeId {
        first
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceOfInfection {
    /// Live aggregate, mutated only through [`ForceOfInfection::deposit`].
    current: Vec<Vec<f64>>,
    /// Today's interrupted-feeding-adjusted snapshot.
    interrupted_feeding: Vec<Vec<f64>>,
    /// Daily snapshots, oldest first.
    window: VecDeque<Vec<Vec<f64>>>,
}

impl ForceOfInfection {
    #[must_use]
    pub fn new(locations: usize, genotypes: usize) -> ForceOfInfection {
        ForceOfInfection {
            current: vec![vec![0.0; genotypes]; locations],
            interrupted_feeding: vec![vec![0.0; genotypes]; locations],
            window: VecDeque::new(),
        }
    }

    /// Adds a (possibly negative) contribution for one location/genotype.
    pub fn deposit(&mut self, location: LocationId, genotype: GenotypeId, delta: f64) {
        self.current[location][genotype] += delta;
    }

    #[must_use]
    pub fn current(&self, location: LocationId) -> &[f64] {
        &self.current[location]
    }

    #[must_use]
    pub fn total_current(&self, location: LocationId) -> f64 {
        self.current[location].iter().sum()
    }

    #[must_use]
    pub fn interrupted_feeding(&self, location: LocationId) -> &[f64] {
        &self.interrupted_feeding[location]
    }

    /// Builds today's interrupted-feeding snapshot from the live aggregate
    /// and pushes it into the rolling window.
    ///
    /// A fraction `p_interrupted_feeding` of each location's transmission
    /// mass is re-apportioned as if the transmitting bite had been
    /// interrupted and completed on a second host: every ordered genotype
    /// pair contributes mass proportional to the product of its shares,
    /// routed to the pair's recombinant.
    pub fn update_window(
        &mut self,
        p_interrupted_feeding: f64,
        recombination: &dyn VectorRecombination,
    ) {
        for (location, current) in self.current.iter().enumerate() {
            let snapshot = &mut self.interrupted_feeding[location];
            let total: f64 = current.iter().sum();
            if total <= 0.0 {
                snapshot.iter_mut().for_each(|value| *value = 0.0);
                continue;
            }
            for (genotype, value) in snapshot.iter_mut().enumerate() {
                *value = (1.0 - p_interrupted_feeding) * current[genotype];
            }
            for (first, first_mass) in current.iter().enumerate() {
                if *first_mass <= 0.0 {
                    continue;
                }
                for (second, second_mass) in current.iter().enumerate() {
                    if *second_mass <= 0.0 {
                        continue;
                    }
                    let offspring = recombination.recombine(first, second);
                    snapshot[offspring] +=
                        p_interrupted_feeding * first_mass * second_mass / total;
                }
            }
        }
        self.window.push_back(self.interrupted_feeding.clone());
        if self.window.len() > FOI_WINDOW_DAYS {
            self.window.pop_front();
        }
    }

    /// The per-genotype distribution infectious bites sample from today:
    /// the oldest snapshot in the window. `None` before the first roll.
    #[must_use]
    pub fn sampling_distribution(&self, location: LocationId) -> Option<&[f64]> {
        self.window
            .front()
            .map(|snapshot| snapshot[location].as_slice())
    }

    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn deposit_accumulates_and_reverses() {
        let mut foi = ForceOfInfection::new(2, 3);
        foi.deposit(0, 1, 0.5);
        foi.deposit(0, 1, 0.25);
        assert_approx_eq!(foi.current(0)[1], 0.75, 1e-12);
        foi.deposit(0, 1, -0.75);
        assert_eq!(foi.current(0)[1], 0.0);
        assert_eq!(foi.total_current(1), 0.0);
    }

    #[test]
    fn trivial_recombination_preserves_the_distribution() {
        let mut foi = ForceOfInfection::new(1, 2);
        foi.deposit(0, 0, 3.0);
        foi.deposit(0, 1, 1.0);
        foi.update_window(0.19, &ParentalRecombination);
        let snapshot = foi.sampling_distribution(0).unwrap();
        assert_approx_eq!(snapshot[0], 3.0, 1e-12);
        assert_approx_eq!(snapshot[1], 1.0, 1e-12);
    }

    #[test]
    fn recombination_moves_mass_but_preserves_totals() {
        struct AlwaysLast;
        impl VectorRecombination for AlwaysLast {
            fn recombine(&self, _first: GenotypeId, _second: GenotypeId) -> GenotypeId {
                2
            }
        }
        let mut foi = ForceOfInfection::new(1, 3);
        foi.deposit(0, 0, 2.0);
        foi.deposit(0, 1, 2.0);
        foi.update_window(0.5, &AlwaysLast);
        let snapshot = foi.sampling_distribution(0).unwrap();
        assert_approx_eq!(snapshot.iter().sum::<f64>(), 4.0, 1e-9);
        assert_approx_eq!(snapshot[2], 2.0, 1e-9);
        assert_approx_eq!(snapshot[0], 1.0, 1e-9);
    }

    #[test]
    fn window_is_bounded_and_fifo() {
        let mut foi = ForceOfInfection::new(1, 1);
        for day in 0..10 {
            foi.current[0][0] = f64::from(day);
            foi.update_window(0.0, &ParentalRecombination);
        }
        assert_eq!(foi.window_len(), FOI_WINDOW_DAYS);
        // Oldest surviving snapshot is day 3 of 0..10.
        assert_approx_eq!(foi.sampling_distribution(0).unwrap()[0], 3.0, 1e-12);
    }

    #[test]
    fn empty_location_yields_zero_snapshot() {
        let mut foi = ForceOfInfection::new(1, 2);
        foi.update_window(0.19, &ParentalRecombination);
        let snapshot = foi.sampling_distribution(0).unwrap();
        assert_eq!(snapshot.iter().sum::<f64>(), 0.0);
    }
}
