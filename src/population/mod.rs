//! Per-location container of persons, the synchronized indices over them,
//! and the force-of-infection aggregates that tie agents together.
//!
//! The population exclusively owns the lifetime of every person it holds.
//! The agent store is a slot arena with stable handles; indices and events
//! refer to agents only through [`PersonId`].

pub mod foi;
pub mod indices;

use crate::config::{Config, LocationId};
use crate::person::Person;
use foi::ForceOfInfection;
use indices::PersonIndices;
use serde::{Deserialize, Serialize};

/// Stable handle into the population's agent arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonId(pub usize);

pub struct Population {
    people: Vec<Option<Person>>,
    free_slots: Vec<usize>,
    pub indices: PersonIndices,
    pub foi: ForceOfInfection,
    popsize_by_location: Vec<usize>,
}

impl Population {
    #[must_use]
    pub fn new(config: &Config) -> Population {
        Population {
            people: Vec::new(),
            free_slots: Vec::new(),
            indices: PersonIndices::new(
                config.number_of_locations(),
                config.number_of_age_classes(),
                config.relative_biting_info.number_of_biting_levels,
                config.moving_level_info.number_of_moving_levels,
            ),
            foi: ForceOfInfection::new(config.number_of_locations(), config.number_of_genotypes()),
            popsize_by_location: vec![0; config.number_of_locations()],
        }
    }

    /// Takes ownership of a person, assigns its handle, and registers it
    /// with every index.
    pub fn add_person(&mut self, mut person: Person) -> PersonId {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.people.push(None);
                self.people.len() - 1
            }
        };
        let id = PersonId(slot);
        person.id = id;
        self.popsize_by_location[person.location()] += 1;
        self.indices.add_person(id, &person.index_key());
        self.people[slot] = Some(person);
        id
    }

    /// Unregisters and drops a dead person. The caller has already cleared
    /// parasites and cancelled pending events.
    pub fn remove_dead_person(&mut self, id: PersonId) {
        let person = self.people[id.0]
            .take()
            .expect("removing a person that is not in the arena");
        self.popsize_by_location[person.location()] -= 1;
        self.indices.remove_person(id, &person.index_key());
        self.free_slots.push(id.0);
    }

    #[must_use]
    pub fn get(&self, id: PersonId) -> Option<&Person> {
        self.people.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: PersonId) -> Option<&mut Person> {
        self.people.get_mut(id.0).and_then(Option::as_mut)
    }

    /// # Panics
    ///
    /// Panics when the handle does not refer to a live person; stale
    /// handles indicate a bookkeeping bug.
    #[must_use]
    pub fn person(&self, id: PersonId) -> &Person {
        self.people[id.0]
            .as_ref()
            .expect("stale person handle")
    }

    pub fn person_mut(&mut self, id: PersonId) -> &mut Person {
        self.people[id.0]
            .as_mut()
            .expect("stale person handle")
    }

    /// Total number of live individuals.
    #[must_use]
    pub fn size(&self) -> usize {
        self.indices.all().len()
    }

    /// Number of live individuals in the given location.
    #[must_use]
    pub fn size_at(&self, location: LocationId) -> usize {
        self.popsize_by_location[location]
    }

    /// Disjoint borrows of the arena and the shared aggregates, for update
    /// paths that mutate a person and the aggregates together.
    pub(crate) fn parts_mut(
        &mut self,
    ) -> (
        &mut Vec<Option<Person>>,
        &mut PersonIndices,
        &mut ForceOfInfection,
    ) {
        (&mut self.people, &mut self.indices, &mut self.foi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn add_then_remove_recycles_slots() {
        let config = test_config();
        let mut population = Population::new(&config);
        let first = population.add_person(Person::new(0, 0, 20, -20 * 365, &config));
        let second = population.add_person(Person::new(1, 1, 30, -30 * 365, &config));
        assert_eq!(population.size(), 2);
        assert_eq!(population.size_at(0), 1);
        assert_eq!(population.size_at(1), 1);

        population.remove_dead_person(first);
        assert_eq!(population.size(), 1);
        assert_eq!(population.size_at(0), 0);
        assert!(population.get(first).is_none());

        let third = population.add_person(Person::new(0, 0, 5, -5 * 365, &config));
        assert_eq!(third.0, first.0);
        assert_ne!(third, second);
        assert_eq!(population.size(), 2);
    }

    #[test]
    #[should_panic(expected = "stale person handle")]
    fn stale_handle_access_panics() {
        let config = test_config();
        let mut population = Population::new(&config);
        let id = population.add_person(Person::new(0, 0, 20, -20 * 365, &config));
        population.remove_dead_person(id);
        population.person(id);
    }
}
