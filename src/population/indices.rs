//! Synchronized indices over the population's agent set.
//!
//! Every index maps bucket keys to handles, never to references. Agent
//! mutators notify [`PersonIndices`] with the full old/new bucket key and
//! each index relocates the handle. Removal is swap-with-last-and-truncate
//! with a position map, so buckets stay dense and O(1) to maintain without
//! relying on positional identity.

use crate::person::HostState;
use crate::population::PersonId;
use rustc_hash::FxHashMap;

/// The complete bucketing key of one agent. Mutators capture it before and
/// after a change; each index extracts the part it cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexKey {
    pub location: usize,
    pub host_state: HostState,
    pub age_class: usize,
    pub biting_level: usize,
    pub moving_level: usize,
}

/// Dense buckets of handles with O(1) add/remove bookkeeping.
#[derive(Debug, Default)]
struct HandleBuckets {
    buckets: Vec<Vec<PersonId>>,
    positions: FxHashMap<PersonId, usize>,
}

impl HandleBuckets {
    fn new(bucket_count: usize) -> HandleBuckets {
        HandleBuckets {
            buckets: vec![Vec::new(); bucket_count],
            positions: FxHashMap::default(),
        }
    }

    fn add(&mut self, bucket: usize, person: PersonId) {
        let slot = &mut self.buckets[bucket];
        self.positions.insert(person, slot.len());
        slot.push(person);
    }

    fn remove(&mut self, bucket: usize, person: PersonId) {
        let position = self
            .positions
            .remove(&person)
            .expect("person missing from index");
        let slot = &mut self.buckets[bucket];
        slot.swap_remove(position);
        if let Some(moved) = slot.get(position) {
            self.positions.insert(*moved, position);
        }
    }

    fn relocate(&mut self, person: PersonId, old_bucket: usize, new_bucket: usize) {
        if old_bucket != new_bucket {
            self.remove(old_bucket, person);
            self.add(new_bucket, person);
        }
    }

    fn bucket(&self, bucket: usize) -> &[PersonId] {
        &self.buckets[bucket]
    }
}

pub struct PersonIndices {
    locations: usize,
    age_classes: usize,
    biting_levels: usize,
    moving_levels: usize,
    all: HandleBuckets,
    by_location_state_age_class: HandleBuckets,
    by_location_biting_level: HandleBuckets,
    by_location_moving_level: HandleBuckets,
}

impl PersonIndices {
    #[must_use]
    pub fn new(
        locations: usize,
        age_classes: usize,
        biting_levels: usize,
        moving_levels: usize,
    ) -> PersonIndices {
        PersonIndices {
            locations,
            age_classes,
            biting_levels,
            moving_levels,
            all: HandleBuckets::new(1),
            by_location_state_age_class: HandleBuckets::new(
                locations * HostState::COUNT * age_classes,
            ),
            by_location_biting_level: HandleBuckets::new(locations * biting_levels),
            by_location_moving_level: HandleBuckets::new(locations * moving_levels),
        }
    }

    fn state_bucket(&self, key: &IndexKey) -> usize {
        (key.location * HostState::COUNT + key.host_state.index()) * self.age_classes
            + key.age_class
    }

    fn biting_bucket(&self, key: &IndexKey) -> usize {
        key.location * self.biting_levels + key.biting_level
    }

    fn moving_bucket(&self, key: &IndexKey) -> usize {
        key.location * self.moving_levels + key.moving_level
    }

    pub fn add_person(&mut self, person: PersonId, key: &IndexKey) {
        self.all.add(0, person);
        self.by_location_state_age_class
            .add(self.state_bucket(key), person);
        self.by_location_biting_level
            .add(self.biting_bucket(key), person);
        self.by_location_moving_level
            .add(self.moving_bucket(key), person);
    }

    pub fn remove_person(&mut self, person: PersonId, key: &IndexKey) {
        self.all.remove(0, person);
        self.by_location_state_age_class
            .remove(self.state_bucket(key), person);
        self.by_location_biting_level
            .remove(self.biting_bucket(key), person);
        self.by_location_moving_level
            .remove(self.moving_bucket(key), person);
    }

    /// Forwards a property change to every index.
    pub fn notify_change(&mut self, person: PersonId, old: &IndexKey, new: &IndexKey) {
        self.by_location_state_age_class.relocate(
            person,
            self.state_bucket(old),
            self.state_bucket(new),
        );
        self.by_location_biting_level.relocate(
            person,
            self.biting_bucket(old),
            self.biting_bucket(new),
        );
        self.by_location_moving_level.relocate(
            person,
            self.moving_bucket(old),
            self.moving_bucket(new),
        );
    }

    #[must_use]
    pub fn all(&self) -> &[PersonId] {
        self.all.bucket(0)
    }

    #[must_use]
    pub fn persons_at(&self, location: usize, state: HostState, age_class: usize) -> &[PersonId] {
        self.by_location_state_age_class.bucket(
            (location * HostState::COUNT + state.index()) * self.age_classes + age_class,
        )
    }

    #[must_use]
    pub fn persons_by_biting_level(&self, location: usize, level: usize) -> &[PersonId] {
        self.by_location_biting_level
            .bucket(location * self.biting_levels + level)
    }

    #[must_use]
    pub fn persons_by_moving_level(&self, location: usize, level: usize) -> &[PersonId] {
        self.by_location_moving_level
            .bucket(location * self.moving_levels + level)
    }

    #[must_use]
    pub fn locations(&self) -> usize {
        self.locations
    }

    #[must_use]
    pub fn age_classes(&self) -> usize {
        self.age_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(location: usize, state: HostState, age_class: usize) -> IndexKey {
        IndexKey {
            location,
            host_state: state,
            age_class,
            biting_level: 0,
            moving_level: 0,
        }
    }

    fn indices() -> PersonIndices {
        PersonIndices::new(2, 3, 2, 2)
    }

    #[test]
    fn add_and_remove_keep_buckets_dense() {
        let mut indices = indices();
        let keys: Vec<IndexKey> = (0..3).map(|i| key(0, HostState::Susceptible, i % 2)).collect();
        for (i, k) in keys.iter().enumerate() {
            indices.add_person(PersonId(i), k);
        }
        assert_eq!(indices.all().len(), 3);
        assert_eq!(
            indices.persons_at(0, HostState::Susceptible, 0).len(),
            2
        );
        indices.remove_person(PersonId(0), &keys[0]);
        assert_eq!(indices.all().len(), 2);
        let bucket = indices.persons_at(0, HostState::Susceptible, 0);
        assert_eq!(bucket, &[PersonId(2)]);
    }

    #[test]
    fn notify_change_relocates_between_buckets() {
        let mut indices = indices();
        let old = key(0, HostState::Susceptible, 1);
        indices.add_person(PersonId(7), &old);

        let mut new = old;
        new.host_state = HostState::Clinical;
        new.location = 1;
        indices.notify_change(PersonId(7), &old, &new);

        assert!(indices.persons_at(0, HostState::Susceptible, 1).is_empty());
        assert_eq!(
            indices.persons_at(1, HostState::Clinical, 1),
            &[PersonId(7)]
        );
        // The all-persons index is unaffected by bucket moves.
        assert_eq!(indices.all().len(), 1);
    }

    #[test]
    fn swap_remove_updates_moved_position() {
        let mut indices = indices();
        let shared = key(1, HostState::Exposed, 0);
        for i in 0..4 {
            indices.add_person(PersonId(i), &shared);
        }
        // Removing the first person swaps the last into its slot; removing
        // that person afterwards must still succeed.
        indices.remove_person(PersonId(0), &shared);
        indices.remove_person(PersonId(3), &shared);
        let bucket = indices.persons_at(1, HostState::Exposed, 0);
        assert_eq!(bucket.len(), 2);
        assert!(bucket.contains(&PersonId(1)) && bucket.contains(&PersonId(2)));
    }

    #[test]
    #[should_panic(expected = "person missing from index")]
    fn removing_unknown_person_panics() {
        let mut indices = indices();
        indices.remove_person(PersonId(9), &key(0, HostState::Susceptible, 0));
    }
}
