//! The agent: one simulated individual host.
//!
//! A `Person` composes the intra-host models (parasite lineages, drug
//! tracks, immunity) and implements the host-state machine and the ordered
//! per-day update. Mutators that change a bucketing property notify the
//! population's indices with the old and new key; mutators that change
//! transmissible state bracket themselves with the force-of-infection
//! detach/attach protocol.

use crate::config::{Config, LocationId};
use crate::drugs::DrugsInBlood;
use crate::events::EventId;
use crate::immune::ImmuneSystem;
use crate::parasites::{CoInfectionWeighting, SingleHostClonalParasitePopulations};
use crate::population::foi::ForceOfInfection;
use crate::population::indices::{IndexKey, PersonIndices};
use crate::population::PersonId;
use crate::random::RandomEngine;
use crate::reporting::Reporter;
use crate::therapy::{DrugId, GenotypeId, TherapyId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Clinical/epidemiological status of an agent. `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    Susceptible,
    Exposed,
    Asymptomatic,
    Clinical,
    Dead,
}

impl HostState {
    pub const COUNT: usize = 5;

    #[must_use]
    pub fn index(self) -> usize {
        match self {
            HostState::Susceptible => 0,
            HostState::Exposed => 1,
            HostState::Asymptomatic => 2,
            HostState::Clinical => 3,
            HostState::Dead => 4,
        }
    }
}

/// The collaborators a person mutation needs: configuration, randomness,
/// the shared aggregates, and the stats sink. Built by the simulation from
/// disjoint borrows of its own state.
pub(crate) struct HostUpdateContext<'a> {
    pub config: &'a Config,
    pub rng: &'a mut RandomEngine,
    pub foi: &'a mut ForceOfInfection,
    pub indices: &'a mut PersonIndices,
    pub weighting: &'a dyn CoInfectionWeighting,
    pub reporter: &'a mut dyn Reporter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    location: LocationId,
    residence_location: LocationId,
    host_state: HostState,
    age: u32,
    age_class: usize,
    /// Day of birth; negative for agents born before the simulation start.
    pub birthday: i32,
    pub latest_update_time: i32,
    biting_level: usize,
    pub base_biting_level_value: f64,
    moving_level: usize,
    /// At most one latent liver-stage infection awaiting emergence.
    pub liver_parasite: Option<GenotypeId>,
    pub parasites: SingleHostClonalParasitePopulations,
    pub drugs_in_blood: DrugsInBlood,
    pub immune_system: ImmuneSystem,
    pub number_of_times_bitten: u32,
    pub number_of_trips_taken: u32,
    pub last_therapy_id: Option<TherapyId>,
    /// Today's candidate infecting genotypes, resolved to at most one.
    pub today_infections: Vec<GenotypeId>,
    /// Today's candidate travel destinations, resolved to at most one.
    pub today_target_locations: Vec<LocationId>,
    /// Events owned by this agent, soft-cancelled on death.
    pub pending_events: Vec<EventId>,
    /// Starting concentrations noted across a composite regimen, so later
    /// doses of an already-seen compound do not redraw exposure.
    pub starting_composite_drug_levels: BTreeMap<DrugId, f64>,
    /// Lazily drawn per-age-bracket presence probabilities for mass drug
    /// administration rounds.
    pub prob_present_at_mda_by_age: Vec<f64>,
}

impl Person {
    #[must_use]
    pub fn new(
        location: LocationId,
        residence_location: LocationId,
        age: u32,
        birthday: i32,
        config: &Config,
    ) -> Person {
        Person {
            id: PersonId(usize::MAX),
            location,
            residence_location,
            host_state: HostState::Susceptible,
            age,
            age_class: config.age_class_of(age),
            birthday,
            latest_update_time: birthday.max(0),
            biting_level: 0,
            base_biting_level_value: 0.0,
            moving_level: 0,
            liver_parasite: None,
            parasites: SingleHostClonalParasitePopulations::new(),
            drugs_in_blood: DrugsInBlood::new(),
            immune_system: ImmuneSystem::new(),
            number_of_times_bitten: 0,
            number_of_trips_taken: 0,
            last_therapy_id: None,
            today_infections: Vec::new(),
            today_target_locations: Vec::new(),
            pending_events: Vec::new(),
            starting_composite_drug_levels: BTreeMap::new(),
            prob_present_at_mda_by_age: Vec::new(),
        }
    }

    #[must_use]
    pub fn location(&self) -> LocationId {
        self.location
    }

    #[must_use]
    pub fn residence_location(&self) -> LocationId {
        self.residence_location
    }

    #[must_use]
    pub fn host_state(&self) -> HostState {
        self.host_state
    }

    #[must_use]
    pub fn age(&self) -> u32 {
        self.age
    }

    #[must_use]
    pub fn age_class(&self) -> usize {
        self.age_class
    }

    #[must_use]
    pub fn biting_level(&self) -> usize {
        self.biting_level
    }

    #[must_use]
    pub fn moving_level(&self) -> usize {
        self.moving_level
    }

    #[must_use]
    pub fn age_in_floating(&self, day: i32) -> f64 {
        f64::from(day - self.birthday) / f64::from(crate::config::DAYS_IN_YEAR)
    }

    /// The agent's complete bucketing key, as the indices see it.
    #[must_use]
    pub fn index_key(&self) -> IndexKey {
        IndexKey {
            location: self.location,
            host_state: self.host_state,
            age_class: self.age_class,
            biting_level: self.biting_level,
            moving_level: self.moving_level,
        }
    }

    /// Sets the exposure buckets of a person that has not been registered
    /// with the population indices yet.
    pub fn set_initial_levels(&mut self, biting_level: usize, moving_level: usize) {
        self.biting_level = biting_level;
        self.moving_level = moving_level;
    }

    #[must_use]
    pub fn biting_level_value(&self, config: &Config) -> f64 {
        config.relative_biting_info.biting_level_values[self.biting_level]
    }

    /// Moves the agent to another location, re-homing its transmission
    /// contribution and index membership.
    pub fn set_location(
        &mut self,
        value: LocationId,
        config: &Config,
        indices: &mut PersonIndices,
        foi: &mut ForceOfInfection,
    ) {
        if self.location == value {
            return;
        }
        let biting_value = self.biting_level_value(config);
        self.parasites
            .change_infection_force(-1.0, self.location, biting_value, config, foi);
        let old = self.index_key();
        self.location = value;
        indices.notify_change(self.id, &old, &self.index_key());
        self.parasites
            .change_infection_force(1.0, value, biting_value, config, foi);
    }

    pub fn set_host_state(&mut self, value: HostState, indices: &mut PersonIndices) {
        if self.host_state == value {
            return;
        }
        let old = self.index_key();
        self.host_state = value;
        indices.notify_change(self.id, &old, &self.index_key());
    }

    pub fn set_age(&mut self, value: u32, config: &Config, indices: &mut PersonIndices) {
        if self.age == value {
            return;
        }
        let old = self.index_key();
        self.age = value;
        self.age_class = config.age_class_of(value);
        indices.notify_change(self.id, &old, &self.index_key());
    }

    pub fn increase_age_by_1_year(&mut self, config: &Config, indices: &mut PersonIndices) {
        self.set_age(self.age + 1, config, indices);
    }

    /// Changes the biting-exposure bucket, clamped to the configured range.
    pub fn set_biting_level(
        &mut self,
        value: i64,
        config: &Config,
        indices: &mut PersonIndices,
        foi: &mut ForceOfInfection,
    ) {
        let top = config.relative_biting_info.number_of_biting_levels - 1;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let clamped = value.clamp(0, top as i64) as usize;
        if self.biting_level == clamped {
            return;
        }
        let old_value = self.biting_level_value(config);
        self.parasites
            .change_infection_force(-1.0, self.location, old_value, config, foi);
        let old = self.index_key();
        self.biting_level = clamped;
        indices.notify_change(self.id, &old, &self.index_key());
        self.parasites.change_infection_force(
            1.0,
            self.location,
            self.biting_level_value(config),
            config,
            foi,
        );
    }

    pub fn set_moving_level(&mut self, value: usize, indices: &mut PersonIndices) {
        if self.moving_level == value {
            return;
        }
        let old = self.index_key();
        self.moving_level = value;
        indices.notify_change(self.id, &old, &self.index_key());
    }

    /// The ordered per-day update. Runs at most once per simulated day and
    /// never on a dead agent.
    pub(crate) fn update(&mut self, day: i32, ctx: &mut HostUpdateContext) {
        assert!(
            self.host_state != HostState::Dead,
            "per-day update of a dead agent"
        );
        if self.latest_update_time >= day {
            return;
        }
        let duration = day - self.latest_update_time;
        let biting_value = self.biting_level_value(ctx.config);

        // (1)+(2) Densities move under behavior and drugs while the host's
        // transmission contribution is detached, then reattach.
        self.parasites
            .change_infection_force(-1.0, self.location, biting_value, ctx.config, ctx.foi);
        self.parasites
            .update(duration, &self.immune_system, ctx.config);
        self.drugs_in_blood.update(day, ctx.config);
        let mutations =
            self.parasites
                .update_by_drugs(&self.drugs_in_blood, ctx.config, ctx.rng);
        for _ in &mutations {
            ctx.reporter.record_mutation(self.location, self.age_class);
        }

        // (3) Immunity.
        self.immune_system
            .update(duration, self.age, &ctx.config.immune_system_information);

        // (4) Purge spent drug tracks and cured lineages.
        self.drugs_in_blood.clear_cut_off_drugs(ctx.config);
        self.parasites.clear_cured_parasites(ctx.config);
        self.parasites.recalculate(ctx.weighting);
        self.parasites
            .change_infection_force(1.0, self.location, biting_value, ctx.config, ctx.foi);

        // (5) Host state follows the remaining parasite load.
        if self.parasites.is_empty() {
            self.change_state_when_no_parasite_in_blood(ctx.indices);
        } else {
            self.immune_system.set_increase(true);
        }

        // (6) Biting exposure follows age where configured.
        self.update_biting_level(day, ctx);

        self.latest_update_time = day;
    }

    /// Collapses to `Susceptible`/`Exposed` when no blood parasites remain.
    pub fn change_state_when_no_parasite_in_blood(&mut self, indices: &mut PersonIndices) {
        if !self.parasites.is_empty() {
            return;
        }
        if self.liver_parasite.is_none() {
            self.set_host_state(HostState::Susceptible, indices);
        } else {
            self.set_host_state(HostState::Exposed, indices);
        }
        self.immune_system.set_increase(false);
    }

    fn update_biting_level(&mut self, day: i32, ctx: &mut HostUpdateContext) {
        if !ctx.config.using_age_dependent_biting_level {
            return;
        }
        let info = &ctx.config.relative_biting_info;
        let new_value = self.base_biting_level_value * self.age_dependent_biting_factor(day);
        let step = (info.max_relative_biting_value - 1.0)
            / (info.number_of_biting_levels as f64 - 1.0);
        #[allow(clippy::cast_possible_truncation)]
        let diff_in_level =
            ((new_value - self.biting_level_value(ctx.config)) / step).floor() as i64;
        if diff_in_level != 0 {
            self.set_biting_level(
                self.biting_level as i64 + diff_in_level,
                ctx.config,
                ctx.indices,
                ctx.foi,
            );
        }
    }

    /// Relative number of bites received as a function of age, from body
    /// surface area quantized into coarse age bands.
    #[must_use]
    pub fn age_dependent_biting_factor(&self, day: i32) -> f64 {
        let age = self.age_in_floating(day);
        if age < 1.0 {
            if age < 0.25 {
                return 0.106;
            }
            if age < 0.5 {
                return 0.13;
            }
            if age < 0.75 {
                return 0.1463;
            }
            return 0.1545;
        }
        if age < 2.0 {
            return 0.1789;
        }
        if age < 3.0 {
            return 0.2195;
        }
        if age < 4.0 {
            return 0.2520;
        }
        if age < 20.0 {
            return (17.5 + (age - 4.0) * 2.75) / 61.5;
        }
        1.0
    }

    /// Probability that an infectious bite takes hold, interpolating from
    /// the naive baseline down to a floor as immunity crosses the
    /// [0.2, 0.8] band.
    #[must_use]
    pub fn infection_probability(&self, config: &Config) -> f64 {
        let pr = config.transmission_parameter;
        let theta = self.immune_system.current_value();
        if theta > 0.8 {
            return 0.1;
        }
        if theta < 0.2 {
            return pr;
        }
        let band = (theta - 0.2) / 0.6;
        pr * (1.0 - band) + 0.1 * band
    }

    /// Challenges the host with an infectious bite carrying the given
    /// genotype. On success the genotype joins today's candidates, to be
    /// resolved to at most one actual infection at the end of the day.
    pub fn inflict_bite(
        &mut self,
        day: i32,
        genotype: GenotypeId,
        config: &Config,
        rng: &mut RandomEngine,
    ) -> bool {
        if day >= config.start_collect_data_day {
            self.number_of_times_bitten += 1;
        }
        let draw = rng.random_flat();
        if draw < self.infection_probability(config)
            && self.host_state != HostState::Exposed
            && self.liver_parasite.is_none()
        {
            self.today_infections.push(genotype);
            return true;
        }
        false
    }

    /// Resolves today's candidate bites to exactly one infecting genotype,
    /// or `None` when no candidate bite succeeded.
    pub fn choose_today_infection(&mut self, rng: &mut RandomEngine) -> Option<GenotypeId> {
        let chosen = match self.today_infections.len() {
            0 => None,
            1 => Some(self.today_infections[0]),
            n => Some(self.today_infections[rng.random_uniform(n)]),
        };
        self.today_infections.clear();
        chosen
    }

    /// Resolves today's candidate travel destinations to at most one.
    pub fn choose_today_target_location(&mut self, rng: &mut RandomEngine) -> Option<LocationId> {
        let chosen = match self.today_target_locations.len() {
            0 => None,
            1 => Some(self.today_target_locations[0]),
            n => Some(self.today_target_locations[rng.random_uniform(n)]),
        };
        self.today_target_locations.clear();
        chosen
    }

    #[must_use]
    pub fn has_detectable_parasite(&self, config: &Config) -> bool {
        self.parasites.has_detectable_parasite(config)
    }

    #[must_use]
    pub fn is_gametocytaemic(&self) -> bool {
        self.parasites.is_gametocytaemic()
    }

    /// Whether any compound is still at a therapeutic level.
    #[must_use]
    pub fn has_effective_drug_in_blood(&self) -> bool {
        self.drugs_in_blood
            .iter()
            .any(|(_, drug)| drug.last_update_value > 0.5)
    }

    /// Draws, once, the per-age-bracket probabilities of being present at a
    /// mass drug administration round.
    pub fn generate_prob_present_at_mda_by_age(
        &mut self,
        config: &Config,
        rng: &mut RandomEngine,
    ) {
        if self.prob_present_at_mda_by_age.is_empty() {
            for shape in &config.mda.prob_present_at_mda_distribution {
                self.prob_present_at_mda_by_age
                    .push(rng.random_beta(shape.alpha, shape.beta));
            }
        }
    }

    #[must_use]
    pub fn prob_present_at_mda(&self, config: &Config) -> f64 {
        let brackets = &config.mda.age_bracket_prob_individual_present_at_mda;
        let mut index = 0;
        while index < brackets.len() && self.age > brackets[index] {
            index += 1;
        }
        self.prob_present_at_mda_by_age[index]
    }
}
