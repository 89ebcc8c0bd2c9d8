//! The simulation: ownership of all engine state and the daily control
//! flow.
//!
//! One `Simulation` owns the configuration, the random engine, the
//! scheduler, the population and the stats sink, plus the two injected
//! policies (co-infection weighting and vector recombination). Each
//! simulated day runs, in order: the begin-of-day hook, every event due
//! that day in FIFO order, then the daily batch passes (births, deaths,
//! circulation, force-of-infection window roll, infection resolution),
//! and finally the clock increment.

use crate::config::{Config, LocationId};
use crate::drugs::Drug;
use crate::error::MalsimError;
use crate::events::{EventKind, EventRecord};
use crate::parasites::{CoInfectionWeighting, DensityUpdate, FreeRecombination, ParasiteUid};
use crate::person::{HostState, HostUpdateContext, Person};
use crate::population::foi::{ParentalRecombination, VectorRecombination};
use crate::population::{PersonId, Population};
use crate::random::RandomEngine;
use crate::reporting::Reporter;
use crate::scheduler::Scheduler;
use crate::therapy::{DrugId, GenotypeId, SimpleTherapy, Therapy, TherapyId};
use log::{debug, info, trace};

/// Days between a successful infectious bite and blood-stage emergence.
pub const INCUBATION_DAYS: i32 = 7;

const CLINICAL_DURATION_MEAN: f64 = 7.0;
const CLINICAL_DURATION_SD: f64 = 2.0;
const CLINICAL_DURATION_MIN: i32 = 5;
const CLINICAL_DURATION_MAX: i32 = 14;

pub struct Simulation {
    config: Config,
    rng: RandomEngine,
    scheduler: Scheduler,
    population: Population,
    reporter: Box<dyn Reporter>,
    weighting: Box<dyn CoInfectionWeighting>,
    vector_recombination: Box<dyn VectorRecombination>,
}

impl Simulation {
    /// Builds a simulation with a seeded population and initial infections.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration fails validation.
    pub fn new(
        config: Config,
        seed: u64,
        reporter: Box<dyn Reporter>,
    ) -> Result<Simulation, MalsimError> {
        config.validate()?;
        let population = Population::new(&config);
        let mut simulation = Simulation {
            config,
            rng: RandomEngine::new(seed),
            scheduler: Scheduler::new(),
            population,
            reporter,
            weighting: Box::new(FreeRecombination),
            vector_recombination: Box::new(ParentalRecombination),
        };
        simulation.initialize();
        Ok(simulation)
    }

    /// Replaces the co-infection weighting policy (non-free recombination).
    pub fn set_co_infection_weighting(&mut self, weighting: Box<dyn CoInfectionWeighting>) {
        self.weighting = weighting;
    }

    /// Replaces the cross-host vector recombination policy.
    pub fn set_vector_recombination(&mut self, policy: Box<dyn VectorRecombination>) {
        self.vector_recombination = policy;
    }

    #[must_use]
    pub fn current_day(&self) -> i32 {
        self.scheduler.current_day()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Releases the stats sink, e.g. to read accumulated tallies.
    #[must_use]
    pub fn into_reporter(self) -> Box<dyn Reporter> {
        self.reporter
    }

    /// Schedules an importation of infections at a location.
    pub fn schedule_import_event(
        &mut self,
        day: i32,
        location: LocationId,
        genotype: GenotypeId,
        number_of_cases: usize,
    ) {
        self.scheduler.schedule_population_event(
            day,
            EventKind::ImportParasites {
                location,
                genotype,
                number_of_cases,
            },
        );
    }

    /// Runs the simulation to `total_time`.
    ///
    /// # Errors
    ///
    /// Propagates configuration-reference and numerical-guard faults; the
    /// run is aborted, never retried.
    pub fn run(&mut self) -> Result<(), MalsimError> {
        info!(
            "starting run: {} locations, {} persons, {} days",
            self.config.number_of_locations(),
            self.population.size(),
            self.config.total_time
        );
        while self.scheduler.current_day() < self.config.total_time {
            self.advance_one_day()?;
        }
        Ok(())
    }

    /// Executes one simulated day.
    ///
    /// # Errors
    ///
    /// Propagates faults from event execution.
    pub fn advance_one_day(&mut self) -> Result<(), MalsimError> {
        let day = self.scheduler.current_day();
        self.reporter.begin_day(day);
        self.execute_due_events()?;
        self.perform_birth_event();
        self.perform_death_event();
        self.perform_circulation_event();
        self.population
            .foi
            .update_window(self.config.p_interrupted_feeding, &*self.vector_recombination);
        self.perform_infection_event();
        self.scheduler.increment_day();
        Ok(())
    }

    // ----- initialization ---------------------------------------------

    fn initialize(&mut self) {
        for location in 0..self.config.number_of_locations() {
            for _ in 0..self.config.locations[location].population_size {
                self.generate_individual(location);
            }
        }
        self.introduce_initial_cases();
        debug!("initialized population of {}", self.population.size());
    }

    fn generate_individual(&mut self, location: LocationId) {
        let age_class = self
            .rng
            .roulette(&self.config.locations[location].age_distribution)
            .unwrap_or(0);
        let lower = if age_class == 0 {
            0
        } else {
            self.config.age_structure[age_class - 1]
        };
        let upper = self.config.age_structure[age_class];
        let span = (upper - lower).max(1) as usize;
        let age = lower + self.rng.random_uniform(span) as u32;
        let offset = self.rng.random_uniform(crate::config::DAYS_IN_YEAR as usize) as i32;
        let birthday = -(age as i32 * crate::config::DAYS_IN_YEAR + offset);

        let mut person = Person::new(location, location, age, birthday, &self.config);
        let biting_level = self
            .rng
            .roulette(&self.config.relative_biting_info.biting_level_distribution)
            .unwrap_or(0);
        let moving_level = self
            .rng
            .roulette(&self.config.moving_level_info.moving_level_distribution)
            .unwrap_or(0);
        person.set_initial_levels(biting_level, moving_level);
        person.base_biting_level_value =
            self.config.relative_biting_info.biting_level_values[biting_level];

        let id = self.population.add_person(person);
        let first_update = 1 + self.rng.random_uniform(self.config.update_frequency as usize);
        self.schedule_for(id, first_update as i32, EventKind::UpdateEveryKDays);
        let next_birthday = birthday + (age as i32 + 1) * crate::config::DAYS_IN_YEAR;
        self.schedule_for(id, next_birthday, EventKind::Birthday);
    }

    fn introduce_initial_cases(&mut self) {
        for case in self.config.initial_parasite_cases.clone() {
            for _ in 0..case.number_of_cases {
                if let Some(id) = self.random_person_at_location(case.location) {
                    self.initial_infection(id, case.genotype);
                }
            }
        }
    }

    fn initial_infection(&mut self, id: PersonId, genotype: GenotypeId) {
        let day = self.scheduler.current_day();
        let uid = self.with_host(id, |person, ctx| {
            person.immune_system.set_increase(true);
            person.set_host_state(HostState::Asymptomatic, ctx.indices);
            let levels = &ctx.config.parasite_density_levels;
            let density = ctx.rng.random_uniform_range(
                levels.log_parasite_density_from_liver,
                levels.log_parasite_density_clinical,
            );
            let biting_value = person.biting_level_value(ctx.config);
            let location = person.location();
            person
                .parasites
                .change_infection_force(-1.0, location, biting_value, ctx.config, ctx.foi);
            let uid = person.parasites.add(genotype, day);
            let full_gametocyte = ctx.config.gametocyte_level_full;
            {
                let parasite = person.parasites.get_mut(uid).expect("lineage just added");
                parasite.set_log10_density(density);
                parasite.set_gametocyte_level(full_gametocyte);
            }
            person.parasites.recalculate(ctx.weighting);
            person
                .parasites
                .change_infection_force(1.0, location, biting_value, ctx.config, ctx.foi);
            uid
        });
        self.determine_clinical_at_emergence(id, uid);
    }

    // ----- event plumbing ---------------------------------------------

    /// Builds the host-update context from disjoint borrows and applies a
    /// mutation to one person.
    fn with_host<T>(
        &mut self,
        id: PersonId,
        action: impl FnOnce(&mut Person, &mut HostUpdateContext) -> T,
    ) -> T {
        let (people, indices, foi) = self.population.parts_mut();
        let person = people[id.0].as_mut().expect("stale person handle");
        let mut ctx = HostUpdateContext {
            config: &self.config,
            rng: &mut self.rng,
            foi,
            indices,
            weighting: self.weighting.as_ref(),
            reporter: self.reporter.as_mut(),
        };
        action(person, &mut ctx)
    }

    fn update_person(&mut self, id: PersonId) {
        let day = self.scheduler.current_day();
        self.with_host(id, |person, ctx| person.update(day, ctx));
    }

    fn schedule_for(&mut self, id: PersonId, day: i32, kind: EventKind) {
        let event = self.scheduler.schedule_individual_event(id, day, kind);
        self.population.person_mut(id).pending_events.push(event);
    }

    fn cancel_events_matching(&mut self, id: PersonId, predicate: impl Fn(&EventKind) -> bool) {
        let pending = self.population.person(id).pending_events.clone();
        for event in pending {
            if self.scheduler.pending_kind(event).is_some_and(&predicate) {
                self.scheduler.cancel(event);
            }
        }
    }

    fn has_pending_event(&self, id: PersonId, predicate: impl Fn(&EventKind) -> bool) -> bool {
        self.population
            .person(id)
            .pending_events
            .iter()
            .any(|event| self.scheduler.pending_kind(*event).is_some_and(&predicate))
    }

    fn execute_due_events(&mut self) -> Result<(), MalsimError> {
        while let Some(record) = self.scheduler.pop_due_event() {
            if let Some(owner) = record.owner {
                if let Some(person) = self.population.get_mut(owner) {
                    person.pending_events.retain(|event| *event != record.id);
                }
            }
            if !record.executable {
                trace!("skipping cancelled event {:?}", record.id);
                continue;
            }
            match record.owner {
                Some(owner) => {
                    let state = self.population.get(owner).map(Person::host_state);
                    assert!(
                        state.is_some() && state != Some(HostState::Dead),
                        "executable event fired for a dead agent"
                    );
                    self.execute_individual_event(owner, record)?;
                }
                None => self.execute_population_event(record)?,
            }
        }
        Ok(())
    }

    fn execute_individual_event(
        &mut self,
        id: PersonId,
        record: EventRecord,
    ) -> Result<(), MalsimError> {
        self.update_person(id);
        match record.kind {
            EventKind::MoveParasiteToBlood { genotype } => {
                self.execute_move_parasite_to_blood(id, genotype);
            }
            EventKind::ProgressToClinical { parasite } => {
                self.execute_progress_to_clinical(id, parasite)?;
            }
            EventKind::EndClinical { parasite } => self.execute_end_clinical(id, parasite),
            EventKind::EndClinicalByNoTreatment { parasite } => {
                self.execute_end_clinical_by_no_treatment(id, parasite);
            }
            EventKind::MatureGametocyte { parasite } => {
                self.execute_mature_gametocyte(id, parasite);
            }
            EventKind::ReceiveTherapy { therapy, parasite } => {
                self.receive_therapy(id, therapy, parasite, true)?;
            }
            EventKind::TestTreatmentFailure { parasite, therapy } => {
                self.execute_test_treatment_failure(id, parasite, therapy);
            }
            EventKind::UpdateWhenDrugIsPresent { parasite } => {
                self.execute_update_when_drug_is_present(id, parasite);
            }
            EventKind::UpdateEveryKDays => {
                let next = self.scheduler.current_day() + self.config.update_frequency;
                self.schedule_for(id, next, EventKind::UpdateEveryKDays);
            }
            EventKind::Birthday => {
                self.with_host(id, |person, ctx| {
                    person.increase_age_by_1_year(ctx.config, ctx.indices);
                });
                let next = self.scheduler.current_day() + crate::config::DAYS_IN_YEAR;
                self.schedule_for(id, next, EventKind::Birthday);
            }
            EventKind::CirculateToTargetLocation { destination } => {
                self.execute_circulate_to_target_location(id, destination);
            }
            EventKind::ReturnToResidence => {
                self.with_host(id, |person, ctx| {
                    let residence = person.residence_location();
                    person.set_location(residence, ctx.config, ctx.indices, ctx.foi);
                });
            }
            EventKind::DeathFromMalaria { parasite } => {
                self.execute_death_from_malaria(id, parasite);
            }
            EventKind::ImportParasites { .. } => {
                unreachable!("population event dispatched to an individual")
            }
        }
        Ok(())
    }

    fn execute_population_event(&mut self, record: EventRecord) -> Result<(), MalsimError> {
        match record.kind {
            EventKind::ImportParasites {
                location,
                genotype,
                number_of_cases,
            } => {
                debug!(
                    "importing {number_of_cases} cases of genotype {genotype} at location \
                     {location}"
                );
                for _ in 0..number_of_cases {
                    if let Some(id) = self.random_person_at_location(location) {
                        if self.population.person(id).parasites.is_empty() {
                            self.initial_infection(id, genotype);
                        }
                    }
                }
                Ok(())
            }
            _ => unreachable!("individual event dispatched to the population"),
        }
    }

    // ----- individual event semantics ---------------------------------

    fn execute_move_parasite_to_blood(&mut self, id: PersonId, genotype: GenotypeId) {
        let day = self.scheduler.current_day();
        let uid = self.with_host(id, |person, ctx| {
            person.liver_parasite = None;
            let biting_value = person.biting_level_value(ctx.config);
            let location = person.location();
            person
                .parasites
                .change_infection_force(-1.0, location, biting_value, ctx.config, ctx.foi);
            let uid = person.parasites.add(genotype, day);
            let from_liver = ctx
                .config
                .parasite_density_levels
                .log_parasite_density_from_liver;
            person
                .parasites
                .get_mut(uid)
                .expect("lineage just added")
                .set_log10_density(from_liver);
            person.parasites.recalculate(ctx.weighting);
            person
                .parasites
                .change_infection_force(1.0, location, biting_value, ctx.config, ctx.foi);
            person.immune_system.set_increase(true);
            person.set_host_state(HostState::Asymptomatic, ctx.indices);
            ctx.reporter
                .record_new_infection(person.location(), person.age_class());
            uid
        });
        let maturation = if self.population.person(id).age() <= 5 {
            self.config.days_mature_gametocyte_under_five
        } else {
            self.config.days_mature_gametocyte_over_five
        };
        self.schedule_for(
            id,
            day + maturation,
            EventKind::MatureGametocyte { parasite: uid },
        );
        self.determine_clinical_at_emergence(id, uid);
    }

    /// At blood-stage emergence: either the new lineage is bound for a
    /// clinical episode after the age-dependent delay, or immunity starts
    /// clearing it.
    fn determine_clinical_at_emergence(&mut self, id: PersonId, parasite: ParasiteUid) {
        let probability = self.with_host(id, |person, ctx| {
            person
                .immune_system
                .clinical_progression_probability(&ctx.config.immune_system_information)
        });
        let draw = self.rng.random_flat();
        if draw <= probability {
            self.with_host(id, |person, _ctx| {
                if let Some(lineage) = person.parasites.get_mut(parasite) {
                    lineage.update_mode = DensityUpdate::ProgressToClinical;
                }
            });
            let delay = if self.population.person(id).age() <= 5 {
                self.config.days_to_clinical_under_five
            } else {
                self.config.days_to_clinical_over_five
            };
            let day = self.scheduler.current_day();
            self.schedule_for(id, day + delay, EventKind::ProgressToClinical { parasite });
        } else {
            self.with_host(id, |person, _ctx| {
                if let Some(lineage) = person.parasites.get_mut(parasite) {
                    lineage.update_mode = DensityUpdate::ImmuneClearance;
                }
            });
        }
    }

    fn execute_progress_to_clinical(
        &mut self,
        id: PersonId,
        parasite: ParasiteUid,
    ) -> Result<(), MalsimError> {
        if !self.population.person(id).parasites.contains(parasite) {
            return Ok(());
        }
        // A relapse scheduled alongside a competing onset must not fire a
        // second episode for the same course.
        self.cancel_events_matching(id, |kind| {
            matches!(kind, EventKind::ProgressToClinical { .. })
        });

        let day = self.scheduler.current_day();
        let (location, age, age_class) = self.with_host(id, |person, ctx| {
            let clinical = ctx
                .config
                .parasite_density_levels
                .log_parasite_density_clinical;
            let biting_value = person.biting_level_value(ctx.config);
            let location = person.location();
            person
                .parasites
                .change_infection_force(-1.0, location, biting_value, ctx.config, ctx.foi);
            if let Some(lineage) = person.parasites.get_mut(parasite) {
                lineage.set_log10_density(clinical);
                lineage.update_mode = DensityUpdate::Latent;
            }
            person.parasites.recalculate(ctx.weighting);
            person
                .parasites
                .change_infection_force(1.0, location, biting_value, ctx.config, ctx.foi);
            person.immune_system.set_increase(true);
            person.set_host_state(HostState::Clinical, ctx.indices);
            ctx.reporter
                .record_clinical_episode(person.location(), person.age_class());
            (person.location(), person.age(), person.age_class())
        });

        let p_treatment = self
            .config
            .treatment_coverage
            .probability_to_be_treated(location, age);
        if self.rng.random_flat() <= p_treatment {
            let therapy = self.config.treatment_coverage.therapy_id_by_location[location];
            self.receive_therapy(id, therapy, parasite, false)?;
            self.with_host(id, |person, ctx| {
                person.parasites.set_all_update_modes(DensityUpdate::DrugExposed);
                ctx.reporter
                    .record_treatment(person.location(), person.age_class(), therapy);
            });
            self.schedule_for(id, day + 1, EventKind::UpdateWhenDrugIsPresent { parasite });
            let duration = self.clinical_duration();
            self.schedule_for(id, day + duration, EventKind::EndClinical { parasite });
            self.schedule_for(
                id,
                day + self.config.tf_testing_day,
                EventKind::TestTreatmentFailure { parasite, therapy },
            );
            if self.will_progress_to_death_when_receive_treatment(age_class) {
                let death_day = day + self.clinical_duration();
                self.schedule_for(id, death_day, EventKind::DeathFromMalaria { parasite });
            }
        } else {
            self.with_host(id, |person, ctx| {
                ctx.reporter
                    .record_non_treated_case(person.location(), person.age_class());
            });
            let duration = self.clinical_duration();
            if self.will_progress_to_death_when_receive_no_treatment(age_class) {
                self.schedule_for(id, day + duration, EventKind::DeathFromMalaria { parasite });
            } else {
                self.schedule_for(
                    id,
                    day + duration,
                    EventKind::EndClinicalByNoTreatment { parasite },
                );
            }
        }
        Ok(())
    }

    fn execute_end_clinical(&mut self, id: PersonId, parasite: ParasiteUid) {
        let still_infected = self.with_host(id, |person, ctx| {
            if person.parasites.is_empty() {
                person.change_state_when_no_parasite_in_blood(ctx.indices);
                false
            } else {
                person.set_host_state(HostState::Asymptomatic, ctx.indices);
                person.immune_system.set_increase(true);
                true
            }
        });
        if still_infected {
            // The causing lineage surviving to the end of the episode is a
            // recrudescence risk; re-check progression against immunity.
            self.determine_clinical_or_not(id, parasite);
        }
    }

    fn execute_end_clinical_by_no_treatment(&mut self, id: PersonId, parasite: ParasiteUid) {
        self.determine_relapse_or_not(id, parasite);
        self.with_host(id, |person, ctx| {
            if person.parasites.is_empty() {
                person.change_state_when_no_parasite_in_blood(ctx.indices);
            } else {
                person.set_host_state(HostState::Asymptomatic, ctx.indices);
            }
        });
    }

    fn execute_mature_gametocyte(&mut self, id: PersonId, parasite: ParasiteUid) {
        self.with_host(id, |person, ctx| {
            if !person.parasites.contains(parasite) {
                return;
            }
            let biting_value = person.biting_level_value(ctx.config);
            let location = person.location();
            person
                .parasites
                .change_infection_force(-1.0, location, biting_value, ctx.config, ctx.foi);
            let full = ctx.config.gametocyte_level_full;
            person
                .parasites
                .get_mut(parasite)
                .expect("presence checked above")
                .set_gametocyte_level(full);
            person.parasites.recalculate(ctx.weighting);
            person
                .parasites
                .change_infection_force(1.0, location, biting_value, ctx.config, ctx.foi);
        });
    }

    fn execute_test_treatment_failure(
        &mut self,
        id: PersonId,
        parasite: ParasiteUid,
        therapy: TherapyId,
    ) {
        self.with_host(id, |person, ctx| {
            let detectable = ctx
                .config
                .parasite_density_levels
                .log_parasite_density_detectable;
            let failed = person
                .parasites
                .get(parasite)
                .is_some_and(|lineage| lineage.log10_density() > detectable);
            ctx.reporter.record_treatment_outcome(
                person.location(),
                person.age_class(),
                therapy,
                !failed,
            );
        });
    }

    fn execute_update_when_drug_is_present(&mut self, id: PersonId, parasite: ParasiteUid) {
        let drugs_remain = !self.population.person(id).drugs_in_blood.is_empty();
        if drugs_remain {
            let next = self.scheduler.current_day() + 1;
            self.schedule_for(id, next, EventKind::UpdateWhenDrugIsPresent { parasite });
        } else {
            self.with_host(id, |person, _ctx| {
                person
                    .parasites
                    .change_all_update_modes(DensityUpdate::DrugExposed, DensityUpdate::ImmuneClearance);
            });
        }
    }

    fn execute_circulate_to_target_location(&mut self, id: PersonId, destination: LocationId) {
        self.with_host(id, |person, ctx| {
            person.set_location(destination, ctx.config, ctx.indices, ctx.foi);
        });
        let person = self.population.person(id);
        if destination != person.residence_location()
            && !self.has_pending_event(id, |kind| matches!(kind, EventKind::ReturnToResidence))
        {
            let stay = self
                .rng
                .random_normal(
                    self.config.circulation_info.length_of_stay_mean,
                    self.config.circulation_info.length_of_stay_sd,
                )
                .round()
                .max(1.0);
            #[allow(clippy::cast_possible_truncation)]
            let stay = stay as i32;
            let day = self.scheduler.current_day();
            self.schedule_for(id, day + stay, EventKind::ReturnToResidence);
        }
    }

    fn execute_death_from_malaria(&mut self, id: PersonId, parasite: ParasiteUid) {
        // A course cleared before this fires means the host survived.
        if !self.population.person(id).parasites.contains(parasite) {
            return;
        }
        self.with_host(id, |person, ctx| {
            ctx.reporter
                .record_malaria_death(person.location(), person.age_class());
        });
        self.kill_person(id);
    }

    // ----- clinical decisions -----------------------------------------

    /// Shared structure with [`Simulation::determine_relapse_or_not`]: draw
    /// against the immunity-derived progression probability; on success the
    /// lineage is re-armed for a clinical onset after a perturbed delay,
    /// otherwise it is handed to immune clearance.
    fn determine_clinical_or_not(&mut self, id: PersonId, parasite: ParasiteUid) {
        if !self.population.person(id).parasites.contains(parasite) {
            return;
        }
        let probability = self.with_host(id, |person, ctx| {
            person
                .immune_system
                .clinical_progression_probability(&ctx.config.immune_system_information)
        });
        let draw = self.rng.random_flat();
        if draw <= probability {
            self.arm_relapse(id, parasite);
        } else {
            self.hand_to_immune_clearance(id, parasite, false);
        }
    }

    /// Draw against the relapse probability; on success the lineage is
    /// re-armed for a clinical onset, otherwise handed to immune clearance
    /// with its density clamped down to the asymptomatic baseline.
    fn determine_relapse_or_not(&mut self, id: PersonId, parasite: ParasiteUid) {
        if !self.population.person(id).parasites.contains(parasite) {
            return;
        }
        let draw = self.rng.random_flat();
        if draw <= self.config.p_relapse {
            self.arm_relapse(id, parasite);
        } else {
            self.hand_to_immune_clearance(id, parasite, true);
        }
    }

    /// Resets the lineage to the asymptomatic baseline, marks it as
    /// progressing to clinical, and schedules the onset after a normally
    /// perturbed delay clamped to ±15 days around the configured mean.
    fn arm_relapse(&mut self, id: PersonId, parasite: ParasiteUid) {
        self.with_host(id, |person, ctx| {
            let asymptomatic = ctx
                .config
                .parasite_density_levels
                .log_parasite_density_asymptomatic;
            let biting_value = person.biting_level_value(ctx.config);
            let location = person.location();
            person
                .parasites
                .change_infection_force(-1.0, location, biting_value, ctx.config, ctx.foi);
            if let Some(lineage) = person.parasites.get_mut(parasite) {
                lineage.set_log10_density(asymptomatic);
                lineage.update_mode = DensityUpdate::ProgressToClinical;
            }
            person.parasites.recalculate(ctx.weighting);
            person
                .parasites
                .change_infection_force(1.0, location, biting_value, ctx.config, ctx.foi);
        });
        let mean = self.config.relapse_duration;
        let duration = self
            .rng
            .random_normal(f64::from(mean), 15.0)
            .round();
        #[allow(clippy::cast_possible_truncation)]
        let duration = (duration as i32).clamp(mean - 15, mean + 15).max(1);
        let day = self.scheduler.current_day();
        self.schedule_for(id, day + duration, EventKind::ProgressToClinical { parasite });
    }

    fn hand_to_immune_clearance(&mut self, id: PersonId, parasite: ParasiteUid, clamp: bool) {
        self.with_host(id, |person, ctx| {
            let asymptomatic = ctx
                .config
                .parasite_density_levels
                .log_parasite_density_asymptomatic;
            let biting_value = person.biting_level_value(ctx.config);
            let location = person.location();
            person
                .parasites
                .change_infection_force(-1.0, location, biting_value, ctx.config, ctx.foi);
            if let Some(lineage) = person.parasites.get_mut(parasite) {
                if clamp && lineage.log10_density() > asymptomatic {
                    lineage.set_log10_density(asymptomatic);
                }
                lineage.update_mode = DensityUpdate::ImmuneClearance;
            }
            person.parasites.recalculate(ctx.weighting);
            person
                .parasites
                .change_infection_force(1.0, location, biting_value, ctx.config, ctx.foi);
        });
    }

    fn clinical_duration(&mut self) -> i32 {
        let draw = self
            .rng
            .random_normal(CLINICAL_DURATION_MEAN, CLINICAL_DURATION_SD)
            .round();
        #[allow(clippy::cast_possible_truncation)]
        let days = draw as i32;
        days.clamp(CLINICAL_DURATION_MIN, CLINICAL_DURATION_MAX)
    }

    fn will_progress_to_death_when_receive_no_treatment(&mut self, age_class: usize) -> bool {
        let p = self.rng.random_flat();
        p <= self.config.mortality_when_treatment_fail_by_age_class[age_class]
    }

    fn will_progress_to_death_when_receive_treatment(&mut self, age_class: usize) -> bool {
        let p = self.rng.random_flat();
        // 90% lower than without treatment.
        p <= self.config.mortality_when_treatment_fail_by_age_class[age_class] * (1.0 - 0.9)
    }

    // ----- treatment --------------------------------------------------

    /// Administers a therapy, bookkeeping the lineage that caused the
    /// clinical case. Composite regimens fan out into deferred doses of
    /// their full-compliance sub-therapies.
    pub fn receive_therapy(
        &mut self,
        id: PersonId,
        therapy_id: TherapyId,
        clinical_caused_parasite: ParasiteUid,
        is_part_of_composite: bool,
    ) -> Result<(), MalsimError> {
        let therapy = self.config.therapy(therapy_id)?.clone();
        match &therapy {
            Therapy::Simple(simple) => {
                self.receive_simple_therapy(id, simple, is_part_of_composite)?;
            }
            Therapy::Composite(composite) => {
                self.population
                    .person_mut(id)
                    .starting_composite_drug_levels
                    .clear();
                let day = self.scheduler.current_day();
                for (sub_therapy, start_day) in
                    composite.therapy_ids.iter().zip(&composite.start_at_days)
                {
                    let simple = match self.config.therapy(*sub_therapy) {
                        Ok(Therapy::Simple(simple)) => simple.clone(),
                        _ => {
                            return Err(format!(
                                "complex therapy ({therapy_id}) contains a reference to an \
                                 unknown therapy id ({sub_therapy})"
                            )
                            .into());
                        }
                    };
                    if !simple.full_compliance {
                        return Err(format!(
                            "complex therapy ({therapy_id}) contains a reference to a therapy \
                             ({sub_therapy}) that has variable compliance"
                        )
                        .into());
                    }
                    if *start_day == 1 {
                        self.receive_simple_therapy(id, &simple, true)?;
                    } else {
                        self.schedule_for(
                            id,
                            day + start_day - 1,
                            EventKind::ReceiveTherapy {
                                therapy: *sub_therapy,
                                parasite: clinical_caused_parasite,
                            },
                        );
                    }
                }
            }
        }
        self.population.person_mut(id).last_therapy_id = Some(therapy_id);
        Ok(())
    }

    fn receive_simple_therapy(
        &mut self,
        id: PersonId,
        therapy: &SimpleTherapy,
        is_part_of_composite: bool,
    ) -> Result<(), MalsimError> {
        let dosing_days = self.complied_dosing_days(therapy)?;
        for drug_id in &therapy.drug_ids {
            self.add_drug_to_blood(id, *drug_id, dosing_days, is_part_of_composite)?;
        }
        Ok(())
    }

    /// Number of dosing days the patient completes. Full compliance is
    /// deterministic; otherwise the configured discrete distribution over
    /// completion days is sampled.
    pub fn complied_dosing_days(&mut self, therapy: &SimpleTherapy) -> Result<i32, MalsimError> {
        if therapy.full_compliance {
            return Ok(therapy.max_dosing_day);
        }
        let rv = self.rng.random_flat();
        let mut upper_bound = 0.0;
        for (index, probability) in therapy.pr_completed_days.iter().enumerate() {
            upper_bound += probability;
            if rv < upper_bound {
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                return Ok(index as i32 + 1);
            }
        }
        // The distribution should cover [0, 1); exhausting it is a fault.
        Err(format!("bounds of completed-day probabilities exceeded: rv = {rv}").into())
    }

    fn add_drug_to_blood(
        &mut self,
        id: PersonId,
        drug_id: DrugId,
        dosing_days: i32,
        is_part_of_composite: bool,
    ) -> Result<(), MalsimError> {
        let record = self.config.drug(drug_id)?.clone();
        let day = self.scheduler.current_day();
        let age_class = self.population.person(id).age_class();
        let sd = record.age_specific_drug_concentration_sd[age_class];
        let mean = record.age_specific_drug_absorption[age_class];
        let mut drug_level = self.rng.random_normal_truncated(mean, sd).max(0.0);

        let person = self.population.person_mut(id);
        if is_part_of_composite {
            if let Some(existing) = person.drugs_in_blood.get(drug_id) {
                // A long half-life compound still circulating keeps its
                // original exposure.
                drug_level = existing.starting_value;
            } else if let Some(noted) = person.starting_composite_drug_levels.get(&drug_id) {
                // A short half-life compound already taken and cleared.
                drug_level = *noted;
            }
            person
                .starting_composite_drug_levels
                .insert(drug_id, drug_level);
        }
        let last_update_value = person
            .drugs_in_blood
            .get(drug_id)
            .map_or(0.0, |drug| drug.last_update_value);
        person.drugs_in_blood.add_drug(Drug {
            drug_id,
            starting_value: drug_level,
            last_update_value,
            last_update_day: day,
            start_day: day,
            end_day: day + record.total_duration_of_drug_activity(dosing_days),
            dosing_days,
        });
        Ok(())
    }

    // ----- death ------------------------------------------------------

    /// The single death pathway: clears all transmissible state, cancels
    /// every pending event, notifies the stats sink, and releases the
    /// agent's arena slot.
    pub fn kill_person(&mut self, id: PersonId) {
        self.with_host(id, |person, ctx| {
            let biting_value = person.biting_level_value(ctx.config);
            let location = person.location();
            person
                .parasites
                .change_infection_force(-1.0, location, biting_value, ctx.config, ctx.foi);
            person.parasites.clear();
            person.parasites.recalculate(ctx.weighting);
            person.drugs_in_blood.clear();
            person.liver_parasite = None;
            person.set_host_state(HostState::Dead, ctx.indices);
            ctx.reporter.record_death(
                person.location(),
                person.birthday,
                person.number_of_times_bitten,
                person.age_class(),
            );
        });
        let pending = std::mem::take(&mut self.population.person_mut(id).pending_events);
        for event in pending {
            self.scheduler.cancel(event);
        }
        self.population.remove_dead_person(id);
    }

    // ----- daily batch passes -----------------------------------------

    fn perform_birth_event(&mut self) {
        for location in 0..self.config.number_of_locations() {
            let mean = self.population.size_at(location) as f64 * self.config.birth_rate
                / f64::from(crate::config::DAYS_IN_YEAR);
            let births = self.rng.random_poisson(mean);
            for _ in 0..births {
                self.give_1_birth(location);
            }
        }
    }

    fn give_1_birth(&mut self, location: LocationId) {
        let day = self.scheduler.current_day();
        let mut person = Person::new(location, location, 0, day, &self.config);
        let biting_level = self
            .rng
            .roulette(&self.config.relative_biting_info.biting_level_distribution)
            .unwrap_or(0);
        let moving_level = self
            .rng
            .roulette(&self.config.moving_level_info.moving_level_distribution)
            .unwrap_or(0);
        person.set_initial_levels(biting_level, moving_level);
        person.base_biting_level_value =
            self.config.relative_biting_info.biting_level_values[biting_level];
        let id = self.population.add_person(person);
        self.reporter.record_birth(location, 0);
        self.schedule_for(
            id,
            day + crate::config::DAYS_IN_YEAR,
            EventKind::Birthday,
        );
        self.schedule_for(
            id,
            day + self.config.update_frequency,
            EventKind::UpdateEveryKDays,
        );
    }

    fn perform_death_event(&mut self) {
        const MORTAL_STATES: [HostState; 4] = [
            HostState::Susceptible,
            HostState::Exposed,
            HostState::Asymptomatic,
            HostState::Clinical,
        ];
        for location in 0..self.config.number_of_locations() {
            for state in MORTAL_STATES {
                for age_class in 0..self.config.number_of_age_classes() {
                    let count = self
                        .population
                        .indices
                        .persons_at(location, state, age_class)
                        .len();
                    if count == 0 {
                        continue;
                    }
                    let mean = count as f64 * self.config.death_rate_by_age_class[age_class]
                        / f64::from(crate::config::DAYS_IN_YEAR);
                    let deaths = (self.rng.random_poisson(mean) as usize).min(count);
                    for _ in 0..deaths {
                        let bucket = self.population.indices.persons_at(location, state, age_class);
                        if bucket.is_empty() {
                            break;
                        }
                        let victim = bucket[self.rng.random_uniform(bucket.len())];
                        self.kill_person(victim);
                    }
                }
            }
        }
    }

    fn perform_circulation_event(&mut self) {
        let day = self.scheduler.current_day();
        let mut today_circulations: Vec<PersonId> = Vec::new();
        for from in 0..self.config.number_of_locations() {
            let population_size = self.population.size_at(from);
            if population_size == 0 {
                continue;
            }
            let mean = population_size as f64 * self.config.circulation_info.circulation_percent;
            let trips = self.rng.random_poisson(mean);
            for _ in 0..trips {
                let Some(destination) = self.rng.roulette(&self.config.spatial_weights[from])
                else {
                    continue;
                };
                let Some(traveller) = self.random_person_by_moving_level(from) else {
                    continue;
                };
                self.population
                    .person_mut(traveller)
                    .today_target_locations
                    .push(destination);
                today_circulations.push(traveller);
            }
        }
        for id in today_circulations {
            if self.population.get(id).is_none() {
                continue;
            }
            let chosen = {
                let (people, _indices, _foi) = self.population.parts_mut();
                let person = people[id.0].as_mut().expect("stale person handle");
                person.choose_today_target_location(&mut self.rng)
            };
            if let Some(destination) = chosen {
                self.population.person_mut(id).number_of_trips_taken += 1;
                self.schedule_for(
                    id,
                    day + 1,
                    EventKind::CirculateToTargetLocation { destination },
                );
            }
        }
    }

    fn perform_infection_event(&mut self) {
        let day = self.scheduler.current_day();
        let mut today_infected: Vec<PersonId> = Vec::new();
        for location in 0..self.config.number_of_locations() {
            let Some(distribution) = self
                .population
                .foi
                .sampling_distribution(location)
                .map(<[f64]>::to_vec)
            else {
                continue;
            };
            let total: f64 = distribution.iter().sum();
            if total <= f64::EPSILON {
                continue;
            }
            let poisson_mean = self.config.locations[location].beta * total;
            let bites = self.rng.random_poisson(poisson_mean);
            for _ in 0..bites {
                let Some(genotype) = self.rng.roulette(&distribution) else {
                    continue;
                };
                let Some(bitten) = self.random_person_by_biting_level(location) else {
                    continue;
                };
                let infected = {
                    let (people, _indices, _foi) = self.population.parts_mut();
                    let person = people[bitten.0].as_mut().expect("stale person handle");
                    person.inflict_bite(day, genotype, &self.config, &mut self.rng)
                };
                if infected {
                    today_infected.push(bitten);
                }
            }
        }
        for id in today_infected {
            if self.population.get(id).is_none() {
                continue;
            }
            let chosen = {
                let (people, _indices, _foi) = self.population.parts_mut();
                let person = people[id.0].as_mut().expect("stale person handle");
                person.choose_today_infection(&mut self.rng)
            };
            if let Some(genotype) = chosen {
                self.infected_by(id, genotype);
            }
        }
    }

    /// Settles today's chosen infection into the liver stage. Re-infection
    /// while a latent infection is pending is ignored.
    fn infected_by(&mut self, id: PersonId, genotype: GenotypeId) {
        let day = self.scheduler.current_day();
        let accepted = self.with_host(id, |person, ctx| {
            if person.liver_parasite.is_some() {
                return false;
            }
            if person.host_state() == HostState::Susceptible {
                person.set_host_state(HostState::Exposed, ctx.indices);
            }
            person.liver_parasite = Some(genotype);
            true
        });
        if accepted {
            self.schedule_for(
                id,
                day + INCUBATION_DAYS,
                EventKind::MoveParasiteToBlood { genotype },
            );
        }
    }

    // ----- sampling helpers -------------------------------------------

    fn random_person_at_location(&mut self, location: LocationId) -> Option<PersonId> {
        let total = self.population.size_at(location);
        if total == 0 {
            return None;
        }
        let mut remaining = self.rng.random_uniform(total);
        for state in [
            HostState::Susceptible,
            HostState::Exposed,
            HostState::Asymptomatic,
            HostState::Clinical,
        ] {
            for age_class in 0..self.config.number_of_age_classes() {
                let bucket = self.population.indices.persons_at(location, state, age_class);
                if remaining < bucket.len() {
                    return Some(bucket[remaining]);
                }
                remaining -= bucket.len();
            }
        }
        None
    }

    fn random_person_by_moving_level(&mut self, location: LocationId) -> Option<PersonId> {
        let info = &self.config.moving_level_info;
        let weights: Vec<f64> = (0..info.number_of_moving_levels)
            .map(|level| {
                info.moving_level_values[level]
                    * self
                        .population
                        .indices
                        .persons_by_moving_level(location, level)
                        .len() as f64
            })
            .collect();
        let level = self.rng.roulette(&weights)?;
        let bucket = self.population.indices.persons_by_moving_level(location, level);
        Some(bucket[self.rng.random_uniform(bucket.len())])
    }

    fn random_person_by_biting_level(&mut self, location: LocationId) -> Option<PersonId> {
        let info = &self.config.relative_biting_info;
        let weights: Vec<f64> = (0..info.number_of_biting_levels)
            .map(|level| {
                info.biting_level_values[level]
                    * self
                        .population
                        .indices
                        .persons_by_biting_level(location, level)
                        .len() as f64
            })
            .collect();
        let level = self.rng.roulette(&weights)?;
        let bucket = self.population.indices.persons_by_biting_level(location, level);
        Some(bucket[self.rng.random_uniform(bucket.len())])
    }
}
