//! Event records and payloads.
//!
//! An event is a timestamped, one-shot action bound to an owning agent (or
//! to the population as a whole when `owner` is `None`). Events are value
//! types held by the [`Scheduler`](crate::scheduler::Scheduler); cancelling
//! one flips its `executable` flag in place so it becomes a no-op when it is
//! eventually dequeued.

use crate::config::LocationId;
use crate::parasites::ParasiteUid;
use crate::population::PersonId;
use crate::therapy::{GenotypeId, TherapyId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// What happens when an event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A latent liver infection emerges into the blood.
    MoveParasiteToBlood { genotype: GenotypeId },
    /// A lineage triggers a clinical episode (first onset or relapse).
    ProgressToClinical { parasite: ParasiteUid },
    /// End of a treated clinical episode.
    EndClinical { parasite: ParasiteUid },
    /// End of an untreated clinical episode; may relapse.
    EndClinicalByNoTreatment { parasite: ParasiteUid },
    /// A lineage's gametocytes mature and become transmissible.
    MatureGametocyte { parasite: ParasiteUid },
    /// A deferred dose of a composite regimen is administered.
    ReceiveTherapy {
        therapy: TherapyId,
        parasite: ParasiteUid,
    },
    /// Checks whether the causing lineage survived treatment.
    TestTreatmentFailure {
        parasite: ParasiteUid,
        therapy: TherapyId,
    },
    /// Daily whole-host refresh while any drug remains in the blood.
    UpdateWhenDrugIsPresent { parasite: ParasiteUid },
    /// Recurring whole-host refresh.
    UpdateEveryKDays,
    /// Annual age increment.
    Birthday,
    /// Arrival at a travel destination scheduled the previous day.
    CirculateToTargetLocation { destination: LocationId },
    /// Return home at the end of a trip.
    ReturnToResidence,
    /// Fatal outcome of a clinical episode.
    DeathFromMalaria { parasite: ParasiteUid },
    /// Population event: seed imported infections at a location.
    ImportParasites {
        location: LocationId,
        genotype: GenotypeId,
        number_of_cases: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub day: i32,
    pub owner: Option<PersonId>,
    pub executable: bool,
    pub kind: EventKind,
}
