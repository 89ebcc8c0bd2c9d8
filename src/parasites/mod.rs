//! The intra-host multi-genotype parasite population model.

pub mod clonal;
pub mod host_collection;

pub use clonal::{ClonalParasitePopulation, DensityUpdate, ParasiteUid, LOG_ZERO_PARASITE_DENSITY};
pub use host_collection::{
    relative_infectivity, CoInfectionWeighting, FreeRecombination,
    SingleHostClonalParasitePopulations,
};
