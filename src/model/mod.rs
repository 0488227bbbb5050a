//! # Statistical Models
//!
//! The likelihood layer (pair HMM and cache) and the latent inference
//! engines built on it. Every engine takes `(haplotypes, prior model,
//! likelihood cache)` and returns posteriors plus a log-evidence for model
//! comparison.
//!
//! ## Sub-modules
//! - `pairhmm`: read-haplotype alignment likelihoods
//! - `likelihood`: flank-aware scoring front end and the per-step cache
//! - `priors`: coalescent genotype priors, de-novo and somatic mutation models
//! - `individual`: single-sample exact posterior
//! - `trio`: joint mother/father/child posterior with de-novo transmission
//! - `cancer`: germline / CNV / somatic sub-models and model posteriors
//! - `population`: multi-sample EM with shared haplotype frequencies

pub mod cancer;
pub mod individual;
pub mod likelihood;
pub mod pairhmm;
pub mod population;
pub mod priors;
pub mod trio;

pub use cancer::{CancerLatents, CancerModel, CancerModelParams, ModelPosteriors};
pub use individual::{IndividualLatents, IndividualModel};
pub use likelihood::{FlankState, HaplotypeLikelihoodModel, LikelihoodCache};
pub use pairhmm::{PairHmmParams, PairHmmWorkspace};
pub use population::{PopulationLatents, PopulationModel};
pub use priors::{
    CoalescentModel, DenovoModel, GenotypePriorModel, SiteCounts, SomaticMutationModel,
    UniformPriorModel,
};
pub use trio::{Trio, TrioLatents, TrioModel, TrioPloidies};
