//! # Calls
//!
//! Typed call records produced by the caller and consumed by the record
//! factory. A call maps a region, carries the reference allele, per-sample
//! genotype calls with posteriors and optional phase, an overall Phred
//! quality, and a kind tag distinguishing germline, de-novo, somatic, and
//! reference calls.

use std::collections::BTreeMap;

use crate::data::allele::Allele;
use crate::data::genotype::{GenotypeCall, PhaseCall};
use crate::data::phred::Phred;
use crate::data::read::SampleName;
use crate::data::region::GenomicRegion;

/// What kind of event a call asserts.
#[derive(Clone, Debug, PartialEq)]
pub enum CallKind {
    Germline,
    Denovo {
        /// Posterior that the child allele arose de novo.
        posterior: f64,
    },
    /// The child reverts to reference against parents homozygous for an
    /// alternate allele.
    DenovoReferenceReversion {
        posterior: f64,
    },
    Somatic {
        /// Posterior of the somatic sub-model at this site.
        posterior: f64,
        /// Posterior-mean tumour cell fraction carrying the allele.
        cellularity: f64,
    },
    Reference,
}

/// One call over one region.
#[derive(Clone, Debug)]
pub struct Call {
    pub region: GenomicRegion,
    pub ref_allele: Allele,
    /// The alternate allele asserted, absent for reference calls.
    pub alt_allele: Option<Allele>,
    pub genotype_calls: BTreeMap<SampleName, GenotypeCall>,
    pub quality: Phred,
    /// Posterior of the generating model against its rivals, when the
    /// caller compared models.
    pub model_posterior: Option<f64>,
    pub kind: CallKind,
}

impl Call {
    pub fn is_reference(&self) -> bool {
        matches!(self.kind, CallKind::Reference)
    }

    /// Set a sample's phase; the factory keeps phase when records shift.
    pub fn set_phase(&mut self, sample: &SampleName, phase: PhaseCall) {
        if let Some(genotype_call) = self.genotype_calls.get_mut(sample) {
            genotype_call.phase = Some(phase);
        }
    }
}
