//! # Haplotypes
//!
//! A haplotype is an ordered run of non-overlapping alleles covering a
//! region, with the concrete sequence cached. Two haplotypes over the same
//! region with equal sequence are equal regardless of how they were built.
//!
//! Haplotypes are interned per region in a `HaplotypeArena` and referred to
//! by `HaplotypeId` in genotypes and likelihood tables, so the same
//! haplotype shared by many genotypes is stored once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::data::allele::Allele;
use crate::data::region::GenomicRegion;

/// Index of an interned haplotype within its region's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HaplotypeId(pub u32);

impl HaplotypeId {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A concrete sequence over a region, decomposed into alleles.
#[derive(Clone, Debug)]
pub struct Haplotype {
    region: GenomicRegion,
    alleles: Vec<Allele>,
    sequence: Vec<u8>,
}

impl Haplotype {
    /// Build a haplotype directly from a contiguous allele run. The alleles
    /// must tile `region` without gaps (insertions occupy empty regions).
    pub fn from_alleles(region: GenomicRegion, alleles: Vec<Allele>) -> Self {
        debug_assert!(alleles
            .windows(2)
            .all(|w| w[0].region().end() <= w[1].region().begin()));
        let sequence = alleles
            .iter()
            .flat_map(|a| a.sequence().iter().copied())
            .collect();
        Self {
            region,
            alleles,
            sequence,
        }
    }

    /// A haplotype equal to the reference over `region`.
    pub fn reference(region: GenomicRegion, ref_sequence: Vec<u8>) -> Self {
        debug_assert_eq!(region.len() as usize, ref_sequence.len());
        let allele = Allele::new(region.clone(), ref_sequence.clone());
        Self {
            region,
            alleles: vec![allele],
            sequence: ref_sequence,
        }
    }

    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn alleles(&self) -> &[Allele] {
        &self.alleles
    }

    /// The haplotype's own allele over `region`: the concatenation of the
    /// constituent (sub-)alleles covering it. Insertions exactly at the
    /// region boundaries are excluded (they belong to the neighbouring
    /// locus). `None` when a length-changing allele straddles the boundary
    /// and cannot be split.
    pub fn allele_at(&self, region: &GenomicRegion) -> Option<Allele> {
        if !self.region.contains(region) {
            return None;
        }
        if region.is_empty() {
            for own in &self.alleles {
                if own.region() == region {
                    return Some(own.clone());
                }
            }
            return Some(Allele::new(region.clone(), Vec::new()));
        }
        let mut sequence = Vec::new();
        for own in &self.alleles {
            let r = own.region();
            if r.is_empty() {
                if r.begin() > region.begin() && r.begin() < region.end() {
                    sequence.extend_from_slice(own.sequence());
                }
                continue;
            }
            if r.end() <= region.begin() || r.begin() >= region.end() {
                continue;
            }
            if region.contains(r) {
                sequence.extend_from_slice(own.sequence());
            } else {
                let sub = own.restrict(&r.overlapped(region))?;
                sequence.extend_from_slice(sub.sequence());
            }
        }
        Some(Allele::new(region.clone(), sequence))
    }

    /// Whether this haplotype carries `allele`: either as one of its explicit
    /// alleles, or as a sub-sequence of a longer constituent allele.
    pub fn contains(&self, allele: &Allele) -> bool {
        if !self.region.contains(allele.region()) {
            return false;
        }
        for own in &self.alleles {
            if own == allele {
                return true;
            }
            if own.region().contains(allele.region()) && !own.region().is_empty() {
                if let Some(sub) = own.restrict(allele.region()) {
                    return sub.sequence() == allele.sequence();
                }
            }
        }
        false
    }
}

impl PartialEq for Haplotype {
    fn eq(&self, other: &Self) -> bool {
        self.region == other.region && self.sequence == other.sequence
    }
}

impl Eq for Haplotype {}

impl std::hash::Hash for Haplotype {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.region.hash(state);
        self.sequence.hash(state);
    }
}

impl fmt::Display for Haplotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.region, String::from_utf8_lossy(&self.sequence))
    }
}

/// Incremental haplotype construction: feed variant alleles left to right;
/// reference gaps are filled at build time.
pub struct HaplotypeBuilder {
    region: GenomicRegion,
    reference: Arc<[u8]>,
    alleles: Vec<Allele>,
    cursor: u64,
}

impl HaplotypeBuilder {
    /// `reference` is the reference sequence over exactly `region`.
    pub fn new(region: GenomicRegion, reference: Arc<[u8]>) -> Self {
        debug_assert_eq!(region.len() as usize, reference.len());
        let cursor = region.begin();
        Self {
            region,
            reference,
            alleles: Vec::new(),
            cursor,
        }
    }

    fn reference_chunk(&self, begin: u64, end: u64) -> Allele {
        let s = (begin - self.region.begin()) as usize;
        let e = (end - self.region.begin()) as usize;
        Allele::new(
            GenomicRegion::new(self.region.contig().clone(), begin, end),
            self.reference[s..e].to_vec(),
        )
    }

    /// Append an allele; it must start at or after the current cursor and
    /// lie within the builder's region.
    pub fn push(&mut self, allele: Allele) {
        debug_assert!(allele.region().begin() >= self.cursor);
        debug_assert!(self.region.contains(allele.region()));
        if allele.region().begin() > self.cursor {
            self.alleles
                .push(self.reference_chunk(self.cursor, allele.region().begin()));
        }
        self.cursor = allele.region().end();
        self.alleles.push(allele);
    }

    /// Fill any trailing reference gap and produce the haplotype.
    pub fn build(mut self) -> Haplotype {
        if self.cursor < self.region.end() {
            let chunk = self.reference_chunk(self.cursor, self.region.end());
            self.alleles.push(chunk);
        }
        Haplotype::from_alleles(self.region, self.alleles)
    }
}

/// Per-region haplotype intern table.
///
/// The arena owns every haplotype produced while calling one region and is
/// dropped wholesale when the region closes.
#[derive(Default)]
pub struct HaplotypeArena {
    haplotypes: Vec<Arc<Haplotype>>,
    index: HashMap<(GenomicRegion, Vec<u8>), HaplotypeId>,
}

impl HaplotypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern, returning the existing id for an equal haplotype.
    pub fn intern(&mut self, haplotype: Haplotype) -> HaplotypeId {
        let key = (haplotype.region().clone(), haplotype.sequence().to_vec());
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = HaplotypeId(self.haplotypes.len() as u32);
        self.haplotypes.push(Arc::new(haplotype));
        self.index.insert(key, id);
        id
    }

    pub fn get(&self, id: HaplotypeId) -> &Haplotype {
        &self.haplotypes[id.as_usize()]
    }

    pub fn get_arc(&self, id: HaplotypeId) -> Arc<Haplotype> {
        Arc::clone(&self.haplotypes[id.as_usize()])
    }

    pub fn len(&self) -> usize {
        self.haplotypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.haplotypes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = HaplotypeId> + '_ {
        (0..self.haplotypes.len()).map(|i| HaplotypeId(i as u32))
    }
}
