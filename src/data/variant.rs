//! # Variants
//!
//! A variant is a (reference allele, alternate allele) pair over a single
//! region with differing sequences. Candidate containers keep variants
//! left-aligned and parsimonious so that deduplication collapses equivalent
//! representations.

use std::cmp::Ordering;
use std::fmt;

use crate::data::allele::Allele;
use crate::data::region::GenomicRegion;

/// A proposed or called difference from the reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Variant {
    region: GenomicRegion,
    ref_sequence: Vec<u8>,
    alt_sequence: Vec<u8>,
}

impl Variant {
    /// Create a variant; `ref_sequence` must equal the reference over
    /// `region` and differ from `alt_sequence`.
    pub fn new(
        region: GenomicRegion,
        ref_sequence: impl Into<Vec<u8>>,
        alt_sequence: impl Into<Vec<u8>>,
    ) -> Self {
        let ref_sequence = ref_sequence.into();
        let alt_sequence = alt_sequence.into();
        debug_assert_ne!(ref_sequence, alt_sequence, "variant with equal alleles");
        Self {
            region,
            ref_sequence,
            alt_sequence,
        }
    }

    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }

    pub fn ref_sequence(&self) -> &[u8] {
        &self.ref_sequence
    }

    pub fn alt_sequence(&self) -> &[u8] {
        &self.alt_sequence
    }

    pub fn ref_allele(&self) -> Allele {
        Allele::new(self.region.clone(), self.ref_sequence.clone())
    }

    pub fn alt_allele(&self) -> Allele {
        Allele::new(self.region.clone(), self.alt_sequence.clone())
    }

    pub fn is_snv(&self) -> bool {
        self.ref_sequence.len() == 1 && self.alt_sequence.len() == 1
    }

    pub fn is_insertion(&self) -> bool {
        self.alt_sequence.len() > self.ref_sequence.len()
    }

    pub fn is_deletion(&self) -> bool {
        self.alt_sequence.len() < self.ref_sequence.len()
    }

    pub fn is_indel(&self) -> bool {
        self.is_insertion() || self.is_deletion()
    }

    /// Shift an indel as far left as the reference allows, then strip shared
    /// context. `fetch` returns reference bases for an arbitrary window on
    /// the variant's contig.
    ///
    /// SNVs and already-parsimonious variants come back unchanged.
    pub fn left_align<F>(&self, fetch: F) -> Variant
    where
        F: Fn(&GenomicRegion) -> Vec<u8>,
    {
        let parsimonious = self.make_parsimonious();
        if !parsimonious.is_indel() {
            return parsimonious;
        }
        // The changing sequence for a pure indel after trimming.
        let (mut begin, inserted) = if parsimonious.is_insertion() && parsimonious.ref_sequence.is_empty()
        {
            (parsimonious.region.begin(), parsimonious.alt_sequence.clone())
        } else if parsimonious.is_deletion() && parsimonious.alt_sequence.is_empty() {
            (parsimonious.region.begin(), parsimonious.ref_sequence.clone())
        } else {
            // Complex substitution; nothing to slide.
            return parsimonious;
        };
        let period = inserted.len() as u64;
        if period == 0 || begin == 0 {
            return parsimonious;
        }
        // Slide left while the base entering the window equals the base
        // leaving it (rotation invariance of the repeated motif).
        let window = 64.max(period * 4);
        let mut motif = inserted;
        loop {
            let fetch_begin = begin.saturating_sub(window);
            if fetch_begin == begin {
                break;
            }
            let context = fetch(&GenomicRegion::new(
                parsimonious.region.contig().clone(),
                fetch_begin,
                begin,
            ));
            if context.len() != (begin - fetch_begin) as usize {
                break;
            }
            let mut moved = false;
            while begin > fetch_begin {
                let prev = context[(begin - 1 - fetch_begin) as usize];
                if prev != *motif.last().unwrap() {
                    break;
                }
                motif.rotate_right(1);
                begin -= 1;
                moved = true;
            }
            if !moved || begin > fetch_begin {
                break;
            }
        }
        let region_len = parsimonious.region.len();
        let region = GenomicRegion::new(
            parsimonious.region.contig().clone(),
            begin,
            begin + region_len,
        );
        if parsimonious.is_insertion() {
            Variant::new(region, Vec::new(), motif)
        } else {
            Variant::new(region, motif, Vec::new())
        }
    }

    /// Trim bases shared by both alleles from the right, then from the left,
    /// shrinking the region accordingly.
    pub fn make_parsimonious(&self) -> Variant {
        let mut r = self.ref_sequence.clone();
        let mut a = self.alt_sequence.clone();
        let mut begin = self.region.begin();
        while r.len() > 0 && a.len() > 0 && r.last() == a.last() && (r.len() > 1 || a.len() > 1) {
            r.pop();
            a.pop();
        }
        while r.len() > 0 && a.len() > 0 && r[0] == a[0] && (r.len() > 1 || a.len() > 1) {
            r.remove(0);
            a.remove(0);
            begin += 1;
        }
        let region = GenomicRegion::new(self.region.contig().clone(), begin, begin + r.len() as u64);
        if r == self.ref_sequence && a == self.alt_sequence && region == self.region {
            self.clone()
        } else {
            Variant::new(region, r, a)
        }
    }
}

impl PartialOrd for Variant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variant {
    fn cmp(&self, other: &Self) -> Ordering {
        self.region
            .cmp(&other.region)
            .then_with(|| self.ref_sequence.cmp(&other.ref_sequence))
            .then_with(|| self.alt_sequence.cmp(&other.alt_sequence))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}>{}",
            self.region,
            String::from_utf8_lossy(&self.ref_sequence),
            String::from_utf8_lossy(&self.alt_sequence)
        )
    }
}

/// Left-align, deduplicate, and sort a batch of raw candidates.
pub fn unique_left_align<F>(mut variants: Vec<Variant>, fetch: F) -> Vec<Variant>
where
    F: Fn(&GenomicRegion) -> Vec<u8>,
{
    for v in &mut variants {
        *v = v.left_align(&fetch);
    }
    variants.sort();
    variants.dedup();
    variants
}

/// Split variants into their component alt alleles, in order.
pub fn decompose(variants: &[Variant]) -> Vec<Allele> {
    let mut alleles: Vec<Allele> = variants.iter().map(Variant::alt_allele).collect();
    alleles.sort();
    alleles.dedup();
    alleles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(begin: u64, end: u64) -> GenomicRegion {
        GenomicRegion::new("chr1", begin, end)
    }

    #[test]
    fn test_parsimony_trims_shared_context() {
        // CAT>CGT at 10 is really A>G at 11
        let v = Variant::new(region(10, 13), b"CAT".to_vec(), b"CGT".to_vec());
        let p = v.make_parsimonious();
        assert_eq!(p.region(), &region(11, 12));
        assert_eq!(p.ref_sequence(), b"A");
        assert_eq!(p.alt_sequence(), b"G");
    }

    #[test]
    fn test_left_align_homopolymer_deletion() {
        // reference: pos 0.. = "TTTTTA"; deleting any T is the same deletion
        let reference = b"TTTTTA".to_vec();
        let fetch = |r: &GenomicRegion| {
            reference[r.begin() as usize..(r.end() as usize).min(reference.len())].to_vec()
        };
        let v = Variant::new(region(4, 5), b"T".to_vec(), b"".to_vec());
        let aligned = v.left_align(fetch);
        assert_eq!(aligned.region().begin(), 0);
        assert_eq!(aligned.ref_sequence(), b"T");
        assert!(aligned.alt_sequence().is_empty());
    }

    #[test]
    fn test_unique_left_align_collapses_duplicates() {
        let reference = b"GTTTTA".to_vec();
        let fetch = |r: &GenomicRegion| {
            reference[r.begin() as usize..(r.end() as usize).min(reference.len())].to_vec()
        };
        let a = Variant::new(region(2, 3), b"T".to_vec(), b"".to_vec());
        let b = Variant::new(region(4, 5), b"T".to_vec(), b"".to_vec());
        let out = unique_left_align(vec![a, b], fetch);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].region().begin(), 1);
    }

    #[test]
    fn test_snv_untouched_by_left_align() {
        let fetch = |_: &GenomicRegion| b"ACGT".to_vec();
        let v = Variant::new(region(2, 3), b"G".to_vec(), b"C".to_vec());
        assert_eq!(v.left_align(fetch), v);
    }
}
