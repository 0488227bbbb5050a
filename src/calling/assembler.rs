//! # Local Re-assembly
//!
//! Per-bin de Bruijn assembly of masked read sequences against the
//! reference. The graph is keyed by k-mers; bubbles that diverge from the
//! reference path and rejoin it become candidate variants. A bin that
//! produces an ambiguous graph (cycles, lost anchors, runaway paths) fails
//! recoverably and the caller retries with fallback k-mer sizes.

use std::collections::HashMap;

use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;

/// Assembly tuning; defaults follow the candidate generator's options.
#[derive(Clone, Debug)]
pub struct AssemblerOptions {
    /// Bases at or below this quality are masked out of the graph.
    pub mask_threshold: u8,
    /// Minimum reads supporting every off-reference edge of a bubble.
    pub min_supporting_reads: u32,
    /// Longest variant the assembler may emit.
    pub max_variant_size: u64,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            mask_threshold: 0,
            min_supporting_reads: 2,
            max_variant_size: 500,
        }
    }
}

/// Recoverable per-bin assembly failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblyError {
    /// Bin shorter than the k-mer size.
    BinTooSmall,
    /// The reference path repeats a k-mer, making anchors ambiguous.
    AmbiguousReference,
    /// A bubble walk exceeded the length bound (cycle or runaway).
    Cyclic,
}

/// A de Bruijn graph over one bin at a fixed k-mer size.
pub struct Assembler {
    k: usize,
    options: AssemblerOptions,
    /// Edge counts: (k-mer, next base) from reads.
    edges: HashMap<Vec<u8>, Vec<(u8, u32)>>,
}

impl Assembler {
    pub fn new(k: usize, options: AssemblerOptions) -> Self {
        Self {
            k,
            options,
            edges: HashMap::new(),
        }
    }

    /// Insert a read sequence; bases at or below the mask threshold break
    /// the sequence into separately inserted fragments.
    pub fn insert_read(&mut self, sequence: &[u8], qualities: &[u8]) {
        debug_assert_eq!(sequence.len(), qualities.len());
        let mut fragment_start = 0usize;
        for i in 0..=sequence.len() {
            let masked = i < sequence.len()
                && (qualities[i] <= self.options.mask_threshold || !is_base(sequence[i]));
            if masked || i == sequence.len() {
                if i > fragment_start {
                    self.insert_fragment(&sequence[fragment_start..i], 1);
                }
                fragment_start = i + 1;
            }
        }
    }

    /// Insert the reference so bubbles can rejoin even at low coverage;
    /// reference edges carry no read support.
    pub fn insert_reference(&mut self, sequence: &[u8]) {
        self.insert_fragment(sequence, 0);
    }

    fn insert_fragment(&mut self, sequence: &[u8], support: u32) {
        if sequence.len() <= self.k {
            return;
        }
        for window in sequence.windows(self.k + 1) {
            let (kmer, next) = (&window[..self.k], window[self.k]);
            let entry = self.edges.entry(kmer.to_vec()).or_default();
            match entry.iter_mut().find(|(b, _)| *b == next) {
                Some((_, count)) => *count += support,
                None => entry.push((next, support)),
            }
        }
    }

    /// Extract variants for a bin whose reference sequence over
    /// `bin_region` is `reference`.
    pub fn extract_variants(
        &self,
        bin_region: &GenomicRegion,
        reference: &[u8],
    ) -> Result<Vec<Variant>, AssemblyError> {
        if reference.len() < self.k + 1 {
            return Err(AssemblyError::BinTooSmall);
        }
        // anchor positions of each reference k-mer; duplicates are fatal
        let mut ref_kmer_position: HashMap<&[u8], usize> = HashMap::new();
        for (i, kmer) in reference.windows(self.k).enumerate() {
            if ref_kmer_position.insert(kmer, i).is_some() {
                return Err(AssemblyError::AmbiguousReference);
            }
        }

        let max_walk = reference.len() + self.options.max_variant_size as usize;
        let mut variants = Vec::new();

        for start in 0..reference.len() - self.k {
            let anchor: &[u8] = &reference[start..start + self.k];
            let ref_next = reference[start + self.k];
            let Some(out_edges) = self.edges.get(anchor) else {
                continue;
            };
            for &(next, support) in out_edges {
                if next == ref_next || support < self.options.min_supporting_reads {
                    continue;
                }
                if let Some((alt_path, rejoin_position)) =
                    self.walk_bubble(anchor, next, &ref_kmer_position, max_walk)?
                {
                    if let Some(variant) = bubble_to_variant(
                        bin_region,
                        reference,
                        start,
                        rejoin_position,
                        &alt_path,
                        self.k,
                        self.options.max_variant_size,
                    ) {
                        variants.push(variant);
                    }
                }
            }
        }
        variants.sort();
        variants.dedup();
        Ok(variants)
    }

    /// Follow the highest-support off-reference path from `anchor` +
    /// `first` until it rejoins the reference k-mer set. Returns the path
    /// (bases after the anchor) and the rejoin k-mer's reference position.
    fn walk_bubble(
        &self,
        anchor: &[u8],
        first: u8,
        ref_kmer_position: &HashMap<&[u8], usize>,
        max_walk: usize,
    ) -> Result<Option<(Vec<u8>, usize)>, AssemblyError> {
        let mut kmer = anchor[1..].to_vec();
        kmer.push(first);
        let mut path = vec![first];
        loop {
            if let Some(&position) = ref_kmer_position.get(kmer.as_slice()) {
                return Ok(Some((path, position)));
            }
            if path.len() > max_walk {
                return Err(AssemblyError::Cyclic);
            }
            let Some(out_edges) = self.edges.get(kmer.as_slice()) else {
                return Ok(None);
            };
            let Some(&(next, support)) = out_edges
                .iter()
                .max_by_key(|(_, count)| *count)
            else {
                return Ok(None);
            };
            if support < self.options.min_supporting_reads {
                return Ok(None);
            }
            kmer.remove(0);
            kmer.push(next);
            path.push(next);
        }
    }
}

fn is_base(b: u8) -> bool {
    matches!(b, b'A' | b'C' | b'G' | b'T')
}

/// Convert a bubble into a single variant.
///
/// The bubble's alt sequence is `anchor + alt_path`; the path's final
/// `k` bases are the rejoin k-mer, so the replacement bases are
/// `alt_path[..len - k]` and the replaced reference bases run from the end
/// of the anchor k-mer to the rejoin position.
fn bubble_to_variant(
    bin_region: &GenomicRegion,
    reference: &[u8],
    divergence: usize,
    rejoin: usize,
    alt_path: &[u8],
    k: usize,
    max_variant_size: u64,
) -> Option<Variant> {
    let ref_begin = divergence + k;
    if rejoin < ref_begin || alt_path.len() < k {
        // back-edge into the anchor; not a clean bubble
        return None;
    }
    let ref_segment = &reference[ref_begin..rejoin];
    let alt_segment = &alt_path[..alt_path.len() - k];
    if ref_segment == alt_segment {
        return None;
    }
    let region = GenomicRegion::new(
        bin_region.contig().clone(),
        bin_region.begin() + ref_begin as u64,
        bin_region.begin() + (ref_begin + ref_segment.len()) as u64,
    );
    let variant = Variant::new(region, ref_segment.to_vec(), alt_segment.to_vec());
    let parsimonious = variant.make_parsimonious();
    let size = parsimonious
        .ref_sequence()
        .len()
        .max(parsimonious.alt_sequence().len()) as u64;
    (size <= max_variant_size).then_some(parsimonious)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(begin: u64, end: u64) -> GenomicRegion {
        GenomicRegion::new("chr1", begin, end)
    }

    fn options() -> AssemblerOptions {
        AssemblerOptions {
            mask_threshold: 0,
            min_supporting_reads: 2,
            max_variant_size: 500,
        }
    }

    #[test]
    fn test_snv_bubble() {
        let reference = b"ACGTGATCGATTACAGGCTT";
        //                          ^ A>G at offset 10 (T->G? see reads)
        let alt_read = b"ACGTGATCGAGTACAGGCTT"; // T>G at offset 10
        let mut assembler = Assembler::new(5, options());
        assembler.insert_reference(reference);
        for _ in 0..3 {
            assembler.insert_read(alt_read, &[30; 20]);
        }
        let variants = assembler
            .extract_variants(&region(100, 120), reference)
            .unwrap();
        assert_eq!(variants.len(), 1);
        let v = &variants[0];
        assert_eq!(v.region().begin(), 110);
        assert_eq!(v.ref_sequence(), b"T");
        assert_eq!(v.alt_sequence(), b"G");
    }

    #[test]
    fn test_low_support_bubble_is_dropped() {
        let reference = b"ACGTGATCGATTACAGGCTT";
        let alt_read = b"ACGTGATCGAGTACAGGCTT";
        let mut assembler = Assembler::new(5, options());
        assembler.insert_reference(reference);
        assembler.insert_read(alt_read, &[30; 20]);
        let variants = assembler
            .extract_variants(&region(100, 120), reference)
            .unwrap();
        assert!(variants.is_empty());
    }

    #[test]
    fn test_repetitive_reference_is_ambiguous() {
        let reference = b"ACGTACGTACGTACGTACGT";
        let assembler = Assembler::new(5, options());
        assert_eq!(
            assembler.extract_variants(&region(0, 20), reference),
            Err(AssemblyError::AmbiguousReference)
        );
    }

    #[test]
    fn test_masked_bases_break_fragments() {
        let mut assembler = Assembler::new(5, options());
        let mut quals = vec![30u8; 20];
        quals[10] = 0; // masked; no k-mer crosses it
        assembler.insert_read(b"ACGTGATCGATTACAGGCTT", &quals);
        for kmer in assembler.edges.keys() {
            assert!(!kmer.windows(1).any(|w| w == b"N"));
        }
    }
}
