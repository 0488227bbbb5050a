//! # Genotypes
//!
//! `Genotype<T>` is an unordered multiset of fixed ploidy, stored sorted so
//! that equal genotypes compare equal structurally. For `T = HaplotypeId` it
//! is a sample's haplotype assignment; for `T = Allele` it is the per-site
//! call written to output.
//!
//! `CancerGenotype` augments a germline genotype with somatic haplotypes and
//! their mixture weights.

use std::fmt;

use crate::data::allele::Allele;
use crate::data::haplotype::HaplotypeId;

/// Fixed-ploidy multiset, canonically sorted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Genotype<T: Ord> {
    elements: Vec<T>,
}

impl<T: Ord + Clone> Genotype<T> {
    /// Construct from any order; elements are sorted into canonical form.
    pub fn new(mut elements: Vec<T>) -> Self {
        elements.sort();
        Self { elements }
    }

    /// The empty (ploidy-zero) genotype.
    pub fn empty() -> Self {
        Self {
            elements: Vec::new(),
        }
    }

    pub fn ploidy(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.elements.iter()
    }

    pub fn elements(&self) -> &[T] {
        &self.elements
    }

    pub fn contains(&self, x: &T) -> bool {
        self.elements.binary_search(x).is_ok()
    }

    /// Multiplicity of `x`.
    pub fn count(&self, x: &T) -> u32 {
        self.elements.iter().filter(|e| *e == x).count() as u32
    }

    /// Whether all elements are equal.
    pub fn is_homozygous(&self) -> bool {
        self.elements.windows(2).all(|w| w[0] == w[1])
    }

    /// Map elementwise into another genotype.
    pub fn map<U: Ord + Clone, F: FnMut(&T) -> U>(&self, f: F) -> Genotype<U> {
        Genotype::new(self.elements.iter().map(f).collect())
    }
}

impl<T: Ord + Clone + fmt::Display> fmt::Display for Genotype<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.elements.iter().map(|e| e.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Number of distinct genotypes of the given ploidy over `n` elements:
/// `C(n + k - 1, k)`.
pub fn num_genotypes(n: usize, ploidy: u32) -> usize {
    let k = ploidy as usize;
    if n == 0 {
        return usize::from(k == 0);
    }
    // multiplicative binomial, small inputs only
    let mut result = 1usize;
    for i in 0..k {
        result = result * (n + i) / (i + 1);
    }
    result
}

/// Enumerate all multisets of size `ploidy` over element indices `0..n`,
/// as non-decreasing index vectors in lexicographic order.
pub fn enumerate_genotype_indices(n: usize, ploidy: u32) -> Vec<Vec<usize>> {
    let k = ploidy as usize;
    if k == 0 {
        return vec![Vec::new()];
    }
    if n == 0 {
        return Vec::new();
    }
    let mut result = Vec::with_capacity(num_genotypes(n, ploidy));
    let mut current = vec![0usize; k];
    loop {
        result.push(current.clone());
        // advance the rightmost index that can still grow
        let mut i = k;
        loop {
            if i == 0 {
                return result;
            }
            i -= 1;
            if current[i] + 1 < n {
                current[i] += 1;
                for j in i + 1..k {
                    current[j] = current[i];
                }
                break;
            }
        }
    }
}

/// Enumerate all `Genotype<HaplotypeId>` of the given ploidy over a
/// haplotype set.
pub fn enumerate_genotypes(haplotypes: &[HaplotypeId], ploidy: u32) -> Vec<Genotype<HaplotypeId>> {
    enumerate_genotype_indices(haplotypes.len(), ploidy)
        .into_iter()
        .map(|idx| Genotype::new(idx.into_iter().map(|i| haplotypes[i]).collect()))
        .collect()
}

/// A germline genotype plus somatic haplotypes with mixture weights.
///
/// Weights cover germline haplotypes followed by somatic haplotypes and sum
/// to one.
#[derive(Clone, Debug, PartialEq)]
pub struct CancerGenotype {
    pub germline: Genotype<HaplotypeId>,
    pub somatic: Vec<HaplotypeId>,
    pub mixture_weights: Vec<f64>,
}

impl CancerGenotype {
    pub fn new(germline: Genotype<HaplotypeId>, somatic: Vec<HaplotypeId>, mixture_weights: Vec<f64>) -> Self {
        debug_assert!(!somatic.is_empty());
        debug_assert_eq!(
            mixture_weights.len(),
            germline.ploidy() as usize + somatic.len()
        );
        debug_assert!((mixture_weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        Self {
            germline,
            somatic,
            mixture_weights,
        }
    }

    /// All haplotypes, germline first then somatic.
    pub fn haplotypes(&self) -> impl Iterator<Item = HaplotypeId> + '_ {
        self.germline
            .iter()
            .copied()
            .chain(self.somatic.iter().copied())
    }

    pub fn contains(&self, id: HaplotypeId) -> bool {
        self.germline.contains(&id) || self.somatic.contains(&id)
    }
}

/// Genotype call for one sample at one site.
#[derive(Clone, Debug, PartialEq)]
pub struct GenotypeCall {
    pub genotype: Genotype<Allele>,
    /// Posterior probability the genotype is correct.
    pub posterior: f64,
    /// Phase assignment, set by the phaser.
    pub phase: Option<PhaseCall>,
}

/// Phase-set membership: the region keying the set and the phase quality.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseCall {
    pub region: crate::data::region::GenomicRegion,
    pub score: crate::data::phred::Phred,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        let a = Genotype::new(vec![HaplotypeId(2), HaplotypeId(0)]);
        let b = Genotype::new(vec![HaplotypeId(0), HaplotypeId(2)]);
        assert_eq!(a, b);
        assert_eq!(a.ploidy(), 2);
    }

    #[test]
    fn test_enumeration_counts() {
        assert_eq!(num_genotypes(3, 2), 6);
        assert_eq!(enumerate_genotype_indices(3, 2).len(), 6);
        assert_eq!(enumerate_genotype_indices(4, 3).len(), num_genotypes(4, 3));
        assert_eq!(enumerate_genotype_indices(5, 0), vec![Vec::<usize>::new()]);
        assert!(enumerate_genotype_indices(0, 2).is_empty());
    }

    #[test]
    fn test_enumeration_is_sorted_multisets() {
        let all = enumerate_genotype_indices(3, 2);
        for g in &all {
            assert!(g.windows(2).all(|w| w[0] <= w[1]));
        }
        let unique: std::collections::BTreeSet<_> = all.iter().cloned().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_count_and_homozygous() {
        let g = Genotype::new(vec![HaplotypeId(1), HaplotypeId(1)]);
        assert!(g.is_homozygous());
        assert_eq!(g.count(&HaplotypeId(1)), 2);
        assert_eq!(g.count(&HaplotypeId(0)), 0);
    }
}
