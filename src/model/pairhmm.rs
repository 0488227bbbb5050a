//! # Pair HMM Read-Haplotype Alignment
//!
//! Log-space forward algorithm over the standard three-state (match /
//! insert / delete) pair HMM with affine gap penalties. Emission
//! probabilities come from per-base qualities; gap-open penalties are
//! relieved inside homopolymer runs, where sequencer indel error
//! concentrates.
//!
//! The read is aligned globally, the haplotype locally: any start offset in
//! the haplotype is allowed at uniform prior and any end offset is free.
//! Buffers are reused across calls through `PairHmmWorkspace`.

use crate::utils::maths::{log_sum_exp2, log_sum_exp};

/// Phred-scaled gap model.
#[derive(Clone, Copy, Debug)]
pub struct PairHmmParams {
    /// Gap-open penalty outside homopolymers.
    pub gap_open_phred: f64,
    /// Penalty relief per homopolymer base, down to `min_gap_open_phred`.
    pub homopolymer_relief_phred: f64,
    /// Floor for the relieved gap-open penalty.
    pub min_gap_open_phred: f64,
    /// Gap-extension penalty.
    pub gap_extend_phred: f64,
}

impl Default for PairHmmParams {
    fn default() -> Self {
        Self {
            gap_open_phred: 45.0,
            homopolymer_relief_phred: 3.0,
            min_gap_open_phred: 12.0,
            gap_extend_phred: 3.0,
        }
    }
}

#[inline]
fn phred_to_ln(phred: f64) -> f64 {
    -phred * std::f64::consts::LN_10 / 10.0
}

/// Per-position log gap-open probabilities for a haplotype, scaled by the
/// homopolymer run covering each position.
pub fn homopolymer_gap_open(sequence: &[u8], params: &PairHmmParams) -> Vec<f64> {
    let n = sequence.len();
    let mut run_len = vec![1u32; n];
    // longest run through each position, computed in two sweeps
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && sequence[j] == sequence[i] {
            j += 1;
        }
        let len = (j - i) as u32;
        for r in &mut run_len[i..j] {
            *r = len;
        }
        i = j;
    }
    run_len
        .iter()
        .map(|&len| {
            let relieved = params.gap_open_phred - params.homopolymer_relief_phred * (len - 1) as f64;
            phred_to_ln(relieved.max(params.min_gap_open_phred))
        })
        .collect()
}

/// Reusable forward-pass buffers (three states, two rolled rows each).
#[derive(Debug, Default)]
pub struct PairHmmWorkspace {
    match_prev: Vec<f64>,
    match_curr: Vec<f64>,
    insert_prev: Vec<f64>,
    insert_curr: Vec<f64>,
    delete_prev: Vec<f64>,
    delete_curr: Vec<f64>,
}

impl PairHmmWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn resize(&mut self, hap_len: usize) {
        let n = hap_len + 1;
        for buf in [
            &mut self.match_prev,
            &mut self.match_curr,
            &mut self.insert_prev,
            &mut self.insert_curr,
            &mut self.delete_prev,
            &mut self.delete_curr,
        ] {
            buf.clear();
            buf.resize(n, f64::NEG_INFINITY);
        }
    }
}

/// `ln P(read | haplotype)` under the pair HMM.
///
/// `gap_open_ln[j]` is the log gap-open probability at haplotype position
/// `j` (see [`homopolymer_gap_open`]). `flank` optionally gives the
/// `[begin, end)` haplotype offsets of the active region; emissions outside
/// it are scored as matches so flank variation is not double-counted across
/// active regions.
pub fn forward_log_probability(
    read: &[u8],
    qualities: &[u8],
    haplotype: &[u8],
    gap_open_ln: &[f64],
    params: &PairHmmParams,
    flank: Option<(usize, usize)>,
    ws: &mut PairHmmWorkspace,
) -> f64 {
    debug_assert_eq!(read.len(), qualities.len());
    debug_assert_eq!(haplotype.len(), gap_open_ln.len());
    let r_len = read.len();
    let h_len = haplotype.len();
    if r_len == 0 {
        return 0.0;
    }
    if h_len == 0 {
        return f64::NEG_INFINITY;
    }

    let ln_extend = phred_to_ln(params.gap_extend_phred);
    // probability of staying out of a gap, in log space
    let ln_no_gap = {
        let max_open = gap_open_ln
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        (1.0 - 2.0 * max_open.exp()).max(0.25).ln()
    };
    let ln_gap_close = (1.0 - ln_extend.exp()).max(0.25).ln();
    let ln_start = -((h_len as f64).ln());

    let emission = |i: usize, j: usize| -> f64 {
        if let Some((begin, end)) = flank {
            if j < begin || j >= end {
                // flank positions score as matching
                return 0.0;
            }
        }
        let e = phred_to_ln(qualities[i] as f64);
        let read_base = read[i];
        let hap_base = haplotype[j];
        if read_base == hap_base && read_base != b'N' {
            (1.0 - e.exp()).max(f64::MIN_POSITIVE).ln()
        } else if read_base == b'N' || hap_base == b'N' {
            // uninformative base
            (0.25f64).ln()
        } else {
            e + (1.0f64 / 3.0).ln()
        }
    };

    ws.resize(h_len);

    // first read base: free start anywhere in the haplotype
    ws.match_prev[0] = f64::NEG_INFINITY;
    ws.insert_prev[0] = ln_start + phred_to_ln(qualities[0] as f64);
    ws.delete_prev[0] = f64::NEG_INFINITY;
    for j in 1..=h_len {
        let hap_index = j - 1;
        ws.match_prev[j] = ln_start + emission(0, hap_index);
        ws.insert_prev[j] = f64::NEG_INFINITY;
        ws.delete_prev[j] = log_sum_exp2(
            ws.match_prev[j - 1] + gap_open_ln[hap_index],
            ws.delete_prev[j - 1] + ln_extend,
        );
    }

    for i in 1..r_len {
        ws.match_curr[0] = f64::NEG_INFINITY;
        ws.insert_curr[0] = ws.insert_prev[0] + ln_extend;
        ws.delete_curr[0] = f64::NEG_INFINITY;
        for j in 1..=h_len {
            let hap_index = j - 1;
            let m = log_sum_exp(&[
                ws.match_prev[j - 1] + ln_no_gap,
                ws.insert_prev[j - 1] + ln_gap_close,
                ws.delete_prev[j - 1] + ln_gap_close,
            ]) + emission(i, hap_index);
            let ins = log_sum_exp2(
                ws.match_prev[j] + gap_open_ln[hap_index],
                ws.insert_prev[j] + ln_extend,
            );
            let del = log_sum_exp2(
                ws.match_curr[j - 1] + gap_open_ln[hap_index],
                ws.delete_curr[j - 1] + ln_extend,
            );
            ws.match_curr[j] = m;
            ws.insert_curr[j] = ins;
            ws.delete_curr[j] = del;
        }
        std::mem::swap(&mut ws.match_prev, &mut ws.match_curr);
        std::mem::swap(&mut ws.insert_prev, &mut ws.insert_curr);
        std::mem::swap(&mut ws.delete_prev, &mut ws.delete_curr);
    }

    // free end: sum final match/insert states over all haplotype positions
    let mut result = f64::NEG_INFINITY;
    for j in 1..=h_len {
        result = log_sum_exp2(result, ws.match_prev[j]);
        result = log_sum_exp2(result, ws.insert_prev[j]);
    }
    debug_assert!(!result.is_nan(), "pair HMM produced NaN");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(read: &[u8], haplotype: &[u8]) -> f64 {
        let params = PairHmmParams::default();
        let gap_open = homopolymer_gap_open(haplotype, &params);
        let quals = vec![30u8; read.len()];
        let mut ws = PairHmmWorkspace::new();
        forward_log_probability(read, &quals, haplotype, &gap_open, &params, None, &mut ws)
    }

    #[test]
    fn test_perfect_match_beats_mismatch() {
        let hap = b"ACGTACGTACGT";
        let matching = score(b"ACGTAC", hap);
        let mismatching = score(b"ACCTAC", hap);
        assert!(matching > mismatching);
        assert!(matching.is_finite());
    }

    #[test]
    fn test_supported_haplotype_scores_higher() {
        // read carries the alt; alt haplotype should win
        let ref_hap = b"AAAACGTAAAA";
        let alt_hap = b"AAAACCTAAAA";
        let read = b"AACCTAA";
        assert!(score(read, alt_hap) > score(read, ref_hap));
    }

    #[test]
    fn test_gap_scores_worse_than_match() {
        let hap = b"ACGTACGTACGT";
        let full = score(b"ACGTACGT", hap);
        let gapped = score(b"ACGTCGT", hap); // one base deleted
        assert!(full > gapped);
    }

    #[test]
    fn test_homopolymer_relief() {
        let params = PairHmmParams::default();
        let uniform = homopolymer_gap_open(b"ACGT", &params);
        let run = homopolymer_gap_open(b"AAAAAAAACGT", &params);
        // gap opening is cheaper inside the homopolymer
        assert!(run[0] > uniform[0]);
    }

    #[test]
    fn test_flank_masks_mismatches() {
        let hap = b"AAAACGTAAAA";
        let read = b"TTTTCGT"; // disagrees left of offset 4
        let params = PairHmmParams::default();
        let gap_open = homopolymer_gap_open(hap, &params);
        let quals = vec![30u8; read.len()];
        let mut ws = PairHmmWorkspace::new();
        let masked = forward_log_probability(
            read, &quals, hap, &gap_open, &params, Some((4, 7)), &mut ws,
        );
        let unmasked =
            forward_log_probability(read, &quals, hap, &gap_open, &params, None, &mut ws);
        assert!(masked > unmasked);
    }

    #[test]
    fn test_no_nan_on_empty_read() {
        assert_eq!(score(b"", b"ACGT"), 0.0);
    }
}
