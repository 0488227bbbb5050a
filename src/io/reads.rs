//! # Read Providers
//!
//! The calling core consumes reads through the `ReadProvider` interface:
//! region-indexed, per-sample, already filtered. Binary alignment decoding
//! (BAM/CRAM) lives behind this boundary; the SAM provider hand-parses the
//! text form the same way the VCF module hand-parses records, and the
//! in-memory provider backs the test scaffolding.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::data::read::{AlignedRead, CigarOp, CigarOpKind, ReadMap, SampleName};
use crate::data::region::GenomicRegion;
use crate::error::{Result, TernError};

/// Region-indexed access to aligned reads, per sample.
pub trait ReadProvider: Send + Sync {
    /// Samples this provider serves, in output order.
    fn samples(&self) -> Vec<SampleName>;

    /// Fetch reads overlapping `region` for every sample, applying the
    /// provider's filters. Samples with no reads map to empty vectors.
    fn fetch_reads(&self, region: &GenomicRegion) -> Result<ReadMap>;

    /// Clone into a provider for another worker thread.
    fn clone_provider(&self) -> Box<dyn ReadProvider>;
}

/// Filters applied by providers before reads reach the core.
#[derive(Clone, Copy, Debug)]
pub struct ReadFilterOptions {
    /// Reads mapped below this quality are dropped.
    pub min_mapping_quality: u8,
    /// Drop reads flagged as duplicates.
    pub drop_duplicates: bool,
}

impl Default for ReadFilterOptions {
    fn default() -> Self {
        Self {
            min_mapping_quality: 20,
            drop_duplicates: true,
        }
    }
}

/// Provider over reads already in memory.
pub struct InMemoryReadProvider {
    reads: std::sync::Arc<ReadMap>,
    filters: ReadFilterOptions,
}

impl InMemoryReadProvider {
    pub fn new(reads: ReadMap, filters: ReadFilterOptions) -> Self {
        Self {
            reads: std::sync::Arc::new(reads),
            filters,
        }
    }
}

impl ReadProvider for InMemoryReadProvider {
    fn samples(&self) -> Vec<SampleName> {
        self.reads.keys().cloned().collect()
    }

    fn fetch_reads(&self, region: &GenomicRegion) -> Result<ReadMap> {
        Ok(self
            .reads
            .iter()
            .map(|(sample, reads)| {
                let kept: Vec<AlignedRead> = reads
                    .iter()
                    .filter(|r| {
                        r.overlaps(region) && r.mapq() >= self.filters.min_mapping_quality
                    })
                    .cloned()
                    .collect();
                (sample.clone(), kept)
            })
            .collect())
    }

    fn clone_provider(&self) -> Box<dyn ReadProvider> {
        Box::new(Self {
            reads: std::sync::Arc::clone(&self.reads),
            filters: self.filters,
        })
    }
}

/// Load a SAM file into an in-memory provider. Sample identity comes from
/// `@RG SM:` headers via each record's `RG:Z:` tag; records without a read
/// group fall back to `fallback_sample` (typically the file stem).
///
/// Unmapped, secondary, supplementary, and (optionally) duplicate records
/// are dropped, as are reads below the mapping-quality floor.
pub fn load_sam(
    path: &Path,
    fallback_sample: &str,
    filters: ReadFilterOptions,
) -> Result<InMemoryReadProvider> {
    const FLAG_UNMAPPED: u16 = 0x4;
    const FLAG_REVERSE: u16 = 0x10;
    const FLAG_FIRST: u16 = 0x40;
    const FLAG_SECONDARY: u16 = 0x100;
    const FLAG_DUPLICATE: u16 = 0x400;
    const FLAG_SUPPLEMENTARY: u16 = 0x800;

    if !path.exists() {
        return Err(TernError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut read_groups: HashMap<String, SampleName> = HashMap::new();
    let mut reads = ReadMap::new();
    let fallback: SampleName = fallback_sample.into();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('@') {
            if let Some(rg) = header.strip_prefix("RG\t") {
                let mut id = None;
                let mut sample = None;
                for field in rg.split('\t') {
                    if let Some(v) = field.strip_prefix("ID:") {
                        id = Some(v.to_string());
                    } else if let Some(v) = field.strip_prefix("SM:") {
                        sample = Some(SampleName::from(v));
                    }
                }
                if let (Some(id), Some(sample)) = (id, sample) {
                    read_groups.insert(id, sample);
                }
            }
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 11 {
            return Err(TernError::parse(lineno + 1, "SAM record with fewer than 11 fields"));
        }
        let flag: u16 = fields[1]
            .parse()
            .map_err(|_| TernError::parse(lineno + 1, "malformed FLAG"))?;
        if flag & (FLAG_UNMAPPED | FLAG_SECONDARY | FLAG_SUPPLEMENTARY) != 0 {
            continue;
        }
        if filters.drop_duplicates && flag & FLAG_DUPLICATE != 0 {
            continue;
        }
        let mapq: u8 = fields[4]
            .parse()
            .map_err(|_| TernError::parse(lineno + 1, "malformed MAPQ"))?;
        if mapq < filters.min_mapping_quality {
            continue;
        }
        let pos: u64 = fields[3]
            .parse::<u64>()
            .map_err(|_| TernError::parse(lineno + 1, "malformed POS"))?
            .checked_sub(1)
            .ok_or_else(|| TernError::parse(lineno + 1, "POS must be positive for mapped reads"))?;
        let cigar = parse_cigar(fields[5])
            .ok_or_else(|| TernError::parse(lineno + 1, "malformed CIGAR"))?;
        let sequence = fields[9].as_bytes().to_ascii_uppercase();
        let qualities: Vec<u8> = if fields[10] == "*" {
            vec![30; sequence.len()]
        } else {
            fields[10].bytes().map(|b| b.saturating_sub(33)).collect()
        };
        if sequence.len() != qualities.len() {
            return Err(TernError::parse(lineno + 1, "SEQ and QUAL length mismatch"));
        }
        let sample = fields[11..]
            .iter()
            .find_map(|f| f.strip_prefix("RG:Z:"))
            .and_then(|id| read_groups.get(id).cloned())
            .unwrap_or_else(|| fallback.clone());
        let read = AlignedRead::new(
            fields[0],
            fields[2],
            pos,
            mapq,
            cigar,
            sequence,
            qualities,
            flag & FLAG_REVERSE != 0,
            flag & FLAG_FIRST != 0,
        );
        reads.entry(sample).or_default().push(read);
    }
    for sample_reads in reads.values_mut() {
        sample_reads.sort_by_key(|r| (r.contig().clone(), r.begin()));
    }
    Ok(InMemoryReadProvider::new(reads, ReadFilterOptions {
        // already applied while loading
        min_mapping_quality: 0,
        drop_duplicates: false,
    }))
}

fn parse_cigar(text: &str) -> Option<Vec<CigarOp>> {
    if text == "*" {
        return Some(Vec::new());
    }
    let mut ops = Vec::new();
    let mut len = 0u32;
    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            len = len.checked_mul(10)?.checked_add(digit)?;
            continue;
        }
        let kind = match c {
            'M' | '=' | 'X' => CigarOpKind::Match,
            'I' => CigarOpKind::Insertion,
            'D' => CigarOpKind::Deletion,
            'S' => CigarOpKind::SoftClip,
            'H' => CigarOpKind::HardClip,
            'N' => CigarOpKind::RefSkip,
            'P' => {
                len = 0;
                continue;
            }
            _ => return None,
        };
        if len == 0 {
            return None;
        }
        ops.push(CigarOp::new(kind, len));
        len = 0;
    }
    (len == 0).then_some(ops)
}

/// Merge several providers (one per input file) into one map of samples.
pub struct MergedReadProvider {
    providers: Vec<Box<dyn ReadProvider>>,
}

impl MergedReadProvider {
    pub fn new(providers: Vec<Box<dyn ReadProvider>>) -> Self {
        Self { providers }
    }
}

impl ReadProvider for MergedReadProvider {
    fn samples(&self) -> Vec<SampleName> {
        let mut samples: Vec<SampleName> = self
            .providers
            .iter()
            .flat_map(|p| p.samples())
            .collect();
        samples.sort();
        samples.dedup();
        samples
    }

    fn fetch_reads(&self, region: &GenomicRegion) -> Result<ReadMap> {
        let mut merged = ReadMap::new();
        for provider in &self.providers {
            for (sample, mut reads) in provider.fetch_reads(region)? {
                merged.entry(sample).or_default().append(&mut reads);
            }
        }
        for reads in merged.values_mut() {
            reads.sort_by_key(|r| (r.contig().clone(), r.begin()));
        }
        Ok(merged)
    }

    fn clone_provider(&self) -> Box<dyn ReadProvider> {
        Box::new(Self {
            providers: self
                .providers
                .iter()
                .map(|p| p.clone_provider())
                .collect(),
        })
    }
}
