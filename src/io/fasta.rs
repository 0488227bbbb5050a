//! # Reference Sequence Access
//!
//! Random access to an indexed FASTA reference. The `.fai` index is parsed
//! directly and sequence windows are fetched by seek, the same way the VCF
//! body parser avoids a full-file object model. The reader is shared across
//! workers behind a mutex; each worker keeps a `WindowCache` so repeated
//! fetches within one region hit memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::data::region::{ContigOrder, GenomicRegion};
use crate::error::{Result, TernError};

/// Random-access reference sequence.
pub trait ReferenceProvider: Send + Sync {
    /// Contig names in reference order.
    fn contig_order(&self) -> ContigOrder;

    /// Length of a contig, `None` for unknown contigs.
    fn contig_length(&self, contig: &str) -> Option<u64>;

    /// Fetch the sequence over `region`, uppercased.
    ///
    /// Fails when the contig is unknown or the region runs past the contig
    /// end; such a failure is fatal for the region being called.
    fn fetch(&self, region: &GenomicRegion) -> Result<Vec<u8>>;
}

/// One `.fai` index line.
#[derive(Clone, Debug)]
struct FaiEntry {
    name: Arc<str>,
    length: u64,
    offset: u64,
    line_bases: u64,
    line_width: u64,
}

/// Indexed on-disk FASTA reference.
pub struct FastaReference {
    entries: Vec<FaiEntry>,
    by_name: HashMap<Arc<str>, usize>,
    reader: Mutex<BufReader<File>>,
}

impl FastaReference {
    /// Open `path` and its `.fai` sidecar (`<path>.fai`).
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TernError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let index_path = PathBuf::from(format!("{}.fai", path.display()));
        if !index_path.exists() {
            return Err(TernError::input(format!(
                "reference index not found: {} (create it with `samtools faidx`)",
                index_path.display()
            )));
        }
        let entries = Self::parse_index(&index_path)?;
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        let reader = BufReader::new(File::open(path)?);
        Ok(Self {
            entries,
            by_name,
            reader: Mutex::new(reader),
        })
    }

    fn parse_index(path: &Path) -> Result<Vec<FaiEntry>> {
        let file = File::open(path)?;
        let mut entries = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 5 {
                return Err(TernError::parse(lineno + 1, "malformed .fai line"));
            }
            let parse = |s: &str| {
                s.parse::<u64>()
                    .map_err(|_| TernError::parse(lineno + 1, "malformed .fai field"))
            };
            entries.push(FaiEntry {
                name: fields[0].into(),
                length: parse(fields[1])?,
                offset: parse(fields[2])?,
                line_bases: parse(fields[3])?,
                line_width: parse(fields[4])?,
            });
        }
        Ok(entries)
    }
}

impl ReferenceProvider for FastaReference {
    fn contig_order(&self) -> ContigOrder {
        ContigOrder::new(self.entries.iter().map(|e| e.name.clone()).collect())
    }

    fn contig_length(&self, contig: &str) -> Option<u64> {
        self.by_name.get(contig).map(|&i| self.entries[i].length)
    }

    fn fetch(&self, region: &GenomicRegion) -> Result<Vec<u8>> {
        let entry = self
            .by_name
            .get(region.contig().as_ref())
            .map(|&i| &self.entries[i])
            .ok_or_else(|| {
                TernError::input(format!("contig {} not in reference", region.contig()))
            })?;
        if region.end() > entry.length {
            return Err(TernError::input(format!(
                "region {} runs past contig end ({})",
                region, entry.length
            )));
        }
        let line_bases = entry.line_bases.max(1);
        let start_offset =
            entry.offset + (region.begin() / line_bases) * entry.line_width + region.begin() % line_bases;
        let mut result = Vec::with_capacity(region.len() as usize);
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| TernError::internal("FastaReference::fetch", "poisoned reader lock"))?;
        reader.seek(SeekFrom::Start(start_offset))?;
        let mut buf = [0u8; 8192];
        while result.len() < region.len() as usize {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                return Err(TernError::input(format!(
                    "reference truncated while reading {}",
                    region
                )));
            }
            for &b in &buf[..n] {
                if b == b'\n' || b == b'\r' {
                    continue;
                }
                result.push(b.to_ascii_uppercase());
                if result.len() == region.len() as usize {
                    break;
                }
            }
        }
        Ok(result)
    }
}

/// In-memory reference; test scaffolding and small genomes.
pub struct InMemoryReference {
    contigs: Vec<(Arc<str>, Arc<[u8]>)>,
}

impl InMemoryReference {
    pub fn new(contigs: Vec<(&str, &[u8])>) -> Self {
        Self {
            contigs: contigs
                .into_iter()
                .map(|(name, seq)| {
                    let upper: Vec<u8> = seq.iter().map(u8::to_ascii_uppercase).collect();
                    (Arc::<str>::from(name), Arc::<[u8]>::from(upper))
                })
                .collect(),
        }
    }
}

impl ReferenceProvider for InMemoryReference {
    fn contig_order(&self) -> ContigOrder {
        ContigOrder::new(self.contigs.iter().map(|(n, _)| n.clone()).collect())
    }

    fn contig_length(&self, contig: &str) -> Option<u64> {
        self.contigs
            .iter()
            .find(|(n, _)| n.as_ref() == contig)
            .map(|(_, s)| s.len() as u64)
    }

    fn fetch(&self, region: &GenomicRegion) -> Result<Vec<u8>> {
        let (_, seq) = self
            .contigs
            .iter()
            .find(|(n, _)| n == region.contig())
            .ok_or_else(|| {
                TernError::input(format!("contig {} not in reference", region.contig()))
            })?;
        seq.get(region.begin() as usize..region.end() as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| TernError::input(format!("region {} runs past contig end", region)))
    }
}

/// Per-worker cache over a shared reference. Fetches are widened to
/// `window` bases and sub-slices served from the cached window until a
/// fetch misses.
pub struct WindowCache<'a> {
    inner: &'a dyn ReferenceProvider,
    window: u64,
    cached: Option<(GenomicRegion, Vec<u8>)>,
}

impl<'a> WindowCache<'a> {
    pub fn new(inner: &'a dyn ReferenceProvider, window: u64) -> Self {
        Self {
            inner,
            window,
            cached: None,
        }
    }

    pub fn fetch(&mut self, region: &GenomicRegion) -> Result<Vec<u8>> {
        if let Some((cached_region, seq)) = &self.cached {
            if cached_region.contains(region) {
                let begin = (region.begin() - cached_region.begin()) as usize;
                let end = begin + region.len() as usize;
                return Ok(seq[begin..end].to_vec());
            }
        }
        let contig_len = self
            .inner
            .contig_length(region.contig())
            .ok_or_else(|| TernError::input(format!("contig {} not in reference", region.contig())))?;
        let wide = GenomicRegion::new(
            region.contig().clone(),
            region.begin().saturating_sub(self.window),
            (region.end() + self.window).min(contig_len),
        );
        let seq = self.inner.fetch(&wide)?;
        let begin = (region.begin() - wide.begin()) as usize;
        let end = begin + region.len() as usize;
        let result = seq[begin..end].to_vec();
        self.cached = Some((wide, seq));
        Ok(result)
    }
}
