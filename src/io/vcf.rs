//! # VCF Records and Writing
//!
//! Typed VCF 4.3 records produced by the record factory, plus the writer
//! that serialises them. Record bodies are formatted by hand; `noodles`
//! bgzf handles compressed outputs. A small reader recovers candidate
//! variants from a source VCF for the candidate generator.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use noodles::bgzf as bgzf_io;

use crate::data::read::SampleName;
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;
use crate::error::{Result, TernError};

/// INFO fields the core emits.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordInfo {
    /// Samples with data.
    pub ns: u32,
    /// Combined read depth.
    pub dp: u32,
    /// Strand bias, fraction of forward-strand reads.
    pub sb: f64,
    /// Median base quality.
    pub bq: u32,
    /// RMS mapping quality.
    pub mq: f64,
    /// Reads with mapping quality zero.
    pub mq0: u32,
    /// Model posterior, when a caller compared models.
    pub mp: Option<f64>,
    /// De-novo posterior, present on de-novo calls.
    pub dnp: Option<f64>,
    /// Marks a somatic call.
    pub somatic: bool,
}

impl RecordInfo {
    fn format(&self) -> String {
        let mut s = format!(
            "NS={};DP={};SB={:.3};BQ={};MQ={:.2};MQ0={}",
            self.ns, self.dp, self.sb, self.bq, self.mq, self.mq0
        );
        if let Some(mp) = self.mp {
            s.push_str(&format!(";MP={:.4}", mp));
        }
        if let Some(dnp) = self.dnp {
            s.push_str(&format!(";DNP={:.4}", dnp));
        }
        if self.somatic {
            s.push_str(";SOMATIC");
        }
        s
    }
}

/// Per-sample FORMAT values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleRecord {
    /// Allele indices into [ref, alt...]; `None` is `.`.
    pub genotype: Vec<Option<usize>>,
    /// Emit `|` separators.
    pub phased: bool,
    pub gq: Option<u32>,
    pub dp: u32,
    pub bq: u32,
    pub mq: u32,
    /// Phase set key (position, 1-based).
    pub ps: Option<u64>,
    pub pq: Option<u32>,
}

impl SampleRecord {
    fn format_gt(&self) -> String {
        let sep = if self.phased { '|' } else { '/' };
        let parts: Vec<String> = self
            .genotype
            .iter()
            .map(|g| match g {
                Some(i) => i.to_string(),
                None => ".".to_string(),
            })
            .collect();
        parts.join(&sep.to_string())
    }

    fn format(&self, phased_fields: bool) -> String {
        let mut s = format!(
            "{}:{}:{}:{}:{}",
            self.format_gt(),
            self.gq.map_or_else(|| ".".to_string(), |g| g.to_string()),
            self.dp,
            self.bq,
            self.mq
        );
        if phased_fields {
            s.push_str(&format!(
                ":{}:{}",
                self.ps.map_or_else(|| ".".to_string(), |p| p.to_string()),
                self.pq.map_or_else(|| ".".to_string(), |q| q.to_string())
            ));
        }
        s
    }
}

/// One output record.
#[derive(Clone, Debug, PartialEq)]
pub struct VcfRecord {
    pub contig: Arc<str>,
    /// Zero-based; written 1-based.
    pub position: u64,
    pub ref_allele: String,
    pub alt_alleles: Vec<String>,
    /// Phred quality of the best alt allele; `None` writes `.`.
    pub qual: Option<f64>,
    pub filter: String,
    pub info: RecordInfo,
    pub samples: Vec<SampleRecord>,
}

impl VcfRecord {
    /// True when any sample carries phase information.
    pub fn has_phase(&self) -> bool {
        self.samples.iter().any(|s| s.ps.is_some())
    }

    /// The region this record maps to.
    pub fn region(&self) -> GenomicRegion {
        GenomicRegion::new(
            self.contig.clone(),
            self.position,
            self.position + self.ref_allele.len() as u64,
        )
    }

    fn format_line(&self, sites_only: bool) -> String {
        let alt = if self.alt_alleles.is_empty() {
            ".".to_string()
        } else {
            self.alt_alleles.join(",")
        };
        let qual = self
            .qual
            .map_or_else(|| ".".to_string(), |q| format!("{:.2}", q));
        let mut line = format!(
            "{}\t{}\t.\t{}\t{}\t{}\t{}\t{}",
            self.contig,
            self.position + 1,
            self.ref_allele,
            alt,
            qual,
            self.filter,
            self.info.format()
        );
        if !sites_only && !self.samples.is_empty() {
            let phased_fields = self.has_phase();
            if phased_fields {
                line.push_str("\tGT:GQ:DP:BQ:MQ:PS:PQ");
            } else {
                line.push_str("\tGT:GQ:DP:BQ:MQ");
            }
            for sample in &self.samples {
                line.push('\t');
                line.push_str(&sample.format(phased_fields));
            }
        }
        line
    }
}

/// Writes a VCF 4.3 stream with the header the core's records require.
pub struct VcfWriter {
    out: Box<dyn Write + Send>,
    samples: Vec<SampleName>,
    sites_only: bool,
    header_written: bool,
}

impl VcfWriter {
    /// Open `path` for writing; `.gz` suffixes get bgzf compression.
    pub fn to_path(path: &Path, samples: Vec<SampleName>, sites_only: bool) -> Result<Self> {
        let file = File::create(path)?;
        let out: Box<dyn Write + Send> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(BufWriter::new(bgzf_io::Writer::new(file)))
        } else {
            Box::new(BufWriter::new(file))
        };
        Ok(Self {
            out,
            samples,
            sites_only,
            header_written: false,
        })
    }

    /// Write into any sink; tests render to memory.
    pub fn to_writer(out: Box<dyn Write + Send>, samples: Vec<SampleName>, sites_only: bool) -> Self {
        Self {
            out,
            samples,
            sites_only,
            header_written: false,
        }
    }

    /// Write the header. `contigs` is (name, length) in reference order.
    pub fn write_header(&mut self, contigs: &[(Arc<str>, u64)]) -> Result<()> {
        let mut h = String::new();
        h.push_str("##fileformat=VCFv4.3\n");
        h.push_str("##source=tern\n");
        for (name, length) in contigs {
            h.push_str(&format!("##contig=<ID={},length={}>\n", name, length));
        }
        h.push_str("##INFO=<ID=NS,Number=1,Type=Integer,Description=\"Number of samples with data\">\n");
        h.push_str("##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Combined read depth\">\n");
        h.push_str("##INFO=<ID=SB,Number=1,Type=Float,Description=\"Strand bias (fraction of forward strand reads)\">\n");
        h.push_str("##INFO=<ID=BQ,Number=1,Type=Integer,Description=\"Median base quality\">\n");
        h.push_str("##INFO=<ID=MQ,Number=1,Type=Float,Description=\"RMS mapping quality\">\n");
        h.push_str("##INFO=<ID=MQ0,Number=1,Type=Integer,Description=\"Reads with mapping quality zero\">\n");
        h.push_str("##INFO=<ID=MP,Number=1,Type=Float,Description=\"Model posterior\">\n");
        h.push_str("##INFO=<ID=DNP,Number=1,Type=Float,Description=\"De novo posterior\">\n");
        h.push_str("##INFO=<ID=SOMATIC,Number=0,Type=Flag,Description=\"Somatic mutation\">\n");
        if !self.sites_only {
            h.push_str("##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n");
            h.push_str("##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Genotype quality\">\n");
            h.push_str("##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Read depth\">\n");
            h.push_str("##FORMAT=<ID=BQ,Number=1,Type=Integer,Description=\"Median base quality\">\n");
            h.push_str("##FORMAT=<ID=MQ,Number=1,Type=Integer,Description=\"RMS mapping quality\">\n");
            h.push_str("##FORMAT=<ID=PS,Number=1,Type=Integer,Description=\"Phase set\">\n");
            h.push_str("##FORMAT=<ID=PQ,Number=1,Type=Integer,Description=\"Phasing quality\">\n");
        }
        h.push_str("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO");
        if !self.sites_only && !self.samples.is_empty() {
            h.push_str("\tFORMAT");
            for s in &self.samples {
                h.push('\t');
                h.push_str(s);
            }
        }
        h.push('\n');
        self.out.write_all(h.as_bytes())?;
        self.header_written = true;
        Ok(())
    }

    pub fn write_record(&mut self, record: &VcfRecord) -> Result<()> {
        debug_assert!(self.header_written, "record written before header");
        let line = record.format_line(self.sites_only);
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    pub fn write_records(&mut self, records: &[VcfRecord]) -> Result<()> {
        for r in records {
            self.write_record(r)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Read candidate variants from a VCF path. Only CHROM/POS/REF/ALT are
/// consumed; multi-allelic records decompose into one variant per alt.
pub fn read_candidate_variants(path: &Path) -> Result<Vec<Variant>> {
    if !path.exists() {
        return Err(TernError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(BufReader::new(bgzf_io::Reader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    let mut variants = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 5 {
            return Err(TernError::parse(
                lineno + 1,
                "VCF record with fewer than 5 fields",
            ));
        }
        let contig: Arc<str> = fields[0].into();
        let pos: u64 = fields[1]
            .parse::<u64>()
            .map_err(|_| TernError::parse(lineno + 1, "malformed POS"))?
            .checked_sub(1)
            .ok_or_else(|| TernError::parse(lineno + 1, "POS must be positive"))?;
        let ref_seq = fields[3].as_bytes().to_vec();
        for alt in fields[4].split(',') {
            if alt == "." || alt == "*" || alt.starts_with('<') {
                continue;
            }
            let region = GenomicRegion::new(contig.clone(), pos, pos + ref_seq.len() as u64);
            if alt.as_bytes() != ref_seq.as_slice() {
                variants.push(Variant::new(region, ref_seq.clone(), alt.as_bytes().to_vec()));
            }
        }
    }
    Ok(variants)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_record() -> VcfRecord {
        VcfRecord {
            contig: "chr1".into(),
            position: 1050,
            ref_allele: "A".to_string(),
            alt_alleles: vec!["C".to_string()],
            qual: Some(43.21),
            filter: "PASS".to_string(),
            info: RecordInfo {
                ns: 1,
                dp: 20,
                sb: 0.5,
                bq: 35,
                mq: 60.0,
                mq0: 0,
                mp: None,
                dnp: None,
                somatic: false,
            },
            samples: vec![SampleRecord {
                genotype: vec![Some(0), Some(1)],
                phased: false,
                gq: Some(40),
                dp: 20,
                bq: 35,
                mq: 60,
                ps: None,
                pq: None,
            }],
        }
    }

    #[test]
    fn test_record_line() {
        let line = basic_record().format_line(false);
        assert_eq!(
            line,
            "chr1\t1051\t.\tA\tC\t43.21\tPASS\tNS=1;DP=20;SB=0.500;BQ=35;MQ=60.00;MQ0=0\tGT:GQ:DP:BQ:MQ\t0/1:40:20:35:60"
        );
    }

    #[test]
    fn test_phased_record_line() {
        let mut record = basic_record();
        record.samples[0].phased = true;
        record.samples[0].ps = Some(1051);
        record.samples[0].pq = Some(50);
        let line = record.format_line(false);
        assert!(line.contains("GT:GQ:DP:BQ:MQ:PS:PQ"));
        assert!(line.contains("0|1:40:20:35:60:1051:50"));
    }

    #[test]
    fn test_sites_only_drops_format() {
        let line = basic_record().format_line(true);
        assert!(!line.contains("GT"));
        assert_eq!(line.matches('\t').count(), 7);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_output_is_deterministic() {
        let render = |records: &[VcfRecord]| {
            let buf = SharedBuf::default();
            let mut w = VcfWriter::to_writer(Box::new(buf.clone()), vec!["s1".into()], false);
            w.write_header(&[("chr1".into(), 2000)]).unwrap();
            w.write_records(records).unwrap();
            w.finish().unwrap();
            let bytes = buf.0.lock().unwrap().clone();
            String::from_utf8(bytes).unwrap()
        };
        let records = vec![basic_record()];
        assert_eq!(render(&records), render(&records));
    }
}
