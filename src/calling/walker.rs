//! # Active-Region Walker
//!
//! Chooses which candidates enter the next active region. Novel candidates
//! right of the frontier are admitted under the extension policy and the
//! haplotype budget; already-processed candidates immediately left of the
//! frontier may be retained as indicator context under the indicator
//! policy. Read templates (paired reads) can extend the sharing predicates;
//! templates spanning contigs are ignored.

use std::collections::HashMap;

use crate::data::read::{ReadMap, SampleName};
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;

/// How many already-processed candidates stay in the active region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndicatorPolicy {
    IncludeNone,
    IncludeIfSharedWithNovel,
    IncludeIfLinkableToNovel,
    IncludeAll,
}

/// How aggressively novel candidates are pulled in from the right.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionPolicy {
    IncludeIfWithinReadLength,
    IncludeIfAllSamplesShareFrontier,
    IncludeIfAnySampleSharesFrontier,
    NoLimit,
}

/// Whether read templates participate in the sharing predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadTemplatePolicy {
    None,
    Indicators,
    Extension,
    IndicatorsAndExtension,
}

/// Walker tuning.
#[derive(Clone, Debug)]
pub struct WalkerConfig {
    pub indicator_policy: IndicatorPolicy,
    pub extension_policy: ExtensionPolicy,
    pub read_template_policy: ReadTemplatePolicy,
    /// Hard bound on the active region span, when set.
    pub max_extension: Option<u64>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            indicator_policy: IndicatorPolicy::IncludeIfSharedWithNovel,
            extension_policy: ExtensionPolicy::IncludeIfAnySampleSharesFrontier,
            read_template_policy: ReadTemplatePolicy::IndicatorsAndExtension,
            max_extension: None,
        }
    }
}

/// The window the walker picked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkProposal {
    /// Indicator candidates: `[indicator_start, frontier)`.
    pub indicator_start: usize,
    /// Novel candidates: `[frontier, novel_end)`.
    pub novel_end: usize,
    /// Union of the included candidates' regions.
    pub active_region: GenomicRegion,
}

/// Spans of read templates per sample, keyed by template name. Built once
/// per caller region; cross-contig templates are dropped.
pub struct TemplateIndex {
    spans: HashMap<(SampleName, std::sync::Arc<str>), GenomicRegion>,
}

impl TemplateIndex {
    pub fn build(reads: &ReadMap) -> Self {
        let mut spans: HashMap<(SampleName, std::sync::Arc<str>), GenomicRegion> = HashMap::new();
        let mut cross_contig: Vec<(SampleName, std::sync::Arc<str>)> = Vec::new();
        for (sample, sample_reads) in reads {
            for read in sample_reads {
                let key = (sample.clone(), read.name().clone());
                let region = read.region();
                match spans.get_mut(&key) {
                    Some(existing) if existing.same_contig(&region) => {
                        *existing = existing.encompassing(&region);
                    }
                    Some(_) => cross_contig.push(key),
                    None => {
                        spans.insert(key, region);
                    }
                }
            }
        }
        for key in cross_contig {
            spans.remove(&key);
        }
        Self { spans }
    }

    fn spans_for_sample<'a>(
        &'a self,
        sample: &'a SampleName,
    ) -> impl Iterator<Item = &'a GenomicRegion> + 'a {
        self.spans
            .iter()
            .filter(move |((s, _), _)| s == sample)
            .map(|(_, region)| region)
    }
}

/// The walker itself; stateless, driven by the haplotype generator.
pub struct Walker {
    config: WalkerConfig,
}

impl Walker {
    pub fn new(config: WalkerConfig) -> Self {
        Self { config }
    }

    /// Pick the next window. `passed` bounds how far left indicators may
    /// reach; `max_novel` comes from the haplotype budget. Returns `None`
    /// when the frontier is exhausted.
    pub fn walk(
        &self,
        candidates: &[Variant],
        passed: usize,
        frontier: usize,
        reads: &ReadMap,
        templates: &TemplateIndex,
        max_novel: usize,
    ) -> Option<WalkProposal> {
        if frontier >= candidates.len() || max_novel == 0 {
            return None;
        }
        let first_novel = &candidates[frontier];
        let mut novel_end = frontier + 1;
        let use_extension_templates = matches!(
            self.config.read_template_policy,
            ReadTemplatePolicy::Extension | ReadTemplatePolicy::IndicatorsAndExtension
        );
        while novel_end < candidates.len() && novel_end - frontier < max_novel {
            let next = &candidates[novel_end];
            if !next.region().same_contig(first_novel.region()) {
                break;
            }
            if let Some(max_extension) = self.config.max_extension {
                if next.region().end() - first_novel.region().begin() > max_extension {
                    break;
                }
            }
            let frontier_region = candidates[novel_end - 1].region();
            let admit = match self.config.extension_policy {
                ExtensionPolicy::NoLimit => true,
                ExtensionPolicy::IncludeIfWithinReadLength => {
                    let max_read = crate::data::read::max_read_length(reads) as u64;
                    next.region().end().saturating_sub(first_novel.region().begin()) <= max_read
                }
                ExtensionPolicy::IncludeIfAllSamplesShareFrontier => all_samples_share(
                    frontier_region,
                    next.region(),
                    reads,
                    templates,
                    use_extension_templates,
                ),
                ExtensionPolicy::IncludeIfAnySampleSharesFrontier => any_sample_shares(
                    frontier_region,
                    next.region(),
                    reads,
                    templates,
                    use_extension_templates,
                ),
            };
            if !admit {
                break;
            }
            novel_end += 1;
        }

        let novel_region = candidates[frontier]
            .region()
            .encompassing(candidates[novel_end - 1].region());

        let use_indicator_templates = matches!(
            self.config.read_template_policy,
            ReadTemplatePolicy::Indicators | ReadTemplatePolicy::IndicatorsAndExtension
        );
        let mut indicator_start = frontier;
        match self.config.indicator_policy {
            IndicatorPolicy::IncludeNone => {}
            IndicatorPolicy::IncludeAll => indicator_start = passed,
            IndicatorPolicy::IncludeIfSharedWithNovel => {
                while indicator_start > passed {
                    let candidate = &candidates[indicator_start - 1];
                    if candidate.region().same_contig(&novel_region)
                        && any_sample_shares(
                            candidate.region(),
                            &novel_region,
                            reads,
                            templates,
                            use_indicator_templates,
                        )
                    {
                        indicator_start -= 1;
                    } else {
                        break;
                    }
                }
            }
            IndicatorPolicy::IncludeIfLinkableToNovel => {
                // chain left while each link shares reads with the next
                let mut link_region = novel_region.clone();
                while indicator_start > passed {
                    let candidate = &candidates[indicator_start - 1];
                    if candidate.region().same_contig(&link_region)
                        && any_sample_shares(
                            candidate.region(),
                            &link_region,
                            reads,
                            templates,
                            use_indicator_templates,
                        )
                    {
                        indicator_start -= 1;
                        link_region = candidate.region().clone();
                    } else {
                        break;
                    }
                }
            }
        }

        let active_region = candidates[indicator_start]
            .region()
            .encompassing(&novel_region);
        Some(WalkProposal {
            indicator_start,
            novel_end,
            active_region,
        })
    }
}

fn region_shared_in_sample(
    a: &GenomicRegion,
    b: &GenomicRegion,
    sample: &SampleName,
    reads: &ReadMap,
    templates: &TemplateIndex,
    use_templates: bool,
) -> bool {
    if let Some(sample_reads) = reads.get(sample) {
        if sample_reads
            .iter()
            .any(|r| r.overlaps(a) && r.overlaps(b))
        {
            return true;
        }
    }
    use_templates
        && templates
            .spans_for_sample(sample)
            .any(|span| span.overlaps(a) && span.overlaps(b))
}

fn any_sample_shares(
    a: &GenomicRegion,
    b: &GenomicRegion,
    reads: &ReadMap,
    templates: &TemplateIndex,
    use_templates: bool,
) -> bool {
    reads
        .keys()
        .any(|s| region_shared_in_sample(a, b, s, reads, templates, use_templates))
}

fn all_samples_share(
    a: &GenomicRegion,
    b: &GenomicRegion,
    reads: &ReadMap,
    templates: &TemplateIndex,
    use_templates: bool,
) -> bool {
    let mut covered_samples = 0;
    for (sample, sample_reads) in reads {
        let touches = sample_reads.iter().any(|r| r.overlaps(a) || r.overlaps(b));
        if !touches {
            continue;
        }
        covered_samples += 1;
        if !region_shared_in_sample(a, b, sample, reads, templates, use_templates) {
            return false;
        }
    }
    covered_samples > 0
}
