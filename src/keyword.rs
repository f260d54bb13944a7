//! Deterministic keyword extractor, the last link of the provider chain.
//!
//! Never fails: whatever it cannot find falls back to the resolved time hints,
//! the configured default metric and a SERVICE grouping.

use crate::catalog::{Catalog, CatalogKind};
use crate::model::{Dimension, DimensionTerm, Filter, Metric, MetricTerm, ParameterCandidate};
use crate::provider::{ParameterProvider, ProviderRequest, ProviderResult};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

lazy_static! {
    static ref REGION: Regex =
        Regex::new(r"\b[a-z]{2}(?:-gov)?-[a-z]+-\d\b").expect("region pattern");
    static ref TAG_FILTER: Regex =
        Regex::new(r"(?i)\b(?:tag|tagged)\s+([A-Za-z0-9_:./@+-]+)\s*=\s*([A-Za-z0-9_:./@+-]+)")
            .expect("tag filter pattern");
    static ref GROUP_BY: Regex = Regex::new(
        r"\b(?:by|per|for each|broken down by|split by)\s+(linked account|account|region|usage type|instance type|purchase type|service)s?\b"
    )
    .expect("group-by pattern");
    static ref GROUP_BY_TAG: Regex =
        Regex::new(r"\b(?:by|per)\s+(?:the\s+)?([a-z0-9_:./@+-]+)\s+tags?\b").expect("tag group-by pattern");
}

/// Metric wordings, most specific first.
const METRIC_CUES: &[(&str, Metric)] = &[
    ("net amortized", Metric::NetAmortizedCost),
    ("net unblended", Metric::NetUnblendedCost),
    ("amortized", Metric::AmortizedCost),
    ("unblended", Metric::UnblendedCost),
    ("blended", Metric::BlendedCost),
    ("usage quantity", Metric::UsageQuantity),
];

struct NameMatcher {
    kind: CatalogKind,
    name: String,
    pattern: Regex,
}

/// Matches catalog names and common phrasings without any network call.
pub struct KeywordProvider {
    matchers: Vec<NameMatcher>,
    default_metric: Metric,
}

impl KeywordProvider {
    pub fn new(catalog: Arc<Catalog>, default_metric: Metric) -> Self {
        let mut matchers = Vec::new();
        for kind in [CatalogKind::Service, CatalogKind::PurchaseType] {
            for entry in catalog.entries(kind) {
                let names = std::iter::once(&entry.canonical).chain(entry.aliases.iter());
                for name in names {
                    match name_pattern(name) {
                        Some(pattern) => matchers.push(NameMatcher {
                            kind,
                            name: name.clone(),
                            pattern,
                        }),
                        None => warn!("Skipping catalog name '{}' for keyword matching", name),
                    }
                }
            }
        }
        matchers.sort_by(|a, b| b.name.len().cmp(&a.name.len()));

        Self {
            matchers,
            default_metric,
        }
    }

    /// Catalog names found in the text, longest first, never overlapping.
    fn find_names(&self, text: &str) -> Vec<(CatalogKind, String)> {
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut found: Vec<(usize, CatalogKind, String)> = Vec::new();

        for matcher in &self.matchers {
            for m in matcher.pattern.find_iter(text) {
                if claimed.iter().any(|&(s, e)| m.start() < e && s < m.end()) {
                    continue;
                }
                claimed.push((m.start(), m.end()));
                found.push((m.start(), matcher.kind, matcher.name.clone()));
            }
        }
        found.sort_by_key(|(start, _, _)| *start);
        found.into_iter().map(|(_, kind, name)| (kind, name)).collect()
    }

    fn metric(&self, lowered: &str) -> Metric {
        METRIC_CUES
            .iter()
            .find(|(cue, _)| lowered.contains(cue))
            .map(|(_, metric)| *metric)
            .unwrap_or(self.default_metric)
    }

    pub fn extract(&self, request: &ProviderRequest<'_>) -> ParameterCandidate {
        let text = request.question;
        let lowered = text.to_lowercase();

        let mut services = Vec::new();
        let mut purchase_types = Vec::new();
        for (kind, name) in self.find_names(text) {
            let bucket = match kind {
                CatalogKind::Service => &mut services,
                CatalogKind::PurchaseType => &mut purchase_types,
            };
            if !bucket.contains(&name) {
                bucket.push(name);
            }
        }

        let mut regions: Vec<String> = Vec::new();
        for m in REGION.find_iter(&lowered) {
            let region = m.as_str().to_string();
            if !regions.contains(&region) {
                regions.push(region);
            }
        }

        let mut filters = Vec::new();
        if !services.is_empty() {
            filters.push(Filter::equals(DimensionTerm::from(Dimension::Service), services));
        }
        if !purchase_types.is_empty() {
            filters.push(Filter::equals(
                DimensionTerm::from(Dimension::PurchaseType),
                purchase_types,
            ));
        }
        if !regions.is_empty() {
            filters.push(Filter::equals(DimensionTerm::from(Dimension::Region), regions));
        }
        for caps in TAG_FILTER.captures_iter(text) {
            let tag = Dimension::Tag(caps[1].to_string());
            filters.push(Filter::equals(DimensionTerm::from(tag), vec![caps[2].to_string()]));
        }

        let mut group_by: Vec<DimensionTerm> = Vec::new();
        for caps in GROUP_BY.captures_iter(&lowered) {
            if let Some(term) = DimensionTerm::parse(&caps[1]) {
                if !group_by.contains(&term) {
                    group_by.push(term);
                }
            }
        }
        for caps in GROUP_BY_TAG.captures_iter(&lowered) {
            let term = DimensionTerm::from(Dimension::Tag(caps[1].to_string()));
            if !group_by.contains(&term) {
                group_by.push(term);
            }
        }
        if group_by.is_empty() {
            group_by.push(DimensionTerm::from(Dimension::Service));
        }

        ParameterCandidate {
            mode: request.hints.mode,
            time_ranges: request.hints.ranges.clone(),
            metric: MetricTerm::from(self.metric(&lowered)),
            filters,
            group_by,
            comparison: request.hints.comparison,
            chart_hint: None,
        }
    }
}

/// Whole-word, case-insensitive pattern for a catalog name. Very short
/// alphabetic aliases ("SP", "RI") only match in their exact case.
fn name_pattern(name: &str) -> Option<Regex> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }
    let exact_case = trimmed.len() <= 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic());
    let body = regex::escape(trimmed).replace(r"\-", r"[\s-]?").replace(' ', r"[\s-]+");
    let flags = if exact_case { "" } else { "(?i)" };
    Regex::new(&format!(r"{}\b{}\b", flags, body)).ok()
}

#[async_trait]
impl ParameterProvider for KeywordProvider {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn attempt(&self, request: &ProviderRequest<'_>) -> ProviderResult {
        let candidate = self.extract(request);
        let raw = serde_json::to_string(&candidate).ok();
        debug!("Keyword extraction: {}", raw.as_deref().unwrap_or_default());
        ProviderResult::succeeded(self.name(), raw, candidate)
    }
}
