//! Canonical service and purchase-type names, with the shorthand that maps to them.
//!
//! The built-in table can be replaced by a JSON file of the same shape:
//!
//! ```json
//! {
//!   "services": [{"canonical": "AWS Lambda", "aliases": ["Lambda"]}],
//!   "purchase_types": [{"canonical": "Spot Instances", "aliases": ["Spot"]}]
//! }
//! ```

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use strsim::jaro_winkler;
use tracing::{debug, info};

/// Minimum Jaro-Winkler similarity for a near-miss spelling to be rewritten.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.93;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntry {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CanonicalEntry {
    fn new(canonical: &str, aliases: &[&str]) -> Self {
        Self {
            canonical: canonical.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Which table a lookup hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Service,
    PurchaseType,
}

/// How a value was resolved to its canonical form.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    Exact(&'a str),
    Fuzzy { canonical: &'a str, score: f64 },
}

impl<'a> Resolution<'a> {
    pub fn canonical(&self) -> &'a str {
        match *self {
            Resolution::Exact(canonical) => canonical,
            Resolution::Fuzzy { canonical, .. } => canonical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub services: Vec<CanonicalEntry>,
    pub purchase_types: Vec<CanonicalEntry>,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    pub fn builtin() -> Self {
        Self {
            services: vec![
                CanonicalEntry::new(
                    "Amazon Elastic Compute Cloud - Compute",
                    &["EC2", "Amazon EC2", "Elastic Compute Cloud", "EC2 Compute"],
                ),
                CanonicalEntry::new("EC2 - Other", &["EC2 Other", "EBS"]),
                CanonicalEntry::new(
                    "Amazon Relational Database Service",
                    &["RDS", "Amazon RDS", "Relational Database"],
                ),
                CanonicalEntry::new(
                    "Amazon Simple Storage Service",
                    &["S3", "Amazon S3", "Simple Storage"],
                ),
                CanonicalEntry::new("AWS Lambda", &["Lambda"]),
                CanonicalEntry::new("AmazonCloudWatch", &["CloudWatch", "Amazon CloudWatch"]),
                CanonicalEntry::new("Amazon ElastiCache", &["ElastiCache"]),
                CanonicalEntry::new(
                    "Amazon Elastic Load Balancing",
                    &["ELB", "Load Balancer", "Load Balancing"],
                ),
                CanonicalEntry::new("Amazon Virtual Private Cloud", &["VPC"]),
            ],
            purchase_types: vec![
                CanonicalEntry::new(
                    "Standard Reserved Instances",
                    &["Reserved", "Reserved Instances", "RI"],
                ),
                CanonicalEntry::new("On Demand Instances", &["OnDemand", "On-Demand", "On Demand"]),
                CanonicalEntry::new("Spot Instances", &["Spot"]),
                CanonicalEntry::new("Savings Plans", &["SavingsPlans", "Savings Plan", "SP"]),
            ],
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    /// Loads a replacement table from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog: Catalog = serde_json::from_str(&content).map_err(|e| {
            QueryError::Config(format!("invalid catalog {}: {}", path.display(), e))
        })?;
        if catalog.services.is_empty() {
            return Err(QueryError::Config(format!(
                "catalog {} lists no services",
                path.display()
            )));
        }
        info!(
            "Loaded catalog from {} ({} services, {} purchase types)",
            path.display(),
            catalog.services.len(),
            catalog.purchase_types.len()
        );
        Ok(catalog)
    }

    pub fn entries(&self, kind: CatalogKind) -> &[CanonicalEntry] {
        match kind {
            CatalogKind::Service => &self.services,
            CatalogKind::PurchaseType => &self.purchase_types,
        }
    }

    /// Resolves a value to its canonical spelling.
    ///
    /// Exact (case-insensitive) canonical or alias hits always win. Otherwise
    /// the canonical name with the highest similarity above the threshold is
    /// used; equal scores resolve to the earlier table entry.
    pub fn resolve(&self, kind: CatalogKind, value: &str) -> Option<Resolution<'_>> {
        let entries = self.entries(kind);
        let wanted = normalize(value);
        if wanted.is_empty() {
            return None;
        }

        if let Some(entry) = entries
            .iter()
            .find(|e| e.names().any(|name| normalize(name) == wanted))
        {
            return Some(Resolution::Exact(entry.canonical.as_str()));
        }

        let mut best: Option<(&str, f64)> = None;
        for entry in entries {
            let score = jaro_winkler(&wanted, &normalize(&entry.canonical));
            if score >= self.similarity_threshold && best.map_or(true, |(_, top)| score > top) {
                best = Some((entry.canonical.as_str(), score));
            }
        }
        best.map(|(canonical, score)| {
            debug!("Fuzzy matched '{}' to '{}' ({:.3})", value, canonical, score);
            Resolution::Fuzzy { canonical, score }
        })
    }

    pub fn canonical_service(&self, value: &str) -> Option<&str> {
        self.resolve(CatalogKind::Service, value).map(|r| r.canonical())
    }

    pub fn canonical_purchase_type(&self, value: &str) -> Option<&str> {
        self.resolve(CatalogKind::PurchaseType, value).map(|r| r.canonical())
    }

    /// Every shorthand that must never reach the cost-data API.
    pub fn shorthands(&self, kind: CatalogKind) -> impl Iterator<Item = (&str, &str)> {
        self.entries(kind).iter().flat_map(|entry| {
            entry
                .aliases
                .iter()
                .filter(move |alias| **alias != entry.canonical)
                .map(move |alias| (alias.as_str(), entry.canonical.as_str()))
        })
    }
}

lazy_static::lazy_static! {
    static ref NON_WORD: regex::Regex = regex::Regex::new(r"[^a-z0-9]+").expect("non-word pattern");
}

/// Lowercases and collapses punctuation and whitespace to single spaces.
pub fn normalize(s: &str) -> String {
    NON_WORD
        .replace_all(&s.to_lowercase(), " ")
        .trim()
        .to_string()
}
