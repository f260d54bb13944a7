//! Terminology correction applied to every provider's output.

use crate::catalog::{Catalog, CatalogKind};
use crate::model::{Dimension, Filter, FilterOperator, ParameterCandidate, ParsedParameters};
use itertools::Itertools;
use std::sync::Arc;
use tracing::{info, warn};

/// Corrected parameters plus what had to change to get there.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub parameters: ParsedParameters,
    pub corrected: bool,
    pub notes: Vec<String>,
}

/// Rewrites shorthand into the canonical names the cost-data API expects.
///
/// Has no failure outcome: unknown dimensions are dropped and unknown values
/// pass through untouched.
#[derive(Debug, Clone)]
pub struct ParameterValidator {
    catalog: Arc<Catalog>,
}

impl ParameterValidator {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn correct(&self, candidate: ParameterCandidate) -> Correction {
        let mut notes = Vec::new();

        let metric = candidate.metric.metric();
        if !candidate.metric.is_canonical() {
            notes.push(format!("metric '{}' -> {}", candidate.metric.as_str(), metric));
        }

        let mut filters: Vec<Filter> = Vec::new();
        for filter in candidate.filters {
            let Some(dimension) = filter.dimension.dimension() else {
                warn!("Dropping filter on unknown dimension '{}'", filter.dimension.as_str());
                notes.push(format!("dropped filter on '{}'", filter.dimension.as_str()));
                continue;
            };
            if !filter.dimension.is_canonical() {
                notes.push(format!("dimension '{}' -> {}", filter.dimension.as_str(), dimension));
            }
            let values = filter
                .values
                .iter()
                .map(|value| self.canonical_value(&dimension, value, &mut notes))
                .filter(|value| !value.is_empty())
                .unique()
                .collect::<Vec<_>>();
            if values.is_empty() && filter.operator != FilterOperator::Absent {
                warn!("Dropping {} filter with no usable values", dimension);
                notes.push(format!("dropped empty filter on {}", dimension));
                continue;
            }
            let corrected = Filter {
                dimension,
                operator: filter.operator,
                values,
            };
            if !filters.contains(&corrected) {
                filters.push(corrected);
            }
        }

        let mut group_by: Vec<Dimension> = candidate
            .group_by
            .iter()
            .filter_map(|term| {
                let dimension = term.dimension();
                match &dimension {
                    None => {
                        warn!("Dropping group-by on unknown dimension '{}'", term.as_str());
                        notes.push(format!("dropped group-by '{}'", term.as_str()));
                    }
                    Some(d) if !term.is_canonical() => {
                        notes.push(format!("group-by '{}' -> {}", term.as_str(), d));
                    }
                    Some(_) => {}
                }
                dimension
            })
            .unique()
            .collect();

        if let Some(tag) = filters.iter().map(|f| &f.dimension).find(|d| d.is_tag()).cloned() {
            if !group_by.contains(&tag) {
                group_by.retain(|d| d != &Dimension::Service);
                group_by.push(tag.clone());
                notes.push(format!("grouping by {} for the tag filter", tag));
            }
        }

        let corrected = !notes.is_empty();
        if corrected {
            info!("Corrected provider parameters: {}", notes.join("; "));
        }

        Correction {
            parameters: ParsedParameters {
                mode: candidate.mode,
                time_ranges: candidate.time_ranges,
                metric,
                filters,
                group_by,
                comparison: candidate.comparison,
                chart_type: candidate.chart_hint.unwrap_or_default(),
            },
            corrected,
            notes,
        }
    }

    fn canonical_value(&self, dimension: &Dimension, value: &str, notes: &mut Vec<String>) -> String {
        let trimmed = value.trim();
        let kind = match dimension {
            Dimension::Service => CatalogKind::Service,
            Dimension::PurchaseType => CatalogKind::PurchaseType,
            Dimension::Region => {
                let region = trimmed.to_lowercase();
                if region != trimmed {
                    notes.push(format!("region '{}' -> {}", trimmed, region));
                }
                return region;
            }
            _ => return trimmed.to_string(),
        };
        match self.catalog.resolve(kind, trimmed) {
            Some(resolution) if resolution.canonical() != trimmed => {
                let canonical = resolution.canonical();
                notes.push(format!("'{}' -> '{}'", trimmed, canonical));
                canonical.to_string()
            }
            _ => trimmed.to_string(),
        }
    }
}
