use crate::model::{AnalysisMode, ChartType};
use lazy_static::lazy_static;
use regex::Regex;

/// Lexical cues checked in order; the first hit wins.
const CUE_PATTERNS: &[(&str, ChartType)] = &[
    (r"spark\s?lines?", ChartType::Sparkline),
    (r"timelines?", ChartType::Timeline),
    (r"trend\s+lines?", ChartType::Timeline),
    (r"time\s+series", ChartType::Timeline),
    (r"bar\s+(?:charts?|graphs?)", ChartType::Bar),
    (r"pie\s+charts?", ChartType::PieAndTable),
    (r"tables?", ChartType::PieAndTable),
    (r"breakdowns?", ChartType::PieAndTable),
];

lazy_static! {
    static ref CUES: Vec<(Regex, ChartType)> = CUE_PATTERNS
        .iter()
        .map(|(pattern, chart)| {
            let re = Regex::new(&format!(r"(?i)\b{}\b", pattern)).expect("chart cue pattern");
            (re, *chart)
        })
        .collect();
    static ref DETAILED_CARD: Regex =
        Regex::new(r"(?i)\bdetailed\s+cards?\b").expect("detailed card pattern");
}

/// Picks a chart type from wording. Never fails.
#[derive(Debug, Clone, Copy)]
pub struct ChartTypeSelector {
    default: ChartType,
}

impl Default for ChartTypeSelector {
    fn default() -> Self {
        Self::new(ChartType::default())
    }
}

impl ChartTypeSelector {
    pub fn new(default: ChartType) -> Self {
        Self { default }
    }

    /// The chart explicitly asked for, if any.
    pub fn explicit_cue(&self, text: &str) -> Option<ChartType> {
        CUES.iter()
            .find(|(cue, _)| cue.is_match(text))
            .map(|(_, chart)| *chart)
    }

    /// Explicit wording first, then the forecast sparkline rule, then the
    /// provider's hint, then the configured default.
    pub fn select(&self, text: &str, mode: AnalysisMode, hint: Option<ChartType>) -> ChartType {
        if let Some(chart) = self.explicit_cue(text) {
            return chart;
        }
        if mode == AnalysisMode::Forecast {
            return if DETAILED_CARD.is_match(text) {
                self.default
            } else {
                ChartType::Sparkline
            };
        }
        hint.unwrap_or(self.default)
    }
}
