//! Relative and absolute date expressions resolved against an injected "today".

use crate::error::{QueryError, Result};
use crate::model::{add_months, first_of_month, AnalysisMode, Granularity, TimeRange};
use chrono::{Datelike, Days, Duration, Months, NaiveDate};
use regex::{Captures, Regex};
use tracing::{debug, warn};

const MONTH_NAMES: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";
const NUMBER: &str = r"\d+|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve";

/// Trailing window used when a usage question names no time at all.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;
/// Forward window used when a forecast question names no time at all.
pub const DEFAULT_FORECAST_DAYS: i64 = 30;

lazy_static::lazy_static! {
    static ref SPAN: Regex = Regex::new(&format!(
        r"\b(?:from|between)\s+(?P<a>{date})\s+(?:to|and|until|through)\s+(?P<b>{date})",
        date = date_pattern()
    )).expect("span pattern");
    static ref ISO_DATE: Regex = Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("iso pattern");
    static ref MONTH_DAY: Regex = Regex::new(&format!(
        r"\b({m})\s+(\d{{1,2}})(?:st|nd|rd|th)?(?:,?\s+(\d{{4}}))?\b",
        m = MONTH_NAMES
    )).expect("month-day pattern");
    static ref ROLLING: Regex = Regex::new(&format!(
        r"\b(last|past|previous|trailing|next)\s+({n})\s+(day|week|month|year)s?\b",
        n = NUMBER
    )).expect("rolling pattern");
    static ref RELATIVE_QUARTER: Regex =
        Regex::new(r"\b(this|current|last|previous|past|next)\s+quarter\b").expect("quarter pattern");
    static ref QUARTER: Regex =
        Regex::new(r"\bq([1-4])(?:\s*(?:of\s+)?(\d{4}))?\b").expect("quarter pattern");
    static ref RELATIVE_MONTH: Regex =
        Regex::new(r"\b(this|current|last|previous|past|next)\s+month\b").expect("month pattern");
    static ref RELATIVE_YEAR: Regex =
        Regex::new(r"\b(?:(this|current|last|previous|past)\s+year|(ytd|year[\s-]to[\s-]date))\b")
            .expect("year pattern");
    static ref RELATIVE_WEEK: Regex =
        Regex::new(r"\b(this|last|past|previous)\s+week\b").expect("week pattern");
    static ref DAY_WORD: Regex = Regex::new(r"\b(yesterday|today)\b").expect("day pattern");
    static ref MONTH: Regex = Regex::new(&format!(
        r"\b({m})\b(?:\s+(?:of\s+)?(\d{{4}}))?",
        m = MONTH_NAMES
    )).expect("month pattern");
    static ref YEAR: Regex =
        Regex::new(r"\b(?:in|for|during|of)\s+(20\d{2})\b").expect("year pattern");

    static ref COMPARISON_CUE: Regex =
        Regex::new(r"\b(compare|compared|comparing|comparison|versus|vs)\b").expect("comparison pattern");
    static ref FORECAST_CUE: Regex = Regex::new(
        r"\b(forecast|forecasted|forecasting|predict|predicted|prediction|projected|projection|next\s+(month|quarter|year|\d+)|going to cost|will\b.*\b(cost|spend))\b"
    ).expect("forecast pattern");
    static ref DAILY_CUE: Regex =
        Regex::new(r"\b(daily|per day|each day|by day|day by day|day-by-day)\b").expect("daily pattern");
    static ref MONTHLY_CUE: Regex =
        Regex::new(r"\b(monthly|per month|each month|by month|month by month|month-over-month)\b")
            .expect("monthly pattern");
}

fn date_pattern() -> String {
    format!(
        r"\d{{4}}-\d{{2}}-\d{{2}}|(?:{m})\s+\d{{1,2}}(?:st|nd|rd|th)?(?:,?\s+\d{{4}})?",
        m = MONTH_NAMES
    )
}

/// The outcome of resolving a question's time expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTime {
    pub ranges: Vec<TimeRange>,
    pub comparison: bool,
    pub mode: AnalysisMode,
    /// `false` when the ranges are the no-expression default.
    pub explicit: bool,
}

impl ResolvedTime {
    pub fn primary(&self) -> Option<&TimeRange> {
        self.ranges.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Expr {
    Fixed { start: NaiveDate, end: NaiveDate },
    Month { month: u32, year: Option<i32> },
    Quarter { quarter: u32, year: Option<i32> },
}

impl Expr {
    fn explicit_year(&self) -> Option<i32> {
        match self {
            Expr::Month { year, .. } | Expr::Quarter { year, .. } => *year,
            Expr::Fixed { .. } => None,
        }
    }
}

#[derive(Debug)]
struct Found {
    start: usize,
    end: usize,
    expr: Expr,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DateRangeResolver;

impl DateRangeResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolves every time expression in `text`.
    ///
    /// Comparison questions always come back with exactly two chronologically
    /// ordered, month-aligned ranges, or fail with `IncompleteMonth`.
    pub fn resolve(&self, text: &str, today: NaiveDate) -> Result<ResolvedTime> {
        let lowered = text.to_lowercase();
        let mode = detect_mode(&lowered);
        let daily = DAILY_CUE.is_match(&lowered);
        let monthly = MONTHLY_CUE.is_match(&lowered);

        let found = scan(text, &lowered, today);
        let ranges = to_ranges(&found, today, mode);
        debug!("Resolved {} time expression(s) in '{}'", ranges.len(), text);

        let comparison = mode == AnalysisMode::Comparison || ranges.len() >= 2;
        if comparison {
            let pair = comparison_pair(&ranges, today, daily)?;
            return Ok(ResolvedTime {
                explicit: !ranges.is_empty(),
                ranges: pair,
                comparison: true,
                mode: AnalysisMode::Comparison,
            });
        }

        let granularity_for = |start: NaiveDate, end: NaiveDate| {
            if daily {
                Granularity::Daily
            } else if monthly || (end - start).num_days() > 31 {
                Granularity::Monthly
            } else {
                Granularity::Daily
            }
        };

        let resolved = match (ranges.first(), mode) {
            (Some(&(start, end)), _) => ResolvedTime {
                ranges: vec![TimeRange {
                    start,
                    end,
                    granularity: granularity_for(start, end),
                }],
                comparison: false,
                mode,
                explicit: true,
            },
            (None, AnalysisMode::Forecast) => ResolvedTime {
                ranges: vec![TimeRange {
                    start: today,
                    end: today + Duration::days(DEFAULT_FORECAST_DAYS),
                    granularity: if daily { Granularity::Daily } else { Granularity::Monthly },
                }],
                comparison: false,
                mode,
                explicit: false,
            },
            (None, _) => {
                let start = today - Duration::days(DEFAULT_LOOKBACK_DAYS);
                ResolvedTime {
                    ranges: vec![TimeRange {
                        start,
                        end: today,
                        granularity: if monthly { Granularity::Monthly } else { Granularity::Daily },
                    }],
                    comparison: false,
                    mode,
                    explicit: false,
                }
            }
        };
        Ok(resolved)
    }
}

/// Classifies the question as comparison, forecast or plain usage from its wording.
pub fn detect_mode(lowered: &str) -> AnalysisMode {
    if COMPARISON_CUE.is_match(lowered) {
        AnalysisMode::Comparison
    } else if FORECAST_CUE.is_match(lowered) {
        AnalysisMode::Forecast
    } else {
        AnalysisMode::Usage
    }
}

fn comparison_pair(
    ranges: &[(NaiveDate, NaiveDate)],
    today: NaiveDate,
    daily: bool,
) -> Result<Vec<TimeRange>> {
    let granularity = if daily { Granularity::Daily } else { Granularity::Monthly };
    let make = |start, end| TimeRange { start, end, granularity };

    let mut pair = match ranges {
        [] => {
            let current = first_of_month(today);
            let previous = add_months(current, -1);
            vec![make(add_months(current, -2), previous), make(previous, current)]
        }
        [(start, end)] => {
            let only = make(*start, *end);
            if !only.is_month_aligned() {
                return Err(QueryError::IncompleteMonth { range: only });
            }
            let months = months_between(only.start, only.end);
            vec![make(add_months(only.start, -months), only.start), only]
        }
        [first, second, rest @ ..] => {
            if !rest.is_empty() {
                warn!("Comparison names {} periods, keeping the first two", ranges.len());
            }
            vec![make(first.0, first.1), make(second.0, second.1)]
        }
    };

    if let Some(partial) = pair.iter().find(|r| !r.is_month_aligned()) {
        return Err(QueryError::IncompleteMonth { range: *partial });
    }
    pair.sort_by_key(|r| r.start);
    Ok(pair)
}

fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32
}

/// Finds non-overlapping expressions, most specific patterns first.
fn scan(original: &str, lowered: &str, today: NaiveDate) -> Vec<Found> {
    let mut found: Vec<Found> = Vec::new();

    claim(&mut found, lowered, &SPAN, |c| {
        let a = c.name("a")?.as_str();
        let b = c.name("b")?.as_str();
        let year_hint = explicit_year_in(a).or_else(|| explicit_year_in(b));
        let start = parse_date(a, year_hint, today)?;
        let last = parse_date(b, year_hint, today)?;
        (start <= last).then(|| Expr::Fixed {
            start,
            end: last + Duration::days(1),
        })
    });
    claim(&mut found, lowered, &ISO_DATE, |c| {
        let day = parse_date(c.get(0)?.as_str(), None, today)?;
        Some(Expr::Fixed {
            start: day,
            end: day + Duration::days(1),
        })
    });
    claim(&mut found, lowered, &MONTH_DAY, |c| {
        let day = parse_date(c.get(0)?.as_str(), None, today)?;
        Some(Expr::Fixed {
            start: day,
            end: day + Duration::days(1),
        })
    });
    claim(&mut found, lowered, &ROLLING, |c| {
        let n = number_value(c.get(2)?.as_str())?;
        if n == 0 {
            return None;
        }
        let unit = c.get(3)?.as_str();
        let forward = c.get(1)?.as_str() == "next";
        let shifted = rolling_bound(today, n, unit, forward)?;
        if forward {
            Some(Expr::Fixed { start: today, end: shifted })
        } else {
            Some(Expr::Fixed { start: shifted, end: today })
        }
    });
    claim(&mut found, lowered, &RELATIVE_QUARTER, |c| {
        let current = quarter_start(today);
        let (start, end) = match c.get(1)?.as_str() {
            "this" | "current" => (current, today),
            "next" => (add_months(current, 3), add_months(current, 6)),
            _ => (add_months(current, -3), current),
        };
        Some(Expr::Fixed { start, end })
    });
    claim(&mut found, lowered, &QUARTER, |c| {
        Some(Expr::Quarter {
            quarter: c.get(1)?.as_str().parse().ok()?,
            year: c.get(2).and_then(|y| y.as_str().parse().ok()),
        })
    });
    claim(&mut found, lowered, &RELATIVE_MONTH, |c| {
        let current = first_of_month(today);
        let (start, end) = match c.get(1)?.as_str() {
            "this" | "current" => (current, today),
            "next" => (today, add_months(current, 2)),
            _ => (add_months(current, -1), current),
        };
        Some(Expr::Fixed { start, end })
    });
    claim(&mut found, lowered, &RELATIVE_YEAR, |c| {
        let jan1 = NaiveDate::from_ymd_opt(today.year(), 1, 1)?;
        let (start, end) = match c.get(1).map(|m| m.as_str()) {
            Some("last") | Some("previous") => (NaiveDate::from_ymd_opt(today.year() - 1, 1, 1)?, jan1),
            Some("past") => (add_months(today, -12), today),
            _ => (jan1, today),
        };
        Some(Expr::Fixed { start, end })
    });
    claim(&mut found, lowered, &RELATIVE_WEEK, |c| {
        let start = match c.get(1)?.as_str() {
            "this" => today - Duration::days(today.weekday().num_days_from_monday() as i64),
            _ => today - Duration::days(7),
        };
        Some(Expr::Fixed { start, end: today })
    });
    claim(&mut found, lowered, &DAY_WORD, |c| {
        let start = match c.get(1)?.as_str() {
            "yesterday" => today - Duration::days(1),
            _ => today,
        };
        Some(Expr::Fixed {
            start,
            end: start + Duration::days(1),
        })
    });
    claim(&mut found, lowered, &MONTH, |c| {
        let name = c.get(1)?;
        // "may" is only a month when written as a proper noun.
        if name.as_str() == "may" && !original.get(name.range())?.starts_with('M') {
            return None;
        }
        Some(Expr::Month {
            month: month_number(name.as_str())?,
            year: c.get(2).and_then(|y| y.as_str().parse().ok()),
        })
    });
    claim(&mut found, lowered, &YEAR, |c| {
        let year: i32 = c.get(1)?.as_str().parse().ok()?;
        Some(Expr::Fixed {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
        })
    });

    found.sort_by_key(|f| f.start);
    found
}

fn claim<F>(found: &mut Vec<Found>, lowered: &str, re: &Regex, build: F)
where
    F: Fn(&Captures) -> Option<Expr>,
{
    for caps in re.captures_iter(lowered) {
        let Some(whole) = caps.get(0) else { continue };
        if found.iter().any(|f| whole.start() < f.end && f.start < whole.end()) {
            continue;
        }
        if let Some(expr) = build(&caps) {
            found.push(Found {
                start: whole.start(),
                end: whole.end(),
                expr,
            });
        }
    }
}

/// Turns expressions into concrete `[start, end)` pairs.
///
/// A month or quarter without a year borrows the year written elsewhere in
/// the question ("July vs August 2024"), otherwise it means the most recent
/// occurrence. Periods still in progress are cut at today unless forecasting.
fn to_ranges(found: &[Found], today: NaiveDate, mode: AnalysisMode) -> Vec<(NaiveDate, NaiveDate)> {
    let shared_year = found.iter().find_map(|f| f.expr.explicit_year());

    found
        .iter()
        .filter_map(|f| {
            let (start, end) = match f.expr {
                Expr::Fixed { start, end } => (start, end),
                Expr::Month { month, year } => {
                    let year = year.or(shared_year).unwrap_or_else(|| {
                        if month > today.month() {
                            today.year() - 1
                        } else {
                            today.year()
                        }
                    });
                    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
                    (start, add_months(start, 1))
                }
                Expr::Quarter { quarter, year } => {
                    let first_month = (quarter - 1) * 3 + 1;
                    let year = year.or(shared_year).unwrap_or_else(|| {
                        if first_month > today.month() {
                            today.year() - 1
                        } else {
                            today.year()
                        }
                    });
                    let start = NaiveDate::from_ymd_opt(year, first_month, 1)?;
                    (start, add_months(start, 3))
                }
            };
            if mode != AnalysisMode::Forecast && start < today && today < end {
                Some((start, today))
            } else {
                Some((start, end))
            }
        })
        .collect()
}

fn quarter_start(date: NaiveDate) -> NaiveDate {
    let month = (date.month() - 1) / 3 * 3 + 1;
    NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
}

fn explicit_year_in(phrase: &str) -> Option<i32> {
    if let Some(c) = ISO_DATE.captures(phrase) {
        return c.get(1)?.as_str().parse().ok();
    }
    MONTH_DAY.captures(phrase)?.get(3)?.as_str().parse().ok()
}

/// Parses an ISO date or "Month D[, YYYY]".
fn parse_date(phrase: &str, year_hint: Option<i32>, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(c) = ISO_DATE.captures(phrase) {
        return NaiveDate::from_ymd_opt(
            c.get(1)?.as_str().parse().ok()?,
            c.get(2)?.as_str().parse().ok()?,
            c.get(3)?.as_str().parse().ok()?,
        );
    }
    let c = MONTH_DAY.captures(phrase)?;
    let month = month_number(c.get(1)?.as_str())?;
    let day: u32 = c.get(2)?.as_str().parse().ok()?;
    let written_year = c.get(3).and_then(|y| y.as_str().parse().ok());
    match written_year.or(year_hint) {
        Some(year) => NaiveDate::from_ymd_opt(year, month, day),
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            if this_year > today {
                NaiveDate::from_ymd_opt(today.year() - 1, month, day)
            } else {
                Some(this_year)
            }
        }
    }
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// The far end of an N-unit window from `today`; `None` when it falls outside
/// the calendar chrono can represent.
fn rolling_bound(today: NaiveDate, n: i64, unit: &str, forward: bool) -> Option<NaiveDate> {
    let n = u64::try_from(n).ok()?;
    let days = match unit {
        "day" => Some(n),
        "week" => n.checked_mul(7),
        _ => None,
    };
    if let Some(days) = days {
        return if forward {
            today.checked_add_days(Days::new(days))
        } else {
            today.checked_sub_days(Days::new(days))
        };
    }
    let months = match unit {
        "month" => u32::try_from(n).ok()?,
        "year" => u32::try_from(n.checked_mul(12)?).ok()?,
        _ => return None,
    };
    if forward {
        today.checked_add_months(Months::new(months))
    } else {
        today.checked_sub_months(Months::new(months))
    }
}

fn number_value(word: &str) -> Option<i64> {
    let n = match word {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        digits => return digits.parse().ok(),
    };
    Some(n)
}
