//! Hourly completeness: expected-slot index, gap detection and per-year
//! coverage statistics.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::records::Observation;

const DST_MONTH: u32 = 3;
const DST_HOUR: u32 = 2;
const HOURS_PER_DAY: f64 = 24.0;

fn one_hour() -> ChronoDuration {
    ChronoDuration::hours(1)
}

/// Distinct observed hour slots, ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedHours {
    slots: BTreeSet<NaiveDateTime>,
}

impl ObservedHours {
    pub fn from_observations(observations: &[Observation]) -> Self {
        observations.iter().map(|obs| obs.timestamp).collect()
    }

    pub fn first(&self) -> Option<NaiveDateTime> {
        self.slots.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDateTime> {
        self.slots.last().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        self.slots.contains(ts)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NaiveDateTime> {
        self.slots.iter()
    }

    /// Complete hourly sequence from the first to the last observed slot.
    pub fn expected_sequence(&self) -> Vec<NaiveDateTime> {
        match (self.first(), self.last()) {
            (Some(start), Some(end)) => hourly_sequence(start, end),
            _ => Vec::new(),
        }
    }

    fn by_year(&self) -> BTreeMap<i32, Vec<NaiveDateTime>> {
        let mut out: BTreeMap<i32, Vec<NaiveDateTime>> = BTreeMap::new();
        for ts in &self.slots {
            out.entry(ts.year()).or_default().push(*ts);
        }
        out
    }
}

impl FromIterator<NaiveDateTime> for ObservedHours {
    fn from_iter<I: IntoIterator<Item = NaiveDateTime>>(iter: I) -> Self {
        Self {
            slots: iter.into_iter().collect(),
        }
    }
}

/// Inclusive hourly range. Empty when `end < start`.
pub fn hourly_sequence(start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDateTime> {
    let mut out = Vec::with_capacity(hourly_slot_count(start, end) as usize);
    let mut cursor = start;
    while cursor <= end {
        out.push(cursor);
        cursor += one_hour();
    }
    out
}

/// Number of slots `hourly_sequence(start, end)` would produce.
pub fn hourly_slot_count(start: NaiveDateTime, end: NaiveDateTime) -> u64 {
    if end < start {
        return 0;
    }
    ((end - start).num_hours() + 1) as u64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_hours: f64,
    pub is_dst: bool,
}

impl Gap {
    fn closed(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        let duration_hours = (end - start).num_seconds() as f64 / 3_600.0 + 1.0;
        Self {
            start,
            end,
            duration_hours,
            is_dst: is_spring_forward_artifact(start, duration_hours),
        }
    }

    /// Real outage: longer than one hour and not a clock-change artifact.
    pub fn is_significant(&self) -> bool {
        self.duration_hours > 1.0 && !self.is_dst
    }

    pub fn duration_days(&self) -> f64 {
        self.duration_hours / HOURS_PER_DAY
    }
}

/// Single missing hour at 02:00 in March: the civil clock skipped it.
pub fn is_spring_forward_artifact(start: NaiveDateTime, duration_hours: f64) -> bool {
    start.month() == DST_MONTH && start.hour() == DST_HOUR && duration_hours <= 1.0
}

/// Merges every expected slot absent from `observed` into maximal runs.
pub fn detect_gaps(expected: &[NaiveDateTime], observed: &ObservedHours) -> Vec<Gap> {
    let mut missing: Vec<NaiveDateTime> = expected
        .iter()
        .copied()
        .filter(|ts| !observed.contains(ts))
        .collect();
    missing.sort_unstable();
    missing.dedup();

    let (mut gaps, open_run) = missing.into_iter().fold(
        (Vec::new(), None::<(NaiveDateTime, NaiveDateTime)>),
        |(mut gaps, run), ts| match run {
            Some((run_start, run_end)) if ts - run_end <= one_hour() => {
                (gaps, Some((run_start, ts)))
            }
            Some((run_start, run_end)) => {
                gaps.push(Gap::closed(run_start, run_end));
                (gaps, Some((ts, ts)))
            }
            None => (gaps, Some((ts, ts))),
        },
    );

    if let Some((run_start, run_end)) = open_run {
        gaps.push(Gap::closed(run_start, run_end));
    }

    gaps
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyCompleteness {
    pub year: i32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub expected: u64,
    pub actual: u64,
    pub missing: u64,
    pub completeness: f64,
    pub gap_hours: f64,
    pub gap_days: f64,
}

pub fn completeness_percent(actual: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    100.0 * actual as f64 / expected as f64
}

/// One record per calendar year, ascending.
///
/// `gap_hours` only counts significant gaps (see [`Gap::is_significant`])
/// starting in the year, while `missing` counts every absent slot. Single
/// missing hours therefore show up in `missing` but not in `gap_hours`.
pub fn yearly_completeness(observed: &ObservedHours, gaps: &[Gap]) -> Vec<YearlyCompleteness> {
    observed
        .by_year()
        .into_iter()
        .filter_map(|(year, slots)| {
            let start = *slots.first()?;
            let end = *slots.last()?;
            let expected = hourly_slot_count(start, end);
            let actual = slots.len() as u64;

            let gap_hours: f64 = gaps
                .iter()
                .filter(|gap| gap.start.year() == year && gap.is_significant())
                .fold(0.0, |acc, gap| acc + gap.duration_hours);

            Some(YearlyCompleteness {
                year,
                start,
                end,
                expected,
                actual,
                missing: expected.saturating_sub(actual),
                completeness: completeness_percent(actual, expected),
                gap_hours,
                gap_days: gap_hours / HOURS_PER_DAY,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysis {
    pub gaps: Vec<Gap>,
    pub yearly_stats: Vec<YearlyCompleteness>,
    pub total_missing: u64,
}

impl GapAnalysis {
    pub fn year(&self, year: i32) -> Option<&YearlyCompleteness> {
        self.yearly_stats.iter().find(|stats| stats.year == year)
    }

    pub fn significant_gaps(&self) -> impl Iterator<Item = &Gap> {
        self.gaps.iter().filter(|gap| gap.is_significant())
    }

    pub fn dst_gaps(&self) -> impl Iterator<Item = &Gap> {
        self.gaps.iter().filter(|gap| gap.is_dst)
    }
}

pub fn analyze_gaps(observations: &[Observation]) -> GapAnalysis {
    let observed = ObservedHours::from_observations(observations);
    if observed.is_empty() {
        warn!(
            component = "completeness",
            event = "completeness.analyze.empty",
            observations = observations.len()
        );
        return GapAnalysis::default();
    }

    let expected = observed.expected_sequence();
    let gaps = detect_gaps(&expected, &observed);
    let total_missing = gaps
        .iter()
        .map(|gap| hourly_slot_count(gap.start, gap.end))
        .sum();
    let yearly_stats = yearly_completeness(&observed, &gaps);

    for gap in gaps.iter().filter(|gap| gap.is_significant()) {
        debug!(
            component = "completeness",
            event = "completeness.gap.detected",
            start = %gap.start,
            end = %gap.end,
            duration_hours = gap.duration_hours
        );
    }

    info!(
        component = "completeness",
        event = "completeness.analyze.finish",
        observations = observations.len(),
        expected_slots = expected.len(),
        observed_slots = observed.len(),
        total_missing,
        gap_count = gaps.len(),
        dst_gap_count = gaps.iter().filter(|gap| gap.is_dst).count(),
        years = yearly_stats.len()
    );

    GapAnalysis {
        gaps,
        yearly_stats,
        total_missing,
    }
}
