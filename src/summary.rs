//! Headline figures derived from observations and a gap analysis.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::completeness::{Gap, GapAnalysis};
use crate::records::Observation;

const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficKpis {
    pub total_vehicles: u64,
    pub mean_daily_total: f64,
    pub peak_hour: Option<u32>,
    pub days: usize,
}

pub fn traffic_kpis(observations: &[Observation]) -> TrafficKpis {
    let mut daily: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    let mut hourly = [0u64; 24];
    for obs in observations {
        *daily.entry(obs.date()).or_default() += obs.count;
        hourly[obs.hour() as usize] += obs.count;
    }

    let total_vehicles: u64 = daily.values().sum();
    let mean_daily_total = if daily.is_empty() {
        0.0
    } else {
        total_vehicles as f64 / daily.len() as f64
    };
    // First maximum wins on ties.
    let peak_hour = (!observations.is_empty()).then(|| {
        hourly
            .iter()
            .enumerate()
            .fold((0usize, 0u64), |best, (hour, total)| {
                if *total > best.1 {
                    (hour, *total)
                } else {
                    best
                }
            })
            .0 as u32
    });

    TrafficKpis {
        total_vehicles,
        mean_daily_total,
        peak_hour,
        days: daily.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapSummary {
    pub significant_gaps: Vec<Gap>,
    pub significant_hours: f64,
    pub significant_days: f64,
    pub dst_gap_count: usize,
    pub largest: Option<Gap>,
}

pub fn gap_summary(analysis: &GapAnalysis) -> GapSummary {
    let significant_gaps: Vec<Gap> = analysis.significant_gaps().cloned().collect();
    let significant_hours = significant_gaps
        .iter()
        .fold(0.0, |acc, gap| acc + gap.duration_hours);
    let largest = significant_gaps
        .iter()
        .fold(None::<&Gap>, |best, gap| match best {
            Some(current) if current.duration_hours >= gap.duration_hours => Some(current),
            _ => Some(gap),
        })
        .cloned();

    GapSummary {
        significant_hours,
        significant_days: significant_hours / 24.0,
        dst_gap_count: analysis.dst_gaps().count(),
        largest,
        significant_gaps,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearComparison {
    pub year: i32,
    pub mean_daily_total: f64,
    pub total_vehicles: u64,
    pub days_with_data: usize,
    pub gap_days: f64,
    pub completeness: f64,
    /// Present only when more than one day is missing.
    pub extrapolated_total: Option<f64>,
}

/// Per-year traffic of `observations` next to the completeness figures of
/// `analysis`. Years absent from the analysis report no gaps and full
/// completeness.
pub fn yearly_comparison(observations: &[Observation], analysis: &GapAnalysis) -> Vec<YearComparison> {
    let mut daily: BTreeMap<i32, BTreeMap<NaiveDate, u64>> = BTreeMap::new();
    for obs in observations {
        *daily
            .entry(obs.year())
            .or_default()
            .entry(obs.date())
            .or_default() += obs.count;
    }

    daily
        .into_iter()
        .map(|(year, days)| {
            let total_vehicles: u64 = days.values().sum();
            let days_with_data = days.len();
            let stats = analysis.year(year);
            let gap_days = stats.map(|s| s.gap_days).unwrap_or(0.0);
            let completeness = stats.map(|s| s.completeness).unwrap_or(100.0);
            let extrapolated_total = (gap_days > 1.0 && days_with_data > 0)
                .then(|| total_vehicles as f64 * DAYS_PER_YEAR / days_with_data as f64);

            YearComparison {
                year,
                mean_daily_total: total_vehicles as f64 / days_with_data as f64,
                total_vehicles,
                days_with_data,
                gap_days,
                completeness,
                extrapolated_total,
            }
        })
        .collect()
}

pub fn distinct_years(observations: &[Observation]) -> Vec<i32> {
    observations
        .iter()
        .map(Observation::year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Categories tracked in the recent-window panel.
pub const RECENT_CATEGORIES: [&str; 3] = ["Personenwagen", "Lieferwagen", "Lastwagen"];
const RECENT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRow {
    pub label: String,
    pub vehicles: u64,
    pub percent: f64,
}

fn shares(totals: BTreeMap<String, u64>) -> Vec<ShareRow> {
    let total: u64 = totals.values().sum();
    let mut rows: Vec<ShareRow> = totals
        .into_iter()
        .map(|(label, vehicles)| ShareRow {
            percent: if total == 0 {
                0.0
            } else {
                100.0 * vehicles as f64 / total as f64
            },
            label,
            vehicles,
        })
        .collect();
    rows.sort_by(|a, b| b.vehicles.cmp(&a.vehicles).then_with(|| a.label.cmp(&b.label)));
    rows
}

/// Share of each raw vehicle class, largest first.
pub fn class_shares(observations: &[Observation]) -> Vec<ShareRow> {
    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    for obs in observations {
        *totals.entry(obs.vehicle_class.clone()).or_default() += obs.count;
    }
    shares(totals)
}

/// Share of each mapped category, largest first. Rows without a category
/// are left out of both the parts and the total.
pub fn category_shares(observations: &[Observation]) -> Vec<ShareRow> {
    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    for obs in observations {
        if let Some(category) = &obs.category {
            *totals.entry(category.clone()).or_default() += obs.count;
        }
    }
    shares(totals)
}

/// Vehicles per direction, largest first.
pub fn direction_totals(observations: &[Observation]) -> Vec<ShareRow> {
    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    for obs in observations {
        *totals.entry(obs.direction.clone()).or_default() += obs.count;
    }
    shares(totals)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearCategoryShare {
    pub year: i32,
    pub category: String,
    pub vehicles: u64,
    pub percent: f64,
}

/// Category shares within each year, sorted by (year, category).
pub fn yearly_category_shares(observations: &[Observation]) -> Vec<YearCategoryShare> {
    let mut totals: BTreeMap<i32, BTreeMap<String, u64>> = BTreeMap::new();
    for obs in observations {
        if let Some(category) = &obs.category {
            *totals
                .entry(obs.year())
                .or_default()
                .entry(category.clone())
                .or_default() += obs.count;
        }
    }

    let mut out = Vec::new();
    for (year, by_category) in totals {
        let year_total: u64 = by_category.values().sum();
        for (category, vehicles) in by_category {
            out.push(YearCategoryShare {
                year,
                percent: if year_total == 0 {
                    0.0
                } else {
                    100.0 * vehicles as f64 / year_total as f64
                },
                category,
                vehicles,
            });
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayProfile {
    /// 0 = Monday.
    pub weekday: u32,
    pub mean_daily_total: f64,
    /// Mean vehicles per observed hour, indexed by hour of day. Hours
    /// without data read 0.
    pub hourly_means: Vec<f64>,
}

/// Hour × weekday traffic pattern. Always seven rows, Monday first.
pub fn hour_weekday_profile(observations: &[Observation]) -> Vec<WeekdayProfile> {
    let mut hourly: BTreeMap<NaiveDateTime, u64> = BTreeMap::new();
    let mut daily: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for obs in observations {
        *hourly.entry(obs.timestamp).or_default() += obs.count;
        *daily.entry(obs.date()).or_default() += obs.count;
    }

    let mut cells = [[(0u64, 0u64); 24]; 7];
    for (timestamp, total) in &hourly {
        let cell = &mut cells[timestamp.weekday().num_days_from_monday() as usize]
            [timestamp.hour() as usize];
        cell.0 += total;
        cell.1 += 1;
    }
    let mut days = [(0u64, 0u64); 7];
    for (date, total) in &daily {
        let day = &mut days[date.weekday().num_days_from_monday() as usize];
        day.0 += total;
        day.1 += 1;
    }

    (0..7)
        .map(|weekday| WeekdayProfile {
            weekday: weekday as u32,
            mean_daily_total: mean(days[weekday]),
            hourly_means: cells[weekday].iter().copied().map(mean).collect(),
        })
        .collect()
}

fn mean((sum, n): (u64, u64)) -> f64 {
    if n == 0 {
        0.0
    } else {
        sum as f64 / n as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentCategory {
    pub category: String,
    pub mean_hourly: f64,
    pub mean_daily: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentPoint {
    pub timestamp: NaiveDateTime,
    pub category: String,
    pub vehicles: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub categories: Vec<RecentCategory>,
    pub hourly: Vec<RecentPoint>,
}

/// Hourly series and means for [`RECENT_CATEGORIES`] over the seven days
/// before the latest observation (inclusive on both ends). `None` when the
/// window holds no tracked category.
pub fn last_seven_days(observations: &[Observation]) -> Option<RecentWindow> {
    let end = observations.iter().map(|obs| obs.timestamp).max()?;
    let start = end - Duration::days(RECENT_WINDOW_DAYS);

    let mut hourly: BTreeMap<(NaiveDateTime, &str), u64> = BTreeMap::new();
    let mut daily: BTreeMap<(NaiveDate, &str), u64> = BTreeMap::new();
    for obs in observations.iter().filter(|obs| obs.timestamp >= start) {
        let Some(category) = obs
            .category
            .as_deref()
            .filter(|category| RECENT_CATEGORIES.contains(category))
        else {
            continue;
        };
        *hourly.entry((obs.timestamp, category)).or_default() += obs.count;
        *daily.entry((obs.date(), category)).or_default() += obs.count;
    }
    if hourly.is_empty() {
        return None;
    }

    let categories = RECENT_CATEGORIES
        .iter()
        .filter_map(|&category| {
            let per_hour = fold_matching(hourly.iter().map(|((_, c), v)| (*c, *v)), category);
            let per_day = fold_matching(daily.iter().map(|((_, c), v)| (*c, *v)), category);
            (per_hour.1 > 0).then(|| RecentCategory {
                category: category.to_string(),
                mean_hourly: mean(per_hour),
                mean_daily: mean(per_day),
            })
        })
        .collect();

    Some(RecentWindow {
        start,
        end,
        categories,
        hourly: hourly
            .into_iter()
            .map(|((timestamp, category), vehicles)| RecentPoint {
                timestamp,
                category: category.to_string(),
                vehicles,
            })
            .collect(),
    })
}

fn fold_matching<'a>(entries: impl Iterator<Item = (&'a str, u64)>, category: &str) -> (u64, u64) {
    entries
        .filter(|(c, _)| *c == category)
        .fold((0, 0), |(sum, n), (_, v)| (sum + v, n + 1))
}
