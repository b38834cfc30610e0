//! Calendar normalization for weekly and monthly aggregates.
//!
//! Weekly series are compared positionally (week 1..52) across years. ISO
//! week 53 only exists in some years, so its days are folded into week 1 of
//! the following year before averaging.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::records::Observation;

pub const FOLD_WEEK: u32 = 53;
pub const LAST_COMPARABLE_WEEK: u32 = 52;
pub const MIN_MONTH_COVERAGE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeekKeying {
    /// Year of the calendar date. Early-January days of ISO week 53 keep the
    /// new year's number and are folded one year further.
    #[default]
    CalendarYear,
    IsoYear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub year: i32,
    pub iso_week: u32,
    pub date: NaiveDate,
    pub total: u64,
}

/// Weeks of `year` strictly before `before_week` are never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressedPeriod {
    pub year: i32,
    pub before_week: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySuppression {
    pub min_days: usize,
    pub overrides: Vec<SuppressedPeriod>,
}

impl Default for WeeklySuppression {
    fn default() -> Self {
        Self {
            min_days: 5,
            // Lockdown reporting in early 2020 is unusable.
            overrides: vec![SuppressedPeriod {
                year: 2020,
                before_week: 4,
            }],
        }
    }
}

impl WeeklySuppression {
    fn suppresses(&self, year: i32, week: u32, days: usize) -> bool {
        days < self.min_days
            || self
                .overrides
                .iter()
                .any(|period| period.year == year && week < period.before_week)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyAverage {
    pub year: i32,
    pub week: u32,
    pub mean_daily_total: Option<f64>,
    pub days: usize,
}

pub fn daily_totals_by_week(observations: &[Observation], keying: WeekKeying) -> Vec<DailyTotal> {
    let mut totals: BTreeMap<(i32, u32, NaiveDate), u64> = BTreeMap::new();
    for obs in observations {
        let date = obs.date();
        let iso = date.iso_week();
        let year = match keying {
            WeekKeying::CalendarYear => date.year(),
            WeekKeying::IsoYear => iso.year(),
        };
        *totals.entry((year, iso.week(), date)).or_default() += obs.count;
    }

    totals
        .into_iter()
        .map(|((year, iso_week, date), total)| DailyTotal {
            year,
            iso_week,
            date,
            total,
        })
        .collect()
}

/// Moves week-53 days to week 1 of the next year and drops anything still
/// beyond week 52.
pub fn fold_week_53(days: Vec<DailyTotal>) -> Vec<DailyTotal> {
    let before = days.len();
    let folded: Vec<DailyTotal> = days
        .into_iter()
        .map(|day| {
            if day.iso_week == FOLD_WEEK {
                DailyTotal {
                    year: day.year + 1,
                    iso_week: 1,
                    ..day
                }
            } else {
                day
            }
        })
        .filter(|day| day.iso_week <= LAST_COMPARABLE_WEEK)
        .collect();

    debug!(
        component = "calendar",
        event = "calendar.week53.folded",
        input_days = before,
        output_days = folded.len()
    );

    folded
}

/// Mean daily total per (year, week), sorted. Expects folded input; weeks
/// beyond 52 are ignored.
pub fn weekly_averages(days: &[DailyTotal], rules: &WeeklySuppression) -> Vec<WeeklyAverage> {
    let mut groups: BTreeMap<(i32, u32), (u64, usize, BTreeSet<NaiveDate>)> = BTreeMap::new();
    for day in days.iter().filter(|d| d.iso_week <= LAST_COMPARABLE_WEEK) {
        let entry = groups.entry((day.year, day.iso_week)).or_default();
        entry.0 += day.total;
        entry.1 += 1;
        entry.2.insert(day.date);
    }

    groups
        .into_iter()
        .map(|((year, week), (sum, rows, dates))| {
            let days = dates.len();
            let mean = sum as f64 / rows as f64;
            WeeklyAverage {
                year,
                week,
                mean_daily_total: (!rules.suppresses(year, week, days)).then_some(mean),
                days,
            }
        })
        .collect()
}

pub fn folded_weekly_averages(
    observations: &[Observation],
    keying: WeekKeying,
    rules: &WeeklySuppression,
) -> Vec<WeeklyAverage> {
    let days = fold_week_53(daily_totals_by_week(observations, keying));
    weekly_averages(&days, rules)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAverage {
    pub year: i32,
    pub month: u32,
    pub direction: String,
    pub mean_daily_total: f64,
    pub days: usize,
    pub expected_days: u32,
    pub coverage: f64,
}

/// Mean daily total per (year, month, direction), keeping months with at
/// least [`MIN_MONTH_COVERAGE`] of their days observed.
pub fn monthly_averages(observations: &[Observation]) -> Vec<MonthlyAverage> {
    let mut daily: BTreeMap<(i32, u32, String, NaiveDate), u64> = BTreeMap::new();
    for obs in observations {
        *daily
            .entry((obs.year(), obs.month(), obs.direction.clone(), obs.date()))
            .or_default() += obs.count;
    }

    let mut groups: BTreeMap<(i32, u32, String), (u64, usize)> = BTreeMap::new();
    for ((year, month, direction, _), total) in daily {
        let entry = groups.entry((year, month, direction)).or_default();
        entry.0 += total;
        entry.1 += 1;
    }

    groups
        .into_iter()
        .filter_map(|((year, month, direction), (sum, days))| {
            let expected_days = days_in_month(year, month)?;
            let coverage = days as f64 / expected_days as f64;
            (coverage >= MIN_MONTH_COVERAGE).then(|| MonthlyAverage {
                year,
                month,
                direction,
                mean_daily_total: sum as f64 / days as f64,
                days,
                expected_days,
                coverage,
            })
        })
        .collect()
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((next - first).num_days() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn day(year: i32, iso_week: u32, d: NaiveDate, total: u64) -> DailyTotal {
        DailyTotal {
            year,
            iso_week,
            date: d,
            total,
        }
    }

    fn obs(y: i32, m: u32, d: u32, h: u32, count: u64, direction: &str) -> Observation {
        Observation {
            timestamp: date(y, m, d).and_hms_opt(h, 0, 0).unwrap(),
            count,
            vehicle_class: "Personenwagen".to_string(),
            direction: direction.to_string(),
            category: Some("Personenwagen".to_string()),
        }
    }

    #[test]
    fn week_53_days_merge_into_next_years_first_week() {
        let days = vec![
            day(2026, 52, date(2026, 12, 21), 900),
            day(2026, 53, date(2026, 12, 28), 500),
            day(2026, 53, date(2026, 12, 29), 500),
            day(2026, 53, date(2026, 12, 30), 500),
            day(2027, 1, date(2027, 1, 4), 1_000),
            day(2027, 1, date(2027, 1, 5), 1_000),
        ];

        let folded = fold_week_53(days);
        assert!(folded.iter().all(|d| d.iso_week != 53));
        assert_eq!(
            folded
                .iter()
                .filter(|d| d.year == 2027 && d.iso_week == 1)
                .count(),
            5
        );

        let weekly = weekly_averages(&folded, &WeeklySuppression::default());
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].year, 2026);
        assert_eq!(weekly[0].week, 52);
        assert_eq!(weekly[1].year, 2027);
        assert_eq!(weekly[1].week, 1);
        assert_eq!(weekly[1].days, 5);
        assert_eq!(weekly[1].mean_daily_total, Some(3_500.0 / 5.0));
    }

    #[test]
    fn weeks_beyond_53_are_dropped_after_folding() {
        let folded = fold_week_53(vec![
            day(2030, 54, date(2030, 12, 31), 1),
            day(2030, 10, date(2030, 3, 5), 2),
        ]);
        assert_eq!(folded, vec![day(2030, 10, date(2030, 3, 5), 2)]);
    }

    #[test]
    fn weeks_with_fewer_than_five_days_report_no_data() {
        let days: Vec<_> = (4..8)
            .map(|d| day(2023, 10, date(2023, 3, d + 2), 100))
            .collect();
        let weekly = weekly_averages(&days, &WeeklySuppression::default());
        assert_eq!(weekly[0].days, 4);
        assert_eq!(weekly[0].mean_daily_total, None);

        let relaxed = WeeklySuppression {
            min_days: 4,
            overrides: Vec::new(),
        };
        assert_eq!(weekly_averages(&days, &relaxed)[0].mean_daily_total, Some(100.0));
    }

    #[test]
    fn lockdown_override_hides_early_2020_weeks_only() {
        let mut days = Vec::new();
        for (year, week, start) in [
            (2020, 3, date(2020, 1, 13)),
            (2020, 4, date(2020, 1, 20)),
            (2021, 3, date(2021, 1, 18)),
        ] {
            for offset in 0..7 {
                days.push(day(year, week, start + chrono::Days::new(offset), 10));
            }
        }

        let weekly = weekly_averages(&days, &WeeklySuppression::default());
        assert_eq!(weekly.len(), 3);
        assert_eq!(weekly[0].mean_daily_total, None);
        assert_eq!(weekly[1].mean_daily_total, Some(10.0));
        assert_eq!(weekly[2].mean_daily_total, Some(10.0));
    }

    #[test]
    fn calendar_keying_sends_early_january_week_53_two_years_on() {
        let observations = vec![
            obs(2020, 12, 31, 8, 40, "A"),
            obs(2021, 1, 2, 8, 60, "A"),
            obs(2021, 1, 2, 9, 5, "B"),
        ];

        let calendar = daily_totals_by_week(&observations, WeekKeying::CalendarYear);
        assert_eq!(
            calendar,
            vec![
                day(2020, 53, date(2020, 12, 31), 40),
                day(2021, 53, date(2021, 1, 2), 65),
            ]
        );
        let folded = fold_week_53(calendar);
        assert_eq!(folded[0].year, 2021);
        assert_eq!(folded[1].year, 2022);

        let iso = fold_week_53(daily_totals_by_week(&observations, WeekKeying::IsoYear));
        assert!(iso.iter().all(|d| d.year == 2021 && d.iso_week == 1));
    }

    #[test]
    fn monthly_averages_drop_thinly_covered_months() {
        let mut observations = Vec::new();
        for d in 1..=28 {
            observations.push(obs(2024, 2, d, 7, 100, "A"));
            observations.push(obs(2024, 2, d, 8, 50, "A"));
        }
        for d in 1..=10 {
            observations.push(obs(2024, 3, d, 7, 100, "A"));
        }

        let monthly = monthly_averages(&observations);
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].month, 2);
        assert_eq!(monthly[0].expected_days, 29);
        assert_eq!(monthly[0].days, 28);
        assert_eq!(monthly[0].mean_daily_total, 150.0);
        assert!(monthly[0].coverage >= MIN_MONTH_COVERAGE);
    }

    #[test]
    fn days_in_month_handles_leap_years_and_december() {
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2023, 2), Some(28));
        assert_eq!(days_in_month(2023, 12), Some(31));
        assert_eq!(days_in_month(2023, 13), None);
    }
}
