use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use ogd_traffic::{
    analyze_gaps, detect_gaps, fold_week_53, hourly_sequence, weekly_averages, yearly_completeness,
    DailyTotal, Observation, ObservedHours, WeeklySuppression,
};

fn civil(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .expect("valid civil timestamp expected")
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date expected")
}

fn observation(timestamp: NaiveDateTime, direction: &str) -> Observation {
    Observation {
        timestamp,
        count: 42,
        vehicle_class: "Personenwagen".to_string(),
        direction: direction.to_string(),
        category: Some("Personenwagen".to_string()),
    }
}

/// Two directions per hour so duplicate timestamps are exercised.
fn year_of_observations(year: i32, skip: &[NaiveDateTime]) -> Vec<Observation> {
    hourly_sequence(civil(year, 1, 1, 0), civil(year, 12, 31, 23))
        .into_iter()
        .filter(|ts| !skip.contains(ts))
        .flat_map(|ts| [observation(ts, "Bucheggplatz"), observation(ts, "Hardbrücke")])
        .collect()
}

#[test]
fn five_hour_outage_is_one_real_gap() {
    let skip = hourly_sequence(civil(2021, 6, 10, 14), civil(2021, 6, 10, 18));
    let analysis = analyze_gaps(&year_of_observations(2021, &skip));

    assert_eq!(analysis.gaps.len(), 1);
    let gap = &analysis.gaps[0];
    assert_eq!(gap.start, civil(2021, 6, 10, 14));
    assert_eq!(gap.end, civil(2021, 6, 10, 18));
    assert_eq!(gap.duration_hours, 5.0);
    assert!(!gap.is_dst);

    let stats = &analysis.yearly_stats[0];
    assert_eq!(stats.expected, 8_760);
    assert_eq!(stats.actual, 8_755);
    assert_eq!(stats.missing, 5);
    assert_eq!(stats.gap_hours, 5.0);
    assert_eq!(analysis.total_missing, 5);
}

#[test]
fn spring_forward_hour_is_flagged_as_dst() {
    let analysis = analyze_gaps(&year_of_observations(2022, &[civil(2022, 3, 27, 2)]));

    assert_eq!(analysis.gaps.len(), 1);
    assert_eq!(analysis.gaps[0].duration_hours, 1.0);
    assert!(analysis.gaps[0].is_dst);

    let stats = &analysis.yearly_stats[0];
    assert_eq!(stats.missing, 1);
    assert_eq!(stats.gap_hours, 0.0);
    assert_eq!(stats.gap_days, 0.0);
}

#[test]
fn single_complete_day_is_fully_covered() {
    let observations: Vec<Observation> = hourly_sequence(civil(2020, 1, 1, 0), civil(2020, 1, 1, 23))
        .into_iter()
        .map(|ts| observation(ts, "Bucheggplatz"))
        .collect();
    let analysis = analyze_gaps(&observations);

    assert!(analysis.gaps.is_empty());
    assert_eq!(analysis.yearly_stats.len(), 1);
    let stats = &analysis.yearly_stats[0];
    assert_eq!(stats.year, 2020);
    assert_eq!(stats.expected, 24);
    assert_eq!(stats.actual, 24);
    assert_eq!(stats.completeness, 100.0);
    assert!(stats.gap_hours.is_sign_positive());
    assert!(stats.gap_days.is_sign_positive());

    let json = serde_json::to_string(&analysis).expect("analysis should serialize");
    assert!(!json.contains("-0.0"), "{json}");
    assert!(json.contains("\"gap_hours\":0.0"));
}

#[test]
fn week_53_of_2026_lands_in_first_week_of_2027() {
    let mut days = vec![
        DailyTotal {
            year: 2026,
            iso_week: 53,
            date: date(2026, 12, 28),
            total: 500,
        },
        DailyTotal {
            year: 2026,
            iso_week: 53,
            date: date(2026, 12, 29),
            total: 500,
        },
        DailyTotal {
            year: 2026,
            iso_week: 53,
            date: date(2026, 12, 30),
            total: 500,
        },
    ];
    for (day, total) in [(4, 700), (5, 900)] {
        days.push(DailyTotal {
            year: 2027,
            iso_week: 1,
            date: date(2027, 1, day),
            total,
        });
    }
    days.push(DailyTotal {
        year: 2027,
        iso_week: 2,
        date: date(2027, 1, 11),
        total: 1_234,
    });

    let unfolded_week_2 = weekly_averages(&days, &WeeklySuppression::default())
        .into_iter()
        .find(|w| w.year == 2027 && w.week == 2)
        .expect("week 2 should exist before folding");

    let folded = fold_week_53(days);
    assert!(!folded.iter().any(|d| d.iso_week == 53));

    let weekly = weekly_averages(&folded, &WeeklySuppression::default());
    assert!(!weekly.iter().any(|w| w.year == 2026 && w.week == 53));

    let first = weekly
        .iter()
        .find(|w| w.year == 2027 && w.week == 1)
        .expect("folded week 1 should exist");
    assert_eq!(first.days, 5);
    assert_eq!(first.mean_daily_total, Some(3_100.0 / 5.0));

    let week_2 = weekly
        .iter()
        .find(|w| w.year == 2027 && w.week == 2)
        .expect("week 2 should survive folding");
    assert_eq!(week_2, &unfolded_week_2);
}

/// Deterministic pseudo-random outage pattern over ten weeks spanning the
/// 2023 spring-forward.
fn patchy_observed() -> (Vec<NaiveDateTime>, ObservedHours) {
    let expected = hourly_sequence(civil(2023, 2, 20, 0), civil(2023, 5, 1, 0));
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut keep = Vec::new();
    let mut outage_left = 0u32;
    for ts in &expected {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        if outage_left == 0 && state % 97 == 0 {
            outage_left = (state % 30) as u32 + 1;
        }
        let first_or_last = *ts == expected[0] || Some(ts) == expected.last();
        if outage_left > 0 && !first_or_last {
            outage_left -= 1;
            continue;
        }
        if *ts == civil(2023, 3, 26, 2) {
            continue;
        }
        keep.push(*ts);
    }
    (expected, keep.into_iter().collect())
}

#[test]
fn gaps_cover_exactly_the_missing_slots_in_order() {
    let (expected, observed) = patchy_observed();
    let gaps = detect_gaps(&expected, &observed);
    assert!(!gaps.is_empty());

    let missing: BTreeSet<NaiveDateTime> = expected
        .iter()
        .copied()
        .filter(|ts| !observed.contains(ts))
        .collect();

    let mut covered = BTreeSet::new();
    for gap in &gaps {
        for ts in hourly_sequence(gap.start, gap.end) {
            assert!(covered.insert(ts), "{ts} covered twice");
        }
        assert_eq!(
            gap.duration_hours,
            (gap.end - gap.start).num_hours() as f64 + 1.0
        );
    }
    assert_eq!(covered, missing);

    for pair in gaps.windows(2) {
        assert!(pair[1].start - pair[0].end > chrono::Duration::hours(1));
    }
}

#[test]
fn dst_flag_matches_rule_exactly() {
    let (expected, observed) = patchy_observed();
    for gap in detect_gaps(&expected, &observed) {
        let rule = gap.duration_hours <= 1.0 && gap.start.month() == 3 && gap.start.hour() == 2;
        assert_eq!(gap.is_dst, rule, "gap starting {}", gap.start);
    }
}

#[test]
fn gap_detection_is_repeatable() {
    let (expected, observed) = patchy_observed();
    assert_eq!(
        detect_gaps(&expected, &observed),
        detect_gaps(&expected, &observed)
    );
}

#[test]
fn completeness_stays_within_bounds() {
    let (expected, observed) = patchy_observed();
    let gaps = detect_gaps(&expected, &observed);
    for stats in yearly_completeness(&observed, &gaps) {
        assert!((0.0..=100.0).contains(&stats.completeness));
        assert_eq!(stats.missing, stats.expected - stats.actual);
        assert_eq!(stats.gap_days, stats.gap_hours / 24.0);
    }
}
