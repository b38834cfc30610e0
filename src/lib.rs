//! Hourly traffic counts from the Zurich open-data portal.
//!
//! Current implemented scope:
//! - record parsing and category mapping for the Rosengartenbrücke feed
//! - yearly payload retrieval with an expiring on-disk cache
//! - hourly completeness: gap detection with DST classification and
//!   per-year coverage statistics
//! - ISO week-53 folding for weekly comparisons, monthly coverage trend
//! - class, category and direction shares, hour x weekday profile
//! - dashboard snapshot, HTML tables and HTTP routes

mod calendar;
mod completeness;
mod dashboard;
mod observability;
mod ogd_source;
mod records;
mod summary;

pub use calendar::{
    daily_totals_by_week, days_in_month, fold_week_53, folded_weekly_averages, monthly_averages,
    weekly_averages, DailyTotal, MonthlyAverage, SuppressedPeriod, WeekKeying, WeeklyAverage,
    WeeklySuppression, FOLD_WEEK, LAST_COMPARABLE_WEEK, MIN_MONTH_COVERAGE,
};
pub use completeness::{
    analyze_gaps, completeness_percent, detect_gaps, hourly_sequence, hourly_slot_count,
    is_spring_forward_artifact, yearly_completeness, Gap, GapAnalysis, ObservedHours,
    YearlyCompleteness,
};
pub use dashboard::{
    apply_filters, build_snapshot, dashboard_router, dashboard_router_with_settings,
    demo_observations, format_number_ch, parse_weekday, render_dashboard_html, DashboardFilters,
    DashboardQuery, DashboardSnapshot, DatasetSource, InMemoryDatasetSource, SnapshotSettings,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_dataset_ready, log_source_selected,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use ogd_source::{
    available_years, current_year, load_years, parse_years, yearly_payload_url, LoadedDataset,
    OgdSourceConfig, PayloadSource, SourceError, YearLoadFailure, YearlyPayload, OGD_BASE_URL,
};
pub use records::{parse_civil_timestamp, parse_ogd_csv, CategoryMap, Observation, RecordParseError};
pub use summary::{
    category_shares, class_shares, direction_totals, distinct_years, gap_summary,
    hour_weekday_profile, last_seven_days, traffic_kpis, yearly_category_shares,
    yearly_comparison, GapSummary, RecentCategory, RecentPoint, RecentWindow, ShareRow,
    TrafficKpis, WeekdayProfile, YearCategoryShare, YearComparison, RECENT_CATEGORIES,
};
