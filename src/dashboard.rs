//! Dashboard snapshot, HTML tables and HTTP routes.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calendar::{
    folded_weekly_averages, monthly_averages, MonthlyAverage, WeekKeying, WeeklyAverage,
    WeeklySuppression,
};
use crate::completeness::{analyze_gaps, YearlyCompleteness};
use crate::ogd_source::YearLoadFailure;
use crate::records::{CategoryMap, Observation};
use crate::summary::{
    category_shares, class_shares, direction_totals, gap_summary, hour_weekday_profile,
    last_seven_days, traffic_kpis, yearly_category_shares, yearly_comparison, GapSummary,
    RecentWindow, ShareRow, TrafficKpis, WeekdayProfile, YearCategoryShare, YearComparison,
};

const NO_DATA: &str = "–";
const WEEKDAY_LABELS: [&str; 7] = ["Mo", "Di", "Mi", "Do", "Fr", "Sa", "So"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardFilters {
    pub directions: Option<BTreeSet<String>>,
    pub classes: Option<BTreeSet<String>>,
    pub weekdays: Option<BTreeSet<u32>>,
}

impl DashboardFilters {
    pub fn matches(&self, obs: &Observation) -> bool {
        self.directions
            .as_ref()
            .map_or(true, |set| set.contains(&obs.direction))
            && self
                .classes
                .as_ref()
                .map_or(true, |set| set.contains(&obs.vehicle_class))
            && self
                .weekdays
                .as_ref()
                .map_or(true, |set| set.contains(&obs.weekday().num_days_from_monday()))
    }
}

/// Comma-separated query parameters. Weekdays accept English or German
/// names and abbreviations ("mon", "Dienstag", "so").
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DashboardQuery {
    pub direction: Option<String>,
    pub class: Option<String>,
    pub weekday: Option<String>,
}

impl DashboardQuery {
    pub fn to_filters(&self) -> DashboardFilters {
        DashboardFilters {
            directions: self.direction.as_deref().map(split_list),
            classes: self.class.as_deref().map(split_list),
            weekdays: self.weekday.as_deref().map(|raw| {
                split_list(raw)
                    .iter()
                    .filter_map(|name| parse_weekday(name))
                    .map(|day| day.num_days_from_monday())
                    .collect()
            }),
        }
    }
}

pub fn parse_weekday(raw: &str) -> Option<Weekday> {
    let lower = raw.trim().to_lowercase();
    let german = match lower.as_str() {
        "mo" | "montag" => Some(Weekday::Mon),
        "di" | "dienstag" => Some(Weekday::Tue),
        "mi" | "mittwoch" => Some(Weekday::Wed),
        "do" | "donnerstag" => Some(Weekday::Thu),
        "fr" | "freitag" => Some(Weekday::Fri),
        "sa" | "samstag" => Some(Weekday::Sat),
        "so" | "sonntag" => Some(Weekday::Sun),
        _ => None,
    };
    german.or_else(|| Weekday::from_str(&lower).ok())
}

fn split_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn apply_filters(observations: &[Observation], filters: &DashboardFilters) -> Vec<Observation> {
    observations
        .iter()
        .filter(|obs| filters.matches(obs))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotSettings {
    pub week_keying: WeekKeying,
    pub weekly_suppression: WeeklySuppression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub filters: DashboardFilters,
    pub observations: usize,
    pub filtered_observations: usize,
    pub directions: Vec<String>,
    pub vehicle_classes: Vec<String>,
    pub kpis: TrafficKpis,
    pub gap_summary: GapSummary,
    pub total_missing: u64,
    pub yearly_stats: Vec<YearlyCompleteness>,
    pub year_comparison: Vec<YearComparison>,
    pub weekly: Vec<WeeklyAverage>,
    pub monthly: Vec<MonthlyAverage>,
    pub class_shares: Vec<ShareRow>,
    pub category_shares: Vec<ShareRow>,
    pub direction_totals: Vec<ShareRow>,
    pub yearly_category_shares: Vec<YearCategoryShare>,
    pub weekday_profile: Vec<WeekdayProfile>,
    pub recent: Option<RecentWindow>,
    pub failed_years: Vec<YearLoadFailure>,
}

/// Gap and completeness figures and the recent window always cover the
/// whole dataset; traffic aggregates only the filtered rows.
pub fn build_snapshot(
    observations: &[Observation],
    filters: &DashboardFilters,
    settings: &SnapshotSettings,
) -> DashboardSnapshot {
    let filtered = apply_filters(observations, filters);
    let analysis = analyze_gaps(observations);

    let directions: BTreeSet<String> = observations.iter().map(|o| o.direction.clone()).collect();
    let vehicle_classes: BTreeSet<String> =
        observations.iter().map(|o| o.vehicle_class.clone()).collect();

    DashboardSnapshot {
        filters: filters.clone(),
        observations: observations.len(),
        filtered_observations: filtered.len(),
        directions: directions.into_iter().collect(),
        vehicle_classes: vehicle_classes.into_iter().collect(),
        kpis: traffic_kpis(&filtered),
        gap_summary: gap_summary(&analysis),
        total_missing: analysis.total_missing,
        year_comparison: yearly_comparison(&filtered, &analysis),
        weekly: folded_weekly_averages(
            &filtered,
            settings.week_keying,
            &settings.weekly_suppression,
        ),
        monthly: monthly_averages(&filtered),
        class_shares: class_shares(&filtered),
        category_shares: category_shares(&filtered),
        direction_totals: direction_totals(&filtered),
        yearly_category_shares: yearly_category_shares(&filtered),
        weekday_profile: hour_weekday_profile(&filtered),
        recent: last_seven_days(observations),
        yearly_stats: analysis.yearly_stats,
        failed_years: Vec::new(),
    }
}

pub trait DatasetSource: Send + Sync + 'static {
    fn observations(&self) -> Arc<Vec<Observation>>;

    fn failed_years(&self) -> Vec<YearLoadFailure> {
        Vec::new()
    }
}

#[derive(Clone)]
pub struct InMemoryDatasetSource {
    observations: Arc<RwLock<Arc<Vec<Observation>>>>,
    failed_years: Vec<YearLoadFailure>,
}

impl InMemoryDatasetSource {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self {
            observations: Arc::new(RwLock::new(Arc::new(observations))),
            failed_years: Vec::new(),
        }
    }

    pub fn with_failures(mut self, failed_years: Vec<YearLoadFailure>) -> Self {
        self.failed_years = failed_years;
        self
    }

    pub fn demo() -> Self {
        Self::new(demo_observations())
    }

    pub fn replace_dataset(&self, observations: Vec<Observation>) {
        let mut guard = self
            .observations
            .write()
            .expect("in-memory dataset lock should not be poisoned");
        *guard = Arc::new(observations);
    }
}

impl DatasetSource for InMemoryDatasetSource {
    fn observations(&self) -> Arc<Vec<Observation>> {
        Arc::clone(
            &self
                .observations
                .read()
                .expect("in-memory dataset lock should not be poisoned"),
        )
    }

    fn failed_years(&self) -> Vec<YearLoadFailure> {
        self.failed_years.clone()
    }
}

pub fn dashboard_router(source: Arc<dyn DatasetSource>) -> Router {
    dashboard_router_with_settings(source, SnapshotSettings::default())
}

pub fn dashboard_router_with_settings(
    source: Arc<dyn DatasetSource>,
    settings: SnapshotSettings,
) -> Router {
    Router::new()
        .route("/dashboard", get(get_dashboard_html))
        .route("/dashboard/snapshot", get(get_dashboard_snapshot))
        .with_state(DashboardAppState {
            source,
            settings: Arc::new(settings),
        })
}

/// Swiss grouping: `1234567.4` renders as `1'234'567`.
pub fn format_number_ch(value: f64) -> String {
    if !value.is_finite() {
        return NO_DATA.to_string();
    }
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push('\'');
        }
        out.push(ch);
    }
    if rounded < 0 {
        out.insert(0, '-');
    }
    out
}

fn format_optional(value: Option<f64>) -> String {
    value.map(format_number_ch).unwrap_or_else(|| NO_DATA.to_string())
}

fn format_duration(hours: f64) -> String {
    if hours < 24.0 {
        format!("{hours:.1}h")
    } else {
        format!("{:.1} days", hours / 24.0)
    }
}

pub fn render_dashboard_html(snapshot: &DashboardSnapshot) -> String {
    let now_utc = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let kpis = &snapshot.kpis;
    let gaps = &snapshot.gap_summary;

    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>Rosengartenbrücke Traffic</title>\n");
    out.push_str("<style>body{margin:0;font-family:\"Avenir Next\",\"Segoe UI\",sans-serif;color:#182026;background:#f4f6f8}.shell{max-width:1200px;margin:0 auto;padding:20px}.hero{background:#14343f;color:#f2f7f9;border-radius:14px;padding:16px 20px}.hero h1{margin:0 0 6px;font-size:1.5rem}.kpis{display:flex;gap:12px;flex-wrap:wrap;margin-top:14px}.kpi{background:#fff;border:1px solid #d7dce1;border-radius:12px;padding:10px 14px;min-width:180px}.kpi b{display:block;font-size:1.3rem}.card{margin-top:16px;background:#fff;border:1px solid #d7dce1;border-radius:12px;overflow:auto}.card h2{margin:0;padding:10px 14px;font-size:1rem;background:#e9f0f2}table{width:100%;border-collapse:collapse}th,td{padding:7px 10px;border-bottom:1px solid #e3e7ea;font-size:.85rem;text-align:left;white-space:nowrap}td.no-data{color:#95a5a6}.note{padding:8px 14px;font-size:.8rem;color:#5f6a73}form{margin-top:12px;display:flex;gap:8px;flex-wrap:wrap}form input{padding:6px 8px;border-radius:8px;border:1px solid #9fb3bd}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");

    out.push_str("<section class=\"hero\"><h1>Rosengartenbrücke hourly traffic</h1>");
    out.push_str(&format!(
        "<div>Rows: {} of {} | Generated: {}</div>",
        snapshot.filtered_observations,
        snapshot.observations,
        escape_html(&now_utc)
    ));
    out.push_str("<form id=\"filters-form\" method=\"get\" action=\"/dashboard\">");
    out.push_str(&filter_input("direction", "Directions", &snapshot.filters.directions));
    out.push_str(&filter_input("class", "Vehicle classes", &snapshot.filters.classes));
    out.push_str("<input name=\"weekday\" placeholder=\"Weekdays (mo,di,...)\">");
    out.push_str("<button type=\"submit\">Apply</button></form>");
    out.push_str("</section>\n");

    for failure in &snapshot.failed_years {
        out.push_str(&format!(
            "<p class=\"note\">Data for {} unavailable: {}</p>",
            failure.year,
            escape_html(&failure.message)
        ));
    }

    out.push_str("<section class=\"kpis\">");
    out.push_str(&kpi("Vehicles total", &format_number_ch(kpis.total_vehicles as f64)));
    out.push_str(&kpi("Mean daily traffic", &format_number_ch(kpis.mean_daily_total)));
    out.push_str(&kpi(
        "Peak hour",
        &kpis
            .peak_hour
            .map(|h| format!("{h}:00 - {}:00", h + 1))
            .unwrap_or_else(|| NO_DATA.to_string()),
    ));
    out.push_str(&kpi("Days in dataset", &format_number_ch(kpis.days as f64)));
    out.push_str("</section>\n");

    out.push_str("<section class=\"kpis\">");
    out.push_str(&kpi("Data gaps (>1h)", &gaps.significant_gaps.len().to_string()));
    out.push_str(&kpi("Missing hours", &format_number_ch(gaps.significant_hours)));
    out.push_str(&kpi("Missing days", &format!("{:.1}", gaps.significant_days)));
    out.push_str("</section>\n");

    if let Some(recent) = &snapshot.recent {
        out.push_str(&table(
            "recent-table",
            &format!(
                "Last 7 days ({} - {})",
                recent.start.format("%d.%m.%Y"),
                recent.end.format("%d.%m.%Y")
            ),
            &["Category", "Mean per hour", "Mean per day"],
            recent.categories.iter().map(|row| {
                vec![
                    row.category.clone(),
                    format_number_ch(row.mean_hourly),
                    format_number_ch(row.mean_daily),
                ]
            }),
        ));
    }

    out.push_str(&table(
        "gaps-table",
        "Data gaps",
        &["From", "To", "Duration", "Year"],
        gaps.significant_gaps.iter().map(|gap| {
            vec![
                gap.start.format("%d.%m.%Y %H:%M").to_string(),
                gap.end.format("%d.%m.%Y %H:%M").to_string(),
                format_duration(gap.duration_hours),
                gap.start.format("%Y").to_string(),
            ]
        }),
    ));
    if gaps.significant_gaps.is_empty() {
        out.push_str("<p class=\"note\">No significant data gaps found.</p>");
    }
    if gaps.dst_gap_count > 0 {
        out.push_str(&format!(
            "<p class=\"note\">{} gaps caused by the daylight-saving switch; these are expected.</p>",
            gaps.dst_gap_count
        ));
    }
    if let Some(largest) = &gaps.largest {
        out.push_str(&format!(
            "<p class=\"note\">Largest gap: {} - {} ({:.0} days)</p>",
            largest.start.format("%d.%m.%Y"),
            largest.end.format("%d.%m.%Y"),
            largest.duration_days()
        ));
    }

    out.push_str(&table(
        "completeness-table",
        "Completeness per year",
        &["Year", "Period", "Expected", "Actual", "Completeness", "Missing days"],
        snapshot.yearly_stats.iter().map(|stats| {
            vec![
                stats.year.to_string(),
                format!("{} – {}", stats.start.format("%d.%m."), stats.end.format("%d.%m.")),
                format_number_ch(stats.expected as f64),
                format_number_ch(stats.actual as f64),
                format!("{:.1}%", stats.completeness),
                if stats.gap_days > 0.0 {
                    format!("{:.1}", stats.gap_days)
                } else {
                    NO_DATA.to_string()
                },
            ]
        }),
    ));

    out.push_str(&table(
        "comparison-table",
        "Year comparison",
        &["Year", "Mean daily traffic", "Total", "Days with data", "Completeness", "Extrapolated"],
        snapshot.year_comparison.iter().map(|row| {
            vec![
                row.year.to_string(),
                format_number_ch(row.mean_daily_total),
                format_number_ch(row.total_vehicles as f64),
                row.days_with_data.to_string(),
                format!("{:.1}%", row.completeness),
                row.extrapolated_total
                    .map(|v| format!("~{}", format_number_ch(v)))
                    .unwrap_or_else(|| NO_DATA.to_string()),
            ]
        }),
    ));

    out.push_str(&table(
        "weekly-table",
        "Weekly mean daily traffic",
        &["Year", "Week", "Mean daily traffic", "Days"],
        snapshot.weekly.iter().map(|week| {
            vec![
                week.year.to_string(),
                week.week.to_string(),
                format_optional(week.mean_daily_total),
                week.days.to_string(),
            ]
        }),
    ));

    out.push_str(&table(
        "monthly-table",
        "Monthly mean daily traffic",
        &["Month", "Direction", "Mean daily traffic", "Coverage"],
        snapshot.monthly.iter().map(|month| {
            vec![
                format!("{:04}-{:02}", month.year, month.month),
                month.direction.clone(),
                format_number_ch(month.mean_daily_total),
                format!("{:.0}%", month.coverage * 100.0),
            ]
        }),
    ));

    out.push_str(&share_table("class-shares-table", "Vehicle classes (%)", "Class", &snapshot.class_shares));
    out.push_str(&share_table(
        "category-shares-table",
        "Vehicle categories (%)",
        "Category",
        &snapshot.category_shares,
    ));
    out.push_str(&share_table("direction-table", "Directions", "Direction", &snapshot.direction_totals));

    out.push_str(&table(
        "category-trend-table",
        "Vehicle categories per year (%)",
        &["Year", "Category", "Vehicles", "Share"],
        snapshot.yearly_category_shares.iter().map(|row| {
            vec![
                row.year.to_string(),
                row.category.clone(),
                format_number_ch(row.vehicles as f64),
                format!("{:.1}%", row.percent),
            ]
        }),
    ));

    let mut profile_headers = vec!["Weekday".to_string(), "Mean per day".to_string()];
    profile_headers.extend((0..24).map(|hour| format!("{hour}h")));
    let profile_headers: Vec<&str> = profile_headers.iter().map(String::as_str).collect();
    out.push_str(&table(
        "weekday-hour-table",
        "Traffic pattern: hour x weekday (mean vehicles per hour)",
        &profile_headers,
        snapshot.weekday_profile.iter().map(|row| {
            let mut cells = vec![
                WEEKDAY_LABELS[row.weekday as usize % 7].to_string(),
                format_number_ch(row.mean_daily_total),
            ];
            cells.extend(row.hourly_means.iter().copied().map(format_number_ch));
            cells
        }),
    ));

    out.push_str("<p class=\"note\">Source: Open Data Zürich, Rosengartenbrücke hourly counts.</p>");
    out.push_str("</main></body></html>\n");
    out
}

fn kpi(label: &str, value: &str) -> String {
    format!(
        "<div class=\"kpi\">{}<b>{}</b></div>",
        escape_html(label),
        escape_html(value)
    )
}

fn share_table(id: &str, title: &str, label: &str, rows: &[ShareRow]) -> String {
    table(
        id,
        title,
        &[label, "Vehicles", "Share"],
        rows.iter().map(|row| {
            vec![
                row.label.clone(),
                format_number_ch(row.vehicles as f64),
                format!("{:.1}%", row.percent),
            ]
        }),
    )
}

fn filter_input(name: &str, placeholder: &str, current: &Option<BTreeSet<String>>) -> String {
    let value = current
        .as_ref()
        .map(|set| set.iter().cloned().collect::<Vec<_>>().join(","))
        .unwrap_or_default();
    format!(
        "<input name=\"{name}\" placeholder=\"{}\" value=\"{}\">",
        escape_html(placeholder),
        escape_html(&value)
    )
}

fn table(
    id: &str,
    title: &str,
    headers: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) -> String {
    let mut out = format!(
        "<section class=\"card\"><h2>{}</h2><table id=\"{id}\"><thead><tr>",
        escape_html(title)
    );
    for header in headers {
        out.push_str("<th>");
        out.push_str(&escape_html(header));
        out.push_str("</th>");
    }
    out.push_str("</tr></thead><tbody>\n");
    for row in rows {
        out.push_str("<tr>");
        for cell in row {
            if cell == NO_DATA {
                out.push_str("<td class=\"no-data\">");
            } else {
                out.push_str("<td>");
            }
            out.push_str(&escape_html(&cell));
            out.push_str("</td>");
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody></table></section>\n");
    out
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Three weeks around the 2024 spring-forward with one outage.
pub fn demo_observations() -> Vec<Observation> {
    let categories = CategoryMap::rosengarten();
    let Some(start) = NaiveDate::from_ymd_opt(2024, 3, 25).and_then(|d| d.and_hms_opt(0, 0, 0))
    else {
        return Vec::new();
    };
    let Some(dst_hour) = NaiveDate::from_ymd_opt(2024, 3, 31).and_then(|d| d.and_hms_opt(2, 0, 0))
    else {
        return Vec::new();
    };
    let Some(outage_start) =
        NaiveDate::from_ymd_opt(2024, 4, 5).and_then(|d| d.and_hms_opt(10, 0, 0))
    else {
        return Vec::new();
    };
    let outage_end = outage_start + ChronoDuration::hours(5);

    let mut out = Vec::new();
    for offset in 0..(21 * 24) {
        let timestamp = start + ChronoDuration::hours(offset);
        if timestamp == dst_hour || (timestamp >= outage_start && timestamp <= outage_end) {
            continue;
        }
        let hour = offset % 24;
        let base = if (6..20).contains(&hour) { 900 } else { 150 };
        for (direction, factor) in [("Bucheggplatz", 1.0), ("Hardbrücke", 0.8)] {
            for (class, share) in [("Personenwagen", 0.8), ("Lieferwagen", 0.15), ("Sattelzug", 0.05)] {
                out.push(Observation {
                    timestamp,
                    count: (base as f64 * factor * share).round() as u64,
                    vehicle_class: class.to_string(),
                    direction: direction.to_string(),
                    category: categories.category_of(class).map(str::to_string),
                });
            }
        }
    }
    out
}

#[derive(Clone)]
struct DashboardAppState {
    source: Arc<dyn DatasetSource>,
    settings: Arc<SnapshotSettings>,
}

fn snapshot_for(state: &DashboardAppState, query: &DashboardQuery) -> DashboardSnapshot {
    let observations = state.source.observations();
    let filters = query.to_filters();
    let mut snapshot = build_snapshot(&observations, &filters, &state.settings);
    snapshot.failed_years = state.source.failed_years();
    snapshot
}

async fn get_dashboard_html(
    State(state): State<DashboardAppState>,
    Query(query): Query<DashboardQuery>,
) -> impl IntoResponse {
    let snapshot = snapshot_for(&state, &query);
    info!(
        component = "dashboard",
        event = "http.dashboard.request",
        filtered_observations = snapshot.filtered_observations
    );
    Html(render_dashboard_html(&snapshot))
}

async fn get_dashboard_snapshot(
    State(state): State<DashboardAppState>,
    Query(query): Query<DashboardQuery>,
) -> impl IntoResponse {
    let snapshot = snapshot_for(&state, &query);
    info!(
        component = "dashboard",
        event = "http.snapshot.request",
        filtered_observations = snapshot.filtered_observations,
        significant_gaps = snapshot.gap_summary.significant_gaps.len()
    );
    Json(snapshot)
}
