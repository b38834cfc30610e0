use ogd_traffic::{
    analyze_gaps, current_year, gap_summary, load_years, parse_years, CategoryMap,
    OgdSourceConfig,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut years = parse_years(&args.join(","));
    if years.is_empty() {
        years = std::env::var("OGD_YEARS")
            .map(|raw| parse_years(&raw))
            .unwrap_or_default();
    }
    if years.is_empty() {
        years = vec![current_year()];
    }

    let cfg = OgdSourceConfig::from_env();
    println!(
        "Running completeness audit for Rosengartenbrücke hourly counts, years {:?} (cache: {})",
        years,
        cfg.cache_root.display()
    );

    let dataset = load_years(&years, &cfg, &CategoryMap::rosengarten())?;
    for failure in &dataset.failed_years {
        println!("  WARNING {} unavailable: {}", failure.year, failure.message);
    }
    if dataset.observations.is_empty() {
        return Err("no observations loaded; nothing to audit".into());
    }

    let analysis = analyze_gaps(&dataset.observations);
    println!();
    for stats in &analysis.yearly_stats {
        println!(
            "  {} | {} -> {} | expected={} actual={} missing={} completeness={:.1}% gap_days={:.1}",
            stats.year,
            stats.start,
            stats.end,
            stats.expected,
            stats.actual,
            stats.missing,
            stats.completeness,
            stats.gap_days
        );
    }

    let summary = gap_summary(&analysis);
    println!();
    for gap in &summary.significant_gaps {
        println!(
            "  gap {} -> {} ({:.1}h)",
            gap.start, gap.end, gap.duration_hours
        );
    }
    println!(
        "\nTOTAL | missing_hours={} significant_gaps={} significant_hours={:.0} dst_gaps={}",
        analysis.total_missing,
        summary.significant_gaps.len(),
        summary.significant_hours,
        summary.dst_gap_count
    );

    if summary.significant_gaps.is_empty() {
        println!("RESULT: no significant gaps detected in audited range.");
    } else if let Some(largest) = &summary.largest {
        println!(
            "RESULT: largest gap {} -> {} ({:.1} days)",
            largest.start,
            largest.end,
            largest.duration_days()
        );
    }

    Ok(())
}
