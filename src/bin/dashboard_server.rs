use std::{net::SocketAddr, sync::Arc};

use ogd_traffic::{
    current_year, dashboard_router, init_logging, load_years, log_app_bind, log_app_start,
    log_dataset_ready, log_source_selected, logging_config_from_env, parse_years, CategoryMap,
    DatasetSource, InMemoryDatasetSource, OgdSourceConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let addr: SocketAddr = std::env::var("OGD_DASHBOARD_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let source = source_from_env().await?;
    let app = dashboard_router(source);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn source_from_env() -> Result<Arc<dyn DatasetSource>, Box<dyn std::error::Error>> {
    let force_demo = std::env::var("OGD_DASHBOARD_USE_DEMO")
        .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if force_demo {
        log_source_selected("demo", Some("OGD_DASHBOARD_USE_DEMO"), &[]);
        return Ok(Arc::new(InMemoryDatasetSource::demo()));
    }

    let years = std::env::var("OGD_YEARS")
        .map(|raw| parse_years(&raw))
        .ok()
        .filter(|years| !years.is_empty())
        .unwrap_or_else(|| vec![current_year()]);
    log_source_selected("ogd", None, &years);

    let cfg = OgdSourceConfig::from_env();
    // The fetcher uses reqwest's blocking client.
    let dataset = tokio::task::spawn_blocking(move || {
        load_years(&years, &cfg, &CategoryMap::rosengarten())
    })
    .await??;

    let failed: Vec<i32> = dataset.failed_years.iter().map(|f| f.year).collect();
    log_dataset_ready(dataset.observations.len(), &dataset.loaded_years, &failed);
    if dataset.observations.is_empty() {
        return Err("no data available for the selected years".into());
    }

    Ok(Arc::new(
        InMemoryDatasetSource::new(dataset.observations).with_failures(dataset.failed_years),
    ))
}
