use std::sync::Arc;

use chrono::Utc;
use milelog::config::AppConfig;
use milelog::error::AppError;
use milelog::services::{
    directions::{OsrmRouteProvider, RouteResolver},
    storage::StorageService,
    sync::sink_for,
};
use milelog::store::TripStore;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;

    let storage = StorageService::new(config.data_dir.clone());
    storage.ensure_structure().await?;

    let mut store = TripStore::load(
        storage.clone(),
        config.identity.clone(),
        config.username.clone(),
        sink_for(config.sheets_webhook.clone()),
    )
    .await?;

    let now = Utc::now();
    let summary = store.summary(config.rate_per_mile, now);
    info!(
        trips = store.entries().len(),
        today_miles = summary.today_miles,
        today_amount = summary.today_amount,
        week_miles = summary.week_miles,
        week_amount = summary.week_amount,
        "trip history"
    );

    let resolver = RouteResolver::new(
        Arc::new(OsrmRouteProvider::new(config.routing_url.clone())),
        storage.clone(),
    );
    match resolver.cached_route().await {
        Some(route) => {
            let last = route.summary();
            info!(
                from = %last.start_address,
                to = %last.end_address,
                miles = last.miles,
                minutes = last.minutes,
                "last saved route"
            );
        }
        None => info!("no saved trip to restore"),
    }

    match store.export_csv(false, now) {
        Ok(export) => {
            let path = config.data_dir.join(&export.filename);
            tokio::fs::write(&path, &export.bytes).await?;
            info!("exported trip log to {}", path.display());
        }
        Err(AppError::NoTrips) => info!("no trips to export"),
        Err(err) => return Err(err),
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,milelog=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
