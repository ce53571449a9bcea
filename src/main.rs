use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use seller_scraper::browser::ChromeLauncher;
use seller_scraper::config::Settings;
use seller_scraper::database::Database;
use seller_scraper::telegram::{TelegramNotifier, spawn_worker};
use seller_scraper::Harvester;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting seller scraper");

    let settings = Settings::from_env()?;
    let database = Database::new(&settings.database_url).await?;
    let telegram = TelegramNotifier::new(
        settings.telegram_token.clone(),
        settings.telegram_chat_id.clone(),
    );
    let (notifier, notification_worker) = spawn_worker(telegram);

    let harvester = Harvester::new(
        Arc::new(ChromeLauncher::new(settings.browser.clone())),
        Arc::new(database.clone()),
        Arc::new(notifier),
        settings.site.clone(),
        settings.failure_policy,
    )?;
    let stop = harvester.stop_signal();

    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            ctrl_c_stop.request();
        }
    });

    // Run once immediately
    run_and_report(&harvester, &database, &settings).await;

    let scheduler = match &settings.schedule {
        Some(schedule) if !stop.is_requested() => {
            let sched = JobScheduler::new().await?;
            let job_harvester = harvester.clone();
            let job_database = database.clone();
            let job_settings = settings.clone();
            sched
                .add(Job::new_async(schedule.as_str(), move |_uuid, _l| {
                    let harvester = job_harvester.clone();
                    let database = job_database.clone();
                    let settings = job_settings.clone();
                    Box::pin(async move {
                        run_and_report(&harvester, &database, &settings).await;
                    })
                })?)
                .await?;

            info!("Scheduler started - running on `{}`", schedule);
            sched.start().await?;
            Some(sched)
        }
        _ => None,
    };

    if let Some(mut sched) = scheduler {
        // Keep the program running until Ctrl-C
        while !stop.is_requested() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        sched.shutdown().await?;
    }

    // Scheduled jobs may still hold notifier handles, so flush explicitly
    match tokio::time::timeout(Duration::from_secs(10), notification_worker.flush()).await {
        Ok(Err(e)) => error!("Notification worker failed: {}", e),
        Err(_) => error!("Timed out flushing notifications"),
        Ok(Ok(())) => {}
    }

    Ok(())
}

async fn run_and_report(harvester: &Harvester, database: &Database, settings: &Settings) {
    let report = harvester
        .run_batch(&settings.seller_url, settings.products_count)
        .await;

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to serialize batch report: {}", e),
    }

    match database.latest_batch().await {
        Ok(products) => {
            for (index, product) in products.iter().enumerate() {
                info!(
                    "{}. {} {}",
                    index + 1,
                    product.name,
                    settings.site.product_url(product.external_id)
                );
            }
        }
        Err(e) => error!("Failed to list latest products: {}", e),
    }
}
