mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use push_dispatch::config::{AppConfig, SettingsService};
use push_dispatch::database::{self, DbPool};
use push_dispatch::database::repositories::{
    DispatchLogRepository, SqlxDispatchLogRepository, SqlxFarmMemberRepository,
    SqlxPreferenceRepository, SqlxSettingsRepository, SqlxSubscriptionRepository,
    SubscriptionRepository,
};
use push_dispatch::domain::DispatchRequest;
use push_dispatch::logging;
use push_dispatch::push::{
    AudienceSelector, DeliveryEngine, DispatchReporter, DispatchService, JanitorConfig,
    SettingsKeyProvider, SubscriptionJanitor, WebPushClient, generate_vapid_keys,
};

use crate::cli::{Args, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let _logging = logging::init_logging(config.log_format, config.log_dir.as_deref())
        .context("Failed to initialize logging")?;

    if let Commands::GenerateKeys = args.command {
        let (public_key, private_key) = generate_vapid_keys();
        println!("WEB_PUSH_VAPID_PUBLIC_KEY={}", public_key);
        println!("WEB_PUSH_VAPID_PRIVATE_KEY={}", private_key);
        return Ok(());
    }

    let pool = database::init_pool(
        &config.database_url,
        database::pool_size_for(config.concurrency),
    )
    .await
    .with_context(|| format!("Failed to open database {}", config.database_url))?;
    database::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Commands::Send { file, farm } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let request: DispatchRequest =
                serde_json::from_str(&raw).context("Invalid dispatch request JSON")?;

            let service = build_dispatch_service(&pool, &config)?;
            let result = match farm {
                Some(farm_id) => service.dispatch_to_farm(&farm_id, request, &cancel).await,
                None => service.dispatch_with_cancel(request, &cancel).await,
            };
            match result {
                Ok(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                Err(e) => {
                    let body = push_dispatch::error::ErrorResponse::from(&e);
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    anyhow::bail!(e);
                }
            }
        }
        Commands::Janitor { once } => {
            let subscriptions: Arc<dyn SubscriptionRepository> =
                Arc::new(SqlxSubscriptionRepository::new(pool.clone()));
            let logs: Arc<dyn DispatchLogRepository> =
                Arc::new(SqlxDispatchLogRepository::new(pool.clone()));
            let janitor = Arc::new(SubscriptionJanitor::new(
                subscriptions,
                Some(logs),
                JanitorConfig {
                    fail_threshold: config.fail_threshold,
                    interval: config.cleanup_interval,
                    ..Default::default()
                },
            ));

            if once {
                let report = janitor.run_once().await?;
                info!(
                    deactivated = report.deactivated,
                    logs_deleted = report.logs_deleted,
                    "Cleanup pass finished"
                );
            } else {
                info!(interval_secs = config.cleanup_interval.as_secs(), "Subscription janitor started");
                janitor.start(cancel.clone()).await?;
            }
        }
        Commands::GenerateKeys => {}
    }

    pool.close().await;
    Ok(())
}

fn build_dispatch_service(pool: &DbPool, config: &AppConfig) -> anyhow::Result<DispatchService> {
    let subscriptions = Arc::new(SqlxSubscriptionRepository::new(pool.clone()));
    let preferences = Arc::new(SqlxPreferenceRepository::new(pool.clone()));
    let settings = Arc::new(SettingsService::new(Arc::new(SqlxSettingsRepository::new(
        pool.clone(),
    ))));
    let keys = Arc::new(SettingsKeyProvider::new(
        settings.clone(),
        config.vapid_override.clone(),
    ));
    let transport = Arc::new(WebPushClient::new(config.request_timeout)?);

    let engine = DeliveryEngine::new(
        transport,
        subscriptions.clone(),
        keys,
        config.retry_policy.clone(),
        config.concurrency,
    );
    let reporter = DispatchReporter::new(Some(Arc::new(SqlxDispatchLogRepository::new(
        pool.clone(),
    ))));

    Ok(DispatchService::new(
        AudienceSelector::new(subscriptions, preferences),
        engine,
        reporter,
        settings,
    )
    .with_farm_members(Arc::new(SqlxFarmMemberRepository::new(pool.clone()))))
}
