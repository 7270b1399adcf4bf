use dotenv::dotenv;
use tokio_util::sync::CancellationToken;

use user_store::{scenario, MongoDB, StoreConfig, UserStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = StoreConfig::from_env().map_err(|e| {
        log::error!("{}", e);
        e
    })?;

    log::info!("🚀 Starting user-store demo...");
    log::info!("📊 Database: {} / collection: {}", config.database, config.collection);

    let db = MongoDB::connect(&config).await.map_err(|e| {
        log::error!("could not connect to mongo: {}", e);
        e
    })?;
    log::info!("✅ Connected to the db");

    // Ctrl-C aborts whichever call is in flight instead of leaving it hanging
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, cancelling pending operations");
                cancel.cancel();
            }
        })
    };

    let store = UserStore::new(&db, &config).with_cancellation(cancel);

    let outcome = scenario::run(&store).await;
    match &outcome {
        Ok(report) => {
            log::info!("----------------------------");
            log::info!("Found: {}", report.found);
            log::info!("Users in collection: {}", report.all_users.len());
            if !report.duplicate_rejected {
                log::warn!("⚠️  Unique index did not reject the duplicate name");
            }
        }
        Err(e) => log::error!("{}", e),
    }

    // truncate after each run, even when the walkthrough failed
    if let Err(e) = scenario::teardown(&store).await {
        log::error!("Teardown failed: {}", e);
    }

    ctrl_c.abort();
    db.shutdown().await;

    outcome?;
    Ok(())
}
