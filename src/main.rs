use std::process;

use easecache::{
    cache::{Caches, CachesConfig, EntityType},
    config,
    infra::{error::InfraError, telemetry},
    storm::{self, UserStore},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

/// Entity used for eligibility checks that name only a table.
struct AnyEntity;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_error(&error);
        process::exit(1);
    }
}

fn report_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "easecache failed");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "easecache failed");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Storm(Box::<config::StormArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Storm(_) => run_storm(settings).await,
        config::Command::Check(args) => {
            run_check(&settings, &args);
            Ok(())
        }
    }
}

async fn run_storm(settings: config::Settings) -> Result<(), InfraError> {
    let caches = Caches::new(CachesConfig::from(&settings.cache));
    let store = UserStore::seeded(settings.storm.latency);

    info!(
        target = "easecache::storm",
        layer = caches.name(),
        easer = caches.config().easer,
        cacher = caches.config().cacher.is_some(),
        backend = ?settings.cache.backend,
        "Starting storm"
    );

    let report = storm::run(&caches, &store, &settings.storm).await?;

    println!("callers:              {}", report.callers);
    println!("burst executions:     {}", report.storm_executions);
    println!("follow-up executions: {}", report.follow_up_executions);
    println!(
        "after rename:         {}",
        report.renamed_to.as_deref().unwrap_or("<missing>")
    );
    println!("cache errors:         {}", report.cache_errors);
    Ok(())
}

fn run_check(settings: &config::Settings, args: &config::CheckArgs) {
    let caches = Caches::new(CachesConfig::from(&settings.cache));
    let entity = EntityType::of::<AnyEntity>();
    if caches.eligibility().rules().is_empty() {
        info!("no table rules configured, every table is cacheable");
    }

    for table in &args.tables {
        let verdict = if caches.eligibility().is_cacheable(table, &entity) {
            "cacheable"
        } else {
            "bypassed"
        };
        println!("{table}\t{verdict}");
    }
}
