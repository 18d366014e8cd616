use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use screener_alerts::{AlertEvaluator, AlertScheduler, DatabaseSink, DslScreenExecutor};
use screener_compiler::{QueryCompiler, Validator};
use screener_core::catalog::FieldCatalog;
use screener_core::config::AppConfig;
use screener_core::ConfigLoader;
use screener_data::repositories::Repositories;
use screener_translator::QueryTranslator;
use screener_web_api::{ApiServer, AppState};

#[derive(Parser)]
#[command(name = "screener")]
#[command(about = "Natural-language stock screener and alert engine", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server together with the alert scheduler
    Serve,
    /// Translate an English query and print the DSL tree
    Translate {
        /// The query, e.g. "pe below 15 and positive earnings last 4 quarters"
        query: String,
    },
    /// Translate, validate, and print the compiled SQL without executing
    Compile {
        query: String,
    },
    /// Run a screen against the database and print matching instruments
    Screen {
        query: String,
    },
    /// Run one alert evaluation cycle and exit
    AlertsOnce,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::load_from(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Translate { query } => translate(&config, &query),
        Commands::Compile { query } => compile(&config, &query),
        Commands::Screen { query } => screen(config, &query).await,
        Commands::AlertsOnce => alerts_once(config).await,
    }
}

fn build_pipeline(
    config: &AppConfig,
) -> (Arc<FieldCatalog>, QueryTranslator, Validator, QueryCompiler) {
    let catalog = Arc::new(FieldCatalog::builtin());
    let translator = QueryTranslator::new(catalog.clone());
    let validator = Validator::new(
        catalog.clone(),
        config.compiler.clone(),
        config.validator.clone(),
    );
    let compiler = QueryCompiler::new(catalog.clone(), config.compiler.clone());
    (catalog, translator, validator, compiler)
}

async fn serve(config: AppConfig) -> Result<()> {
    let pool = screener_data::connect(&config.database).await?;
    let repos = Repositories::new(pool);

    let (catalog, translator, validator, compiler) = build_pipeline(&config);
    let state = Arc::new(AppState {
        catalog: catalog.clone(),
        translator,
        validator,
        compiler,
        repos: repos.clone(),
    });

    // The scheduler gets its own pipeline instances; the components are
    // stateless but not shared across the seam.
    let (_, _, alert_validator, alert_compiler) = build_pipeline(&config);
    let executor = Arc::new(DslScreenExecutor::new(
        alert_validator,
        alert_compiler,
        repos.screener.clone(),
    ));
    let evaluator = Arc::new(AlertEvaluator::new(catalog, executor));
    let sink = Arc::new(DatabaseSink::new(repos.notifications.clone()));
    let scheduler = AlertScheduler::new(repos, evaluator, sink, config.scheduler.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Termination signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    ApiServer::new(state)
        .serve_with_shutdown(&addr, shutdown_rx)
        .await?;

    scheduler_task.await.context("scheduler task failed")??;
    Ok(())
}

fn translate(config: &AppConfig, query: &str) -> Result<()> {
    let (_, translator, _, _) = build_pipeline(config);
    let rule = translator.translate(query);
    println!("{}", serde_json::to_string_pretty(&rule)?);
    Ok(())
}

fn compile(config: &AppConfig, query: &str) -> Result<()> {
    let (_, translator, validator, compiler) = build_pipeline(config);

    let rule = translator.translate(query);
    let raw = serde_json::to_value(&rule)?;
    let validated = match validator.validate(&raw) {
        Ok(validated) => validated,
        Err(report) => {
            eprintln!("{}", serde_json::to_string_pretty(&report.issues)?);
            bail!("the screen failed validation");
        }
    };

    for warning in &validated.warnings {
        tracing::warn!(path = %warning.path, "{}", warning.message);
    }

    let compiled = compiler.compile(&validated.rule)?;
    println!("{}", compiled.sql);
    println!();
    for (i, param) in compiled.params.iter().enumerate() {
        println!("${} = {}", i + 1, param);
    }
    Ok(())
}

async fn screen(config: AppConfig, query: &str) -> Result<()> {
    let pool = screener_data::connect(&config.database).await?;
    let repos = Repositories::new(pool);
    let (_, translator, validator, compiler) = build_pipeline(&config);

    let rule = translator.translate(query);
    let raw = serde_json::to_value(&rule)?;
    let validated = match validator.validate(&raw) {
        Ok(validated) => validated,
        Err(report) => {
            eprintln!("{}", serde_json::to_string_pretty(&report.issues)?);
            bail!("the screen failed validation");
        }
    };

    let compiled = compiler.compile(&validated.rule)?;
    let hits = repos.screener.run(&compiled).await?;

    println!("{} matches", hits.len());
    for hit in hits {
        let pe = hit
            .metrics
            .get("pe_ratio")
            .copied()
            .flatten()
            .map_or_else(|| "-".to_string(), |v| v.to_string());
        println!("{:<12} {:<40} pe={}", hit.ticker, hit.name, pe);
    }
    Ok(())
}

async fn alerts_once(config: AppConfig) -> Result<()> {
    let pool = screener_data::connect(&config.database).await?;
    let repos = Repositories::new(pool);

    let (catalog, _, validator, compiler) = build_pipeline(&config);
    let executor = Arc::new(DslScreenExecutor::new(
        validator,
        compiler,
        repos.screener.clone(),
    ));
    let evaluator = Arc::new(AlertEvaluator::new(catalog, executor));
    let sink = Arc::new(DatabaseSink::new(repos.notifications.clone()));

    let scheduler = AlertScheduler::new(repos, evaluator, sink, config.scheduler.clone());
    scheduler.run_cycle().await?;
    Ok(())
}
