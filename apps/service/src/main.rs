mod config;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use logger::LogFormat;
use metadata_trust::metadata::JsonMetadataParser;
use metadata_trust::resolver::{
    HttpMetadataResolverFactory, MetadataSignatureTrustEngineFactory, ReqwestMetadataClientFactory,
};
use metadata_trust::{
    AnchorValidation, HttpTrustAnchorSource, MetadataResolverRepository, RefreshScheduler, RepositoryConfig,
    X509CertificateChainValidator,
};
use tokio::{signal, task::JoinHandle, time::interval};
use tracing::info;
use url::Url;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "federation-trust-service", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref()).context("failed to load configuration")?;

    if cli.print_config {
        println!("{config}");
        return Ok(());
    }

    let format = LogFormat::from_str(&config.logging.format).map_err(|e| anyhow!(e))?;
    logger::init_with(logger::level_from_name(&config.logging.level), format);

    let repository = Arc::new(build_repository(&config).await?);
    info!(
        resolvers = repository.get_trust_anchors_entity_ids().len(),
        rejected = repository.get_rejected_trust_anchors().len(),
        "Metadata resolver repository ready"
    );

    let scheduler = RefreshScheduler::new(Arc::clone(&repository), config.trust_anchors.refresh_interval())
        .with_min_delay(config.trust_anchors.min_refresh_delay())
        .spawn();
    let reporter = report_stats(
        Arc::clone(&repository),
        Duration::from_secs(config.logging.stats_interval_secs),
    );

    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("Ctrl+C received, shutting down");

    scheduler.abort();
    reporter.abort();
    repository.shutdown().await;
    Ok(())
}

async fn build_repository(config: &Config) -> Result<MetadataResolverRepository> {
    let anchor_uris = config
        .trust_anchors
        .uris
        .iter()
        .map(|uri| Url::parse(uri).with_context(|| format!("invalid trust anchor uri '{uri}'")))
        .collect::<Result<Vec<_>>>()?;
    let source = HttpTrustAnchorSource::new(anchor_uris).context("failed to build trust anchor source")?;

    let source_uri = Url::parse(&config.metadata.source_uri)
        .with_context(|| format!("invalid metadata source uri '{}'", config.metadata.source_uri))?;
    let repository_config = RepositoryConfig::new(source_uri)
        .with_environment(&config.metadata.environment)
        .with_refresh_delays(config.metadata.min_refresh_delay(), config.metadata.max_refresh_delay());

    let validator = Arc::new(X509CertificateChainValidator::new());
    let resolver_factory = HttpMetadataResolverFactory::new(Arc::new(JsonMetadataParser), validator.clone())
        .with_roles(config.metadata.filter_roles.clone());

    let mut builder = MetadataResolverRepository::builder(Arc::new(source), repository_config)
        .with_client_factory(Arc::new(ReqwestMetadataClientFactory::default()))
        .with_resolver_factory(Arc::new(resolver_factory))
        .with_trust_engine_factory(Arc::new(MetadataSignatureTrustEngineFactory));

    if let Some(keystore) = &config.trust_anchors.keystore {
        let trust_store = keystore
            .load()
            .with_context(|| format!("failed to load keystore {}", keystore.path.display()))?;
        info!(keystore = %trust_store.name(), certificates = trust_store.len(), "Loaded anchor keystore");
        builder = builder.with_anchor_validation(AnchorValidation::new(validator, Arc::new(trust_store)));
    }

    Ok(builder.build().await)
}

/// Periodically log repository counters
fn report_stats(repository: Arc<MetadataResolverRepository>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(period.max(Duration::from_secs(1)));

        loop {
            timer.tick().await;

            let stats = repository.stats();
            info!(
                resolvers = stats.resolvers,
                with_metadata = stats.resolvers_with_metadata,
                rejected = stats.rejected,
                earliest_expiry = ?stats.earliest_expiry,
                refreshed_at = ?stats.refreshed_at,
                "Repository status"
            );
        }
    })
}
