//! Binary entry point: installs the tracing subscriber, loads `Config`,
//! opens the database, runs the migration, and reports a summary — the
//! donor's `batch_test_harness` startup sequence (dotenvy -> tracing ->
//! connect -> migrate), trimmed to this core's scope.

use reconkg::Config;
use reconkg_facade::Facade;
use reconkg_graph::Db;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = Config::from_env();
    info!(database_url = %config.database_url, "starting reconkg");

    let db = Db::connect(&config.database_url).await?;
    let facade = Facade::new(db);
    facade.migrate().await?;

    let stats = facade.graph_stats().await?;
    info!(nodes = stats.node_count, edges = stats.edge_count, "graph ready");

    Ok(())
}
