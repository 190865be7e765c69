mod args;

use anyhow::{Context as _, bail};
use args::{Args, Command, GatewayCommand, ServeArgs};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use swapgraph::gateway::Gateway;
use swapgraph::subgraphs::{listings, messages, users};
use swapgraph::{EntityRegistry, HttpUpstream, ReferenceResolver, ServiceId, Upstream, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log_level.as_filter_str()))
        .with_target(true)
        .init();

    info!("swapgraph {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Serve(serve) => run_subgraph(serve).await,
        Command::Gateway(command) => run_gateway(command).await,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn run_subgraph(args: ServeArgs) -> anyhow::Result<()> {
    let settings = args.upstream_settings();
    info!(service = %args.service, base_url = %settings.base_url, "starting subgraph");

    let upstream: Arc<dyn Upstream> = Arc::new(HttpUpstream::new(settings)?);
    let registry = Arc::new(EntityRegistry::standard());
    let resolver = ReferenceResolver::new(registry, args.service, upstream);

    let addr = SocketAddr::new(args.host, args.port());
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("GraphiQL UI available at http://{}/graphiql", addr);

    match args.service {
        ServiceId::Users => server::serve(listener, users::schema(resolver), shutdown_signal()).await?,
        ServiceId::Listings => server::serve(listener, listings::schema(resolver), shutdown_signal()).await?,
        ServiceId::Messages => server::serve(listener, messages::schema(resolver), shutdown_signal()).await?,
    }

    Ok(())
}

async fn run_gateway(command: GatewayCommand) -> anyhow::Result<()> {
    let registry = Arc::new(EntityRegistry::standard());

    match command {
        GatewayCommand::Subgraphs(config) => {
            for subgraph in config.load()?.subgraphs {
                println!("{}\t{}", subgraph.name, subgraph.url);
            }
        }
        GatewayCommand::ExportSdl { out_dir, config } => {
            let gateway = Gateway::new(config.load()?, registry)?;
            for path in gateway.export_sdl(&out_dir)? {
                println!("{}", path.display());
            }
        }
        GatewayCommand::Check(config) => {
            let gateway = Gateway::new(config.load()?, registry)?;
            let reports = gateway.check().await;

            let mut failed = 0;
            for report in &reports {
                match &report.outcome {
                    Ok(entities) => {
                        info!(subgraph = %report.name, url = %report.url, ?entities, "subgraph ok")
                    }
                    Err(e) => {
                        failed += 1;
                        error!(subgraph = %report.name, url = %report.url, error = %e, "subgraph check failed");
                    }
                }
            }

            if failed > 0 {
                bail!("{failed} of {} subgraphs failed the check", reports.len());
            }
        }
    }

    Ok(())
}
