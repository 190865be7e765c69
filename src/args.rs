use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Url;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use swapgraph::{GatewayConfig, ServiceId, UpstreamSettings};

#[derive(Debug, Parser)]
#[command(name = "swapgraph", version, about = "Federated GraphQL subgraphs for the book-swap marketplace")]
pub(crate) struct Args {
    /// Log level
    #[arg(long, value_enum, default_value_t = LogLevel::Info, env = "SWAPGRAPH_LOG", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Serve one subgraph over HTTP
    Serve(ServeArgs),
    /// Work with the gateway's subgraph list
    #[command(subcommand)]
    Gateway(GatewayCommand),
}

#[derive(Debug, clap::Args)]
pub(crate) struct ServeArgs {
    #[arg(value_enum)]
    pub service: ServiceId,

    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Defaults to 4001, 4002 and 4003 for users, listings and messages
    #[arg(long)]
    pub port: Option<u16>,

    /// Origin of the REST API the subgraph proxies
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:5000")]
    pub base_url: Url,

    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    /// Retries after a connection failure or timeout
    #[arg(long, default_value_t = 2)]
    pub retries: u32,
}

impl ServeArgs {
    pub(crate) fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.service.default_port())
    }

    pub(crate) fn upstream_settings(&self) -> UpstreamSettings {
        let mut settings = UpstreamSettings::new(self.base_url.clone());
        settings.timeout = Duration::from_secs(self.timeout_secs);
        settings.retries = self.retries;
        settings
    }
}

#[derive(Debug, Subcommand)]
pub(crate) enum GatewayCommand {
    /// Print the subgraph name/URL list
    Subgraphs(ConfigArg),
    /// Write every subgraph's federation SDL and a matching supergraph.yaml
    ExportSdl {
        #[arg(long)]
        out_dir: PathBuf,
        #[command(flatten)]
        config: ConfigArg,
    },
    /// Fetch the SDL of every running subgraph and verify its entity keys
    Check(ConfigArg),
}

#[derive(Debug, clap::Args)]
pub(crate) struct ConfigArg {
    /// Path to supergraph.yaml; the bundled copy is used when omitted
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

impl ConfigArg {
    pub(crate) fn load(&self) -> swapgraph::Result<GatewayConfig> {
        match &self.config {
            Some(path) => GatewayConfig::load(path),
            None => GatewayConfig::embedded(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogLevel {
    /// Completely disables logging
    Off,
    /// Only errors from swapgraph
    Error,
    /// Warnings and errors from swapgraph
    Warn,
    /// Info, warning and error messages from swapgraph
    Info,
    /// Debug, info, warning and error messages from all dependencies
    Debug,
    /// Trace, debug, info, warning and error messages from all dependencies
    Trace,
}

impl LogLevel {
    pub(crate) fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "swapgraph=error,off",
            LogLevel::Warn => "swapgraph=warn,off",
            LogLevel::Info => "swapgraph=info,off",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}
