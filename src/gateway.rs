//! Gateway-side configuration: the static list of subgraphs handed to the
//! federation router, plus tooling to export and check their schemas.

use futures::future::join_all;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::fs;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::entity_registry::EntityRegistry;
use crate::error::{Error, Result, UpstreamError};
use crate::{ServiceId, subgraphs};

/// `supergraph.yaml` shipped with the repository.
pub const DEFAULT_SUPERGRAPH_YAML: &str = include_str!("../schemas/supergraph.yaml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SupergraphConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    federation_version: Option<String>,
    subgraphs: BTreeMap<String, SubgraphConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SubgraphConfig {
    routing_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema: Option<SchemaConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SchemaConfig {
    file: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubgraphEndpoint {
    pub name: String,
    pub url: Url,
    pub schema_file: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayConfig {
    pub federation_version: Option<String>,
    pub subgraphs: Vec<SubgraphEndpoint>,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        debug!(path = %path.display(), "reading supergraph config");

        let contents = fs::read_to_string(path)?;
        GatewayConfig::from_yaml(&contents, base_dir)
    }

    /// Parses a `supergraph.yaml`. Schema file paths are taken relative to `base_dir`.
    pub fn from_yaml(contents: &str, base_dir: &Path) -> Result<Self> {
        let config: SupergraphConfig = serde_yaml::from_str(contents)?;

        if config.subgraphs.is_empty() {
            return Err(Error::Config("supergraph config lists no subgraphs".to_string()));
        }

        let subgraphs = config
            .subgraphs
            .into_iter()
            .map(|(name, subgraph)| {
                let url = Url::parse(&subgraph.routing_url).map_err(|e| {
                    Error::Config(format!(
                        "subgraph `{name}` has invalid routing_url `{}`: {e}",
                        subgraph.routing_url
                    ))
                })?;

                if ServiceId::from_name(&name).is_none() {
                    warn!(subgraph = %name, "subgraph is not served by this repository");
                }

                Ok(SubgraphEndpoint {
                    schema_file: subgraph.schema.map(|schema| base_dir.join(schema.file)),
                    name,
                    url,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GatewayConfig {
            federation_version: config.federation_version,
            subgraphs,
        })
    }

    pub fn embedded() -> Result<Self> {
        GatewayConfig::from_yaml(DEFAULT_SUPERGRAPH_YAML, Path::new("schemas"))
    }

    pub fn endpoint(&self, name: &str) -> Option<&SubgraphEndpoint> {
        self.subgraphs.iter().find(|subgraph| subgraph.name == name)
    }

    /// Renders the config back to YAML with schema files named relative to `base_dir`.
    pub fn to_yaml(&self, base_dir: &Path) -> Result<String> {
        let subgraphs = self
            .subgraphs
            .iter()
            .map(|subgraph| {
                let schema = subgraph.schema_file.as_ref().map(|file| SchemaConfig {
                    file: match file.strip_prefix(base_dir) {
                        Ok(relative) => format!("./{}", relative.display()),
                        Err(_) => file.display().to_string(),
                    },
                });
                let config = SubgraphConfig {
                    routing_url: subgraph.url.to_string(),
                    schema,
                };
                (subgraph.name.clone(), config)
            })
            .collect();

        let config = SupergraphConfig {
            federation_version: self.federation_version.clone(),
            subgraphs,
        };

        Ok(serde_yaml::to_string(&config)?)
    }
}

/// Outcome of checking one live subgraph.
#[derive(Debug)]
pub struct SubgraphReport {
    pub name: String,
    pub url: Url,
    /// Entity types the subgraph publishes, or why the check failed.
    pub outcome: Result<Vec<String>>,
}

pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<EntityRegistry>,
    client: reqwest::Client,
}

impl Gateway {
    pub fn new(config: GatewayConfig, registry: Arc<EntityRegistry>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        Ok(Gateway {
            config,
            registry,
            client,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Queries every subgraph's `_service { sdl }` concurrently and verifies
    /// the published entity keys against the registry.
    pub async fn check(&self) -> Vec<SubgraphReport> {
        let checks = self.config.subgraphs.iter().map(|subgraph| async move {
            let outcome = match self.fetch_sdl(&subgraph.url).await {
                Ok(sdl) => self.registry.verify_subgraph(&subgraph.name, &sdl),
                Err(e) => Err(e),
            };

            SubgraphReport {
                name: subgraph.name.clone(),
                url: subgraph.url.clone(),
                outcome,
            }
        });

        join_all(checks).await
    }

    async fn fetch_sdl(&self, url: &Url) -> Result<String> {
        let unreachable = |source: reqwest::Error| UpstreamError::Unreachable {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .post(url.clone())
            .json(&json!({ "query": "{ _service { sdl } }" }))
            .send()
            .await
            .map_err(unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status,
            }
            .into());
        }

        let body: Value = response.json().await.map_err(unreachable)?;

        body.pointer("/data/_service/sdl")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                UpstreamError::UnexpectedShape {
                    url: url.to_string(),
                    expected: "data._service.sdl",
                }
                .into()
            })
    }

    /// Writes the federation SDL of every subgraph served here into
    /// `out_dir`, plus a `supergraph.yaml` pointing at those files.
    pub fn export_sdl(&self, out_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)?;

        let mut written = Vec::new();
        let mut exported = self.config.clone();

        for subgraph in &mut exported.subgraphs {
            let Some(service) = ServiceId::from_name(&subgraph.name) else {
                warn!(subgraph = %subgraph.name, "skipping SDL export for foreign subgraph");
                continue;
            };

            let path = out_dir.join(format!("{}.graphql", service.name()));
            fs::write(&path, subgraphs::sdl(service))?;
            info!(subgraph = %subgraph.name, path = %path.display(), "wrote subgraph SDL");

            subgraph.schema_file = Some(path.clone());
            written.push(path);
        }

        let config_path = out_dir.join("supergraph.yaml");
        fs::write(&config_path, exported.to_yaml(out_dir)?)?;
        written.push(config_path);

        Ok(written)
    }
}
