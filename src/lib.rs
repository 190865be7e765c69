pub mod entity_registry;
pub mod error;
pub mod gateway;
pub mod reference_resolver;
pub mod server;
pub mod subgraphs;
pub mod upstream;

pub use entity_registry::{EntityDescriptor, EntityRegistry};
pub use error::{Error, Result, UpstreamError};
pub use gateway::{GatewayConfig, SubgraphEndpoint};
pub use reference_resolver::{Reference, ReferenceResolver, ResolvedEntity};
pub use upstream::{Fetched, HttpUpstream, Upstream, UpstreamRequest, UpstreamSettings};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The subgraph services making up the federated graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceId {
    Users,
    Listings,
    Messages,
}

impl ServiceId {
    pub const ALL: [ServiceId; 3] = [ServiceId::Users, ServiceId::Listings, ServiceId::Messages];

    pub fn name(&self) -> &'static str {
        match self {
            ServiceId::Users => "users",
            ServiceId::Listings => "listings",
            ServiceId::Messages => "messages",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ServiceId::Users => 4001,
            ServiceId::Listings => 4002,
            ServiceId::Messages => 4003,
        }
    }

    pub fn from_name(name: &str) -> Option<ServiceId> {
        ServiceId::ALL.into_iter().find(|service| service.name() == name)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
