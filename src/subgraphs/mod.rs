//! The three federated subgraphs and the plumbing they share: upstream
//! proxying, entity resolution through the [`ReferenceResolver`], and the
//! forwarded `Authorization` header.

pub mod listings;
pub mod messages;
pub mod users;

use async_graphql::{Context, ErrorExtensions, ID, SDLExportOptions};
use http::HeaderValue;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, UpstreamError};
use crate::reference_resolver::{ReferenceResolver, ResolvedEntity};
use crate::upstream::{Fetched, Upstream, UpstreamRequest};
use crate::ServiceId;

/// Inbound `Authorization` header value, forwarded verbatim to the REST API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorization(pub HeaderValue);

pub(crate) fn authorization<'a>(ctx: &Context<'a>) -> Option<&'a HeaderValue> {
    ctx.data_opt::<Authorization>().map(|auth| &auth.0)
}

pub(crate) fn resolver<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a ReferenceResolver> {
    ctx.data::<ReferenceResolver>()
}

/// Federation SDL of a subgraph, as handed to the composing router.
pub fn sdl(service: ServiceId) -> String {
    let options = SDLExportOptions::new().federation();
    match service {
        ServiceId::Users => users::schema_builder().finish().sdl_with_options(options),
        ServiceId::Listings => listings::schema_builder().finish().sdl_with_options(options),
        ServiceId::Messages => messages::schema_builder().finish().sdl_with_options(options),
    }
}

/// Single-entity proxy: non-2xx degrades to `None`.
pub(crate) async fn fetch_one<T: DeserializeOwned>(
    upstream: &dyn Upstream,
    request: &UpstreamRequest,
) -> Result<Option<T>> {
    match upstream.get(request).await? {
        Fetched::Body(Value::Null) => Ok(None),
        Fetched::Body(body) => serde_json::from_value(body).map(Some).map_err(|source| {
            UpstreamError::Decode {
                origin: request.display_path(),
                source,
            }
            .into()
        }),
        Fetched::Status(status) => {
            debug!(path = %request.display_path(), %status, "degrading to null");
            Ok(None)
        }
    }
}

/// List proxy: non-2xx degrades to an empty list.
pub(crate) async fn fetch_many<T: DeserializeOwned>(
    upstream: &dyn Upstream,
    request: &UpstreamRequest,
) -> Result<Vec<T>> {
    match upstream.get(request).await? {
        Fetched::Body(Value::Null) => Ok(Vec::new()),
        Fetched::Body(items @ Value::Array(_)) => {
            serde_json::from_value(items).map_err(|source| {
                UpstreamError::Decode {
                    origin: request.display_path(),
                    source,
                }
                .into()
            })
        }
        Fetched::Body(_) => Err(UpstreamError::UnexpectedShape {
            url: request.display_path(),
            expected: "array",
        }
        .into()),
        Fetched::Status(status) => {
            debug!(path = %request.display_path(), %status, "degrading to empty list");
            Ok(Vec::new())
        }
    }
}

pub(crate) async fn proxy_one<T: DeserializeOwned>(
    ctx: &Context<'_>,
    request: UpstreamRequest,
) -> async_graphql::Result<Option<T>> {
    fetch_one(resolver(ctx)?.upstream(), &request)
        .await
        .map_err(|e| {
            warn!(path = %request.display_path(), error = %e, "upstream call failed");
            e.extend()
        })
}

/// Lists are returned as `Some` even when empty; `null` only ever means the
/// upstream could not be reached.
pub(crate) async fn proxy_many<T: DeserializeOwned>(
    ctx: &Context<'_>,
    request: UpstreamRequest,
) -> async_graphql::Result<Option<Vec<T>>> {
    fetch_many(resolver(ctx)?.upstream(), &request)
        .await
        .map(Some)
        .map_err(|e| {
            warn!(path = %request.display_path(), error = %e, "upstream call failed");
            e.extend()
        })
}

/// `_entities` entry point shared by every subgraph.
pub(crate) async fn resolve_entity<T: DeserializeOwned>(
    ctx: &Context<'_>,
    typename: &str,
    id: &ID,
) -> async_graphql::Result<Option<T>> {
    let entity = resolver(ctx)?
        .resolve(typename, [("id", id.as_str())])
        .await
        .map_err(|e| {
            warn!(typename, id = %id.as_str(), error = %e, "reference resolution failed");
            e.extend()
        })?;

    entity
        .map(ResolvedEntity::into_model)
        .transpose()
        .map_err(|e| e.extend())
}

/// Key-only stand-in for an entity another subgraph owns.
pub(crate) fn reference_to<T: DeserializeOwned>(
    ctx: &Context<'_>,
    typename: &str,
    id: &ID,
) -> async_graphql::Result<T> {
    let reference = resolver(ctx)?
        .make_reference(typename, [("id", id.as_str())])
        .map_err(|e| e.extend())?;

    ResolvedEntity::stub(reference)
        .into_model()
        .map_err(|e| e.extend())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for ID {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => ID(text),
            RawId::Number(number) => ID(number.to_string()),
        }
    }
}

/// REST ids arrive as strings or integers.
pub(crate) fn id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ID, D::Error> {
    RawId::deserialize(deserializer).map(ID::from)
}

pub(crate) fn opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<ID>, D::Error> {
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(ID::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference_resolver::tests::FakeUpstream;
    use http::StatusCode;
    use serde_json::json;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Row {
        #[serde(deserialize_with = "id")]
        id: ID,
        #[serde(default, deserialize_with = "opt_id")]
        owner_id: Option<ID>,
    }

    #[test]
    fn ids_accept_numbers_and_strings() {
        let row: Row = serde_json::from_value(json!({ "id": 12, "owner_id": "7" })).unwrap();
        assert_eq!(
            row,
            Row {
                id: ID("12".to_string()),
                owner_id: Some(ID("7".to_string())),
            }
        );

        let row: Row = serde_json::from_value(json!({ "id": "a1" })).unwrap();
        assert_eq!(row.owner_id, None);
    }

    #[tokio::test]
    async fn fetch_many_degrades_status_to_empty() {
        let upstream = FakeUpstream::default();
        let request = UpstreamRequest::path(["api", "books", "search"]);
        let rows: Vec<Row> = fetch_many(&upstream, &request).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn fetch_one_degrades_status_to_none() {
        let upstream = FakeUpstream::default().with(
            "/api/users/1",
            Fetched::Status(StatusCode::UNAUTHORIZED),
        );
        let request = UpstreamRequest::path(["api", "users", "1"]);
        let row: Option<Row> = fetch_one(&upstream, &request).await.unwrap();
        assert_eq!(row, None);
    }

    #[tokio::test]
    async fn fetch_many_rejects_objects() {
        let upstream =
            FakeUpstream::default().with("/api/books", Fetched::Body(json!({ "id": 1 })));
        let request = UpstreamRequest::path(["api", "books"]);
        let result: Result<Vec<Row>> = fetch_many(&upstream, &request).await;
        assert!(result.is_err());
    }

    #[test]
    fn every_subgraph_agrees_with_registry() {
        let registry = crate::EntityRegistry::standard();
        for service in ServiceId::ALL {
            let entities = registry
                .verify_subgraph(service.name(), &sdl(service))
                .unwrap();
            assert!(!entities.is_empty(), "{service} publishes no entities");
        }
    }
}
