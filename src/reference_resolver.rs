use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::entity_registry::EntityRegistry;
use crate::error::{Error, Result, UpstreamError};
use crate::upstream::{Fetched, Upstream, UpstreamRequest};
use crate::ServiceId;

/// A partial entity: type name plus key values, nothing else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub typename: String,
    pub key: BTreeMap<String, String>,
}

impl Reference {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.key.get(field).map(String::as_str)
    }
}

/// A reference filled in with every field its resolver could produce.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedEntity {
    pub reference: Reference,
    pub fields: Map<String, Value>,
    /// `false` for stubs built by a service that does not own the type.
    pub authoritative: bool,
}

impl ResolvedEntity {
    /// Entity carrying only its key, as a non-owning service knows it.
    pub fn stub(reference: Reference) -> Self {
        let fields = reference
            .key
            .iter()
            .map(|(field, value)| (field.clone(), Value::String(value.clone())))
            .collect();

        ResolvedEntity {
            reference,
            fields,
            authoritative: false,
        }
    }

    pub fn into_model<T: DeserializeOwned>(self) -> Result<T> {
        let typename = self.reference.typename;
        serde_json::from_value(Value::Object(self.fields)).map_err(|source| {
            Error::Upstream(UpstreamError::Decode {
                origin: format!("entity `{typename}`"),
                source,
            })
        })
    }
}

/// Builds and resolves entity references on behalf of one subgraph.
#[derive(Clone)]
pub struct ReferenceResolver {
    registry: Arc<EntityRegistry>,
    service: ServiceId,
    upstream: Arc<dyn Upstream>,
}

impl ReferenceResolver {
    pub fn new(registry: Arc<EntityRegistry>, service: ServiceId, upstream: Arc<dyn Upstream>) -> Self {
        ReferenceResolver {
            registry,
            service,
            upstream,
        }
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn upstream(&self) -> &dyn Upstream {
        self.upstream.as_ref()
    }

    /// Builds a key-only reference. Every declared key field must be present
    /// and non-empty; values for other fields are dropped.
    pub fn make_reference<I, K, V>(&self, typename: &str, key_values: I) -> Result<Reference>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let descriptor = self.registry.lookup(typename)?;
        let mut supplied: BTreeMap<String, String> = key_values
            .into_iter()
            .map(|(field, value)| (field.into(), value.into()))
            .collect();

        let mut key = BTreeMap::new();
        for field in &descriptor.key_fields {
            match supplied.remove(field) {
                Some(value) if !value.is_empty() => {
                    key.insert(field.clone(), value);
                }
                _ => {
                    return Err(Error::InvalidKey {
                        typename: typename.to_string(),
                        field: field.clone(),
                    });
                }
            }
        }

        Ok(Reference {
            typename: descriptor.typename.clone(),
            key,
        })
    }

    /// Fills in a reference. Non-owned types resolve to a stub without I/O;
    /// owned types take one upstream fetch. `Ok(None)` means the entity does
    /// not exist upstream.
    #[instrument(skip(self), fields(service = %self.service, typename = %reference.typename))]
    pub async fn resolve_reference(&self, reference: &Reference) -> Result<Option<ResolvedEntity>> {
        let descriptor = self.registry.lookup(&reference.typename)?;

        if descriptor.owner != self.service {
            return Ok(Some(ResolvedEntity::stub(reference.clone())));
        }

        let Some(route) = &descriptor.route else {
            debug!("no authoritative route, reference resolves to null");
            return Ok(None);
        };

        let request = UpstreamRequest::path(route.segments(&reference.key)?);

        match self.upstream.get(&request).await? {
            Fetched::Body(Value::Object(mut fields)) => {
                for (field, value) in &reference.key {
                    fields
                        .entry(field.clone())
                        .or_insert_with(|| Value::String(value.clone()));
                }

                Ok(Some(ResolvedEntity {
                    reference: reference.clone(),
                    fields,
                    authoritative: true,
                }))
            }
            Fetched::Body(Value::Null) => Ok(None),
            Fetched::Body(_) => Err(UpstreamError::UnexpectedShape {
                url: request.display_path(),
                expected: "object",
            }
            .into()),
            Fetched::Status(status)
                if status == http::StatusCode::NOT_FOUND || status == http::StatusCode::GONE =>
            {
                debug!(%status, "entity absent upstream");
                Ok(None)
            }
            Fetched::Status(status) => Err(UpstreamError::Status {
                url: request.display_path(),
                status,
            }
            .into()),
        }
    }

    /// `make_reference` followed by `resolve_reference`.
    pub async fn resolve<I, K, V>(&self, typename: &str, key_values: I) -> Result<Option<ResolvedEntity>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let reference = self.make_reference(typename, key_values)?;
        self.resolve_reference(&reference).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::StatusCode;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned answers keyed by request path; unknown paths are 404.
    #[derive(Default)]
    pub(crate) struct FakeUpstream {
        answers: HashMap<String, Fetched>,
        pub(crate) calls: Mutex<Vec<UpstreamRequest>>,
    }

    impl FakeUpstream {
        pub(crate) fn with(mut self, path: &str, answer: Fetched) -> Self {
            self.answers.insert(path.to_string(), answer);
            self
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        async fn get(&self, request: &UpstreamRequest) -> std::result::Result<Fetched, UpstreamError> {
            self.calls.lock().unwrap().push(request.clone());
            Ok(self
                .answers
                .get(&request.display_path())
                .cloned()
                .unwrap_or(Fetched::Status(StatusCode::NOT_FOUND)))
        }
    }

    fn resolver(service: ServiceId, upstream: Arc<FakeUpstream>) -> ReferenceResolver {
        ReferenceResolver::new(Arc::new(EntityRegistry::standard()), service, upstream)
    }

    #[test]
    fn make_reference_keeps_only_key_fields() {
        let resolver = resolver(ServiceId::Listings, Arc::default());
        let reference = resolver
            .make_reference("User", [("id", "7"), ("name", "Ada")])
            .unwrap();

        assert_eq!(reference.typename, "User");
        assert_eq!(reference.get("id"), Some("7"));
        assert_eq!(reference.get("name"), None);
    }

    #[test]
    fn make_reference_without_key_fails_for_every_type() {
        let resolver = resolver(ServiceId::Users, Arc::default());
        let typenames: Vec<String> = resolver.registry().typenames().map(str::to_string).collect();
        assert_eq!(typenames.len(), 3);

        for typename in typenames {
            let empty: [(&str, &str); 0] = [];
            assert!(matches!(
                resolver.make_reference(&typename, empty),
                Err(Error::InvalidKey { field, .. }) if field == "id"
            ));
            assert!(matches!(
                resolver.make_reference(&typename, [("id", "")]),
                Err(Error::InvalidKey { .. })
            ));
        }
    }

    #[test]
    fn make_reference_for_unknown_type_fails() {
        let resolver = resolver(ServiceId::Users, Arc::default());
        assert!(matches!(
            resolver.make_reference("Review", [("id", "1")]),
            Err(Error::UnknownEntity(_))
        ));
    }

    #[tokio::test]
    async fn owner_fetches_authoritative_entity() {
        let upstream = Arc::new(FakeUpstream::default().with(
            "/api/users/7",
            Fetched::Body(json!({ "id": 7, "name": "Ada", "email": "ada@example.com" })),
        ));
        let resolver = resolver(ServiceId::Users, upstream.clone());

        let entity = resolver.resolve("User", [("id", "7")]).await.unwrap().unwrap();

        assert!(entity.authoritative);
        assert_eq!(entity.fields["name"], json!("Ada"));
        assert_eq!(entity.fields["id"], json!(7));
        assert_eq!(upstream.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_entity_resolves_to_none() {
        let upstream = Arc::new(FakeUpstream::default());
        let resolver = resolver(ServiceId::Listings, upstream.clone());

        let entity = resolver.resolve("Listing", [("id", "404")]).await.unwrap();
        assert_eq!(entity, None);
        assert_eq!(upstream.call_count(), 1);
    }

    #[tokio::test]
    async fn server_error_is_not_treated_as_absent() {
        let upstream = Arc::new(FakeUpstream::default().with(
            "/api/books/9",
            Fetched::Status(StatusCode::INTERNAL_SERVER_ERROR),
        ));
        let resolver = resolver(ServiceId::Listings, upstream);

        let err = resolver.resolve("Listing", [("id", "9")]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Upstream(UpstreamError::Status { status, .. }) if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn non_owner_returns_stub_without_fetching() {
        let upstream = Arc::new(FakeUpstream::default());
        let resolver = resolver(ServiceId::Messages, upstream.clone());

        let entity = resolver.resolve("User", [("id", "7")]).await.unwrap().unwrap();

        assert!(!entity.authoritative);
        assert_eq!(entity.fields, json!({ "id": "7" }).as_object().cloned().unwrap());
        assert_eq!(upstream.call_count(), 0);
    }

    #[tokio::test]
    async fn owned_entity_without_route_is_absent() {
        let upstream = Arc::new(FakeUpstream::default());
        let resolver = resolver(ServiceId::Messages, upstream.clone());

        let entity = resolver.resolve("Message", [("id", "1")]).await.unwrap();
        assert_eq!(entity, None);
        assert_eq!(upstream.call_count(), 0);
    }

    #[tokio::test]
    async fn key_is_filled_in_when_body_omits_it() {
        let upstream = Arc::new(
            FakeUpstream::default().with("/api/books/3", Fetched::Body(json!({ "title": "Dune" }))),
        );
        let resolver = resolver(ServiceId::Listings, upstream);

        let entity = resolver.resolve("Listing", [("id", "3")]).await.unwrap().unwrap();
        assert_eq!(entity.fields["id"], json!("3"));
        assert_eq!(entity.fields["title"], json!("Dune"));
    }

    #[tokio::test]
    async fn array_body_is_rejected() {
        let upstream =
            Arc::new(FakeUpstream::default().with("/api/users/1", Fetched::Body(json!([]))));
        let resolver = resolver(ServiceId::Users, upstream);

        assert!(matches!(
            resolver.resolve("User", [("id", "1")]).await,
            Err(Error::Upstream(UpstreamError::UnexpectedShape { .. }))
        ));
    }
}
