use async_graphql::parser::parse_schema;
use async_graphql::parser::types::TypeSystemDefinition;
use async_graphql::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::ServiceId;

/// Upstream path template for the authoritative fetch of an entity,
/// e.g. `/api/users/{id}`. Placeholders name key fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route(String);

impl Route {
    pub fn new(template: impl Into<String>) -> Self {
        Route(template.into())
    }

    pub fn template(&self) -> &str {
        &self.0
    }

    /// Expands the template into raw (not yet percent-encoded) path segments.
    pub fn segments(&self, key: &BTreeMap<String, String>) -> Result<Vec<String>> {
        self.0
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                match segment
                    .strip_prefix('{')
                    .and_then(|rest| rest.strip_suffix('}'))
                {
                    Some(field) => key.get(field).cloned().ok_or_else(|| {
                        Error::Config(format!(
                            "route `{}` references `{field}` which is not a key field",
                            self.0
                        ))
                    }),
                    None => Ok(segment.to_string()),
                }
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub typename: String,
    pub key_fields: Vec<String>,
    pub owner: ServiceId,
    pub route: Option<Route>,
}

impl EntityDescriptor {
    pub fn new<I, S>(typename: &str, key_fields: I, owner: ServiceId) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EntityDescriptor {
            typename: typename.to_string(),
            key_fields: key_fields.into_iter().map(Into::into).collect(),
            owner,
            route: None,
        }
    }

    pub fn with_route(mut self, template: &str) -> Self {
        self.route = Some(Route::new(template));
        self
    }
}

/// Immutable table of the federated entity types. Built once at startup and
/// shared between resolvers behind an `Arc`.
#[derive(Clone, Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, EntityDescriptor>,
}

impl EntityRegistry {
    pub fn new(descriptors: impl IntoIterator<Item = EntityDescriptor>) -> Self {
        EntityRegistry {
            entities: descriptors
                .into_iter()
                .map(|descriptor| (descriptor.typename.clone(), descriptor))
                .collect(),
        }
    }

    /// The marketplace entities and where they live.
    pub fn standard() -> Self {
        EntityRegistry::new([
            EntityDescriptor::new("User", ["id"], ServiceId::Users).with_route("/api/users/{id}"),
            EntityDescriptor::new("Listing", ["id"], ServiceId::Listings)
                .with_route("/api/books/{id}"),
            // The messages API has no single-message endpoint.
            EntityDescriptor::new("Message", ["id"], ServiceId::Messages),
        ])
    }

    pub fn lookup(&self, typename: &str) -> Result<&EntityDescriptor> {
        self.entities
            .get(typename)
            .ok_or_else(|| Error::UnknownEntity(typename.to_string()))
    }

    pub fn typenames(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Checks that every `@key` a subgraph publishes matches the registry, and
    /// that a known subgraph publishes every entity it owns.
    /// Returns the entity types found in the SDL.
    pub fn verify_subgraph(&self, service: &str, sdl: &str) -> Result<Vec<String>> {
        let declared = entity_keys_from_sdl(sdl)?;

        for (typename, keys) in &declared {
            let descriptor = self.lookup(typename)?;
            let mut expected = descriptor.key_fields.clone();
            expected.sort();

            for found in keys {
                let mut found_sorted = found.clone();
                found_sorted.sort();

                if expected != found_sorted {
                    return Err(Error::KeyMismatch {
                        service: service.to_string(),
                        typename: typename.clone(),
                        expected,
                        found: found.clone(),
                    });
                }
            }
        }

        if let Some(owner) = ServiceId::from_name(service) {
            let mut owned: Vec<&EntityDescriptor> = self
                .entities
                .values()
                .filter(|descriptor| descriptor.owner == owner)
                .collect();
            owned.sort_by(|a, b| a.typename.cmp(&b.typename));

            if let Some(missing) = owned.iter().find(|descriptor| !declared.contains_key(&descriptor.typename)) {
                return Err(Error::MissingEntity {
                    service: service.to_string(),
                    typename: missing.typename.clone(),
                });
            }
        }

        Ok(declared.into_keys().collect())
    }
}

/// Extracts `type -> keys` from the `@key` directives of a federation SDL. A
/// type may carry several `@key`s; each one is kept in declaration order.
/// `extend schema @link(...)` blocks only carry imports and are skipped.
pub fn entity_keys_from_sdl(sdl: &str) -> Result<BTreeMap<String, Vec<Vec<String>>>> {
    let types_only = sdl
        .split("\n\n")
        .filter(|chunk| !chunk.trim_start().starts_with("extend schema"))
        .collect::<Vec<_>>()
        .join("\n\n");

    let document = parse_schema(types_only)
        .map_err(|e| Error::Config(format!("failed to parse subgraph SDL: {e}")))?;

    let mut keys = BTreeMap::new();

    for definition in &document.definitions {
        let TypeSystemDefinition::Type(typedef) = definition else {
            continue;
        };
        let typedef = &typedef.node;

        for directive in &typedef.directives {
            if directive.node.name.node.as_str() != "key" {
                continue;
            }

            let fields = directive
                .node
                .get_argument("fields")
                .and_then(|value| match &value.node {
                    Value::String(fields) => Some(fields.clone()),
                    _ => None,
                })
                .ok_or_else(|| {
                    Error::Config(format!("@key on `{}` has no fields", typedef.name.node))
                })?;

            keys.entry(typedef.name.node.to_string())
                .or_insert_with(Vec::new)
                .push(fields.split_whitespace().map(str::to_string).collect());
        }
    }

    Ok(keys)
}
