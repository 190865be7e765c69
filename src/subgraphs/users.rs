use async_graphql::{Context, EmptyMutation, EmptySubscription, ID, Object, Result, Schema, SchemaBuilder, SimpleObject};
use serde::Deserialize;

use super::{authorization, proxy_one, resolve_entity};
use crate::reference_resolver::ReferenceResolver;
use crate::upstream::UpstreamRequest;

pub type UsersSchema = Schema<Query, EmptyMutation, EmptySubscription>;

/// A marketplace member. Owned by this subgraph.
#[derive(SimpleObject, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(deserialize_with = "super::id")]
    pub id: ID,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: Option<String>,
}

pub struct Query;

#[Object]
impl Query {
    /// A user by id, or `null` when the API does not know it.
    async fn get_user(&self, ctx: &Context<'_>, id: ID) -> Result<Option<User>> {
        proxy_one(ctx, UpstreamRequest::path(["api", "users", id.as_str()])).await
    }

    /// The user the forwarded `Authorization` header belongs to.
    async fn current_user(&self, ctx: &Context<'_>) -> Result<Option<User>> {
        let request = UpstreamRequest::path(["api", "auth", "user"]).authorization(authorization(ctx));
        proxy_one(ctx, request).await
    }

    #[graphql(entity)]
    async fn find_user_by_id(&self, ctx: &Context<'_>, id: ID) -> Result<Option<User>> {
        resolve_entity(ctx, "User", &id).await
    }
}

pub fn schema_builder() -> SchemaBuilder<Query, EmptyMutation, EmptySubscription> {
    Schema::build(Query, EmptyMutation, EmptySubscription).enable_federation()
}

pub fn schema(resolver: ReferenceResolver) -> UsersSchema {
    schema_builder().data(resolver).finish()
}
