use async_graphql::{
    ComplexObject, Context, EmptyMutation, EmptySubscription, ID, Object, Result, Schema, SchemaBuilder,
    SimpleObject,
};
use serde::Deserialize;

use super::{proxy_many, reference_to, resolve_entity};
use crate::reference_resolver::ReferenceResolver;
use crate::upstream::UpstreamRequest;

pub type MessagesSchema = Schema<Query, EmptyMutation, EmptySubscription>;

#[derive(SimpleObject, Deserialize, Clone, Debug, PartialEq)]
#[graphql(complex)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(deserialize_with = "super::id")]
    pub id: ID,
    #[serde(default, deserialize_with = "super::opt_id")]
    pub sender_id: Option<ID>,
    #[serde(default, deserialize_with = "super::opt_id")]
    pub receiver_id: Option<ID>,
    #[serde(default, deserialize_with = "super::opt_id")]
    pub listing_id: Option<ID>,
    pub content: Option<String>,
    pub read: Option<bool>,
    pub created_at: Option<String>,
}

#[ComplexObject]
impl Message {
    async fn sender(&self, ctx: &Context<'_>) -> Result<Option<UserRef>> {
        self.sender_id
            .as_ref()
            .map(|id| reference_to(ctx, "User", id))
            .transpose()
    }

    async fn receiver(&self, ctx: &Context<'_>) -> Result<Option<UserRef>> {
        self.receiver_id
            .as_ref()
            .map(|id| reference_to(ctx, "User", id))
            .transpose()
    }

    /// The listing the conversation is about, if any.
    async fn listing(&self, ctx: &Context<'_>) -> Result<Option<ListingRef>> {
        self.listing_id
            .as_ref()
            .map(|id| reference_to(ctx, "Listing", id))
            .transpose()
    }
}

#[derive(SimpleObject, Deserialize, Clone, Debug, PartialEq)]
#[graphql(name = "User")]
pub struct UserRef {
    #[serde(deserialize_with = "super::id")]
    pub id: ID,
}

#[derive(SimpleObject, Deserialize, Clone, Debug, PartialEq)]
#[graphql(name = "Listing")]
pub struct ListingRef {
    #[serde(deserialize_with = "super::id")]
    pub id: ID,
}

pub struct Query;

#[Object]
impl Query {
    async fn get_received_messages(&self, ctx: &Context<'_>, user_id: ID) -> Result<Option<Vec<Message>>> {
        let request = UpstreamRequest::path(["api", "messages", "received", user_id.as_str()]);
        proxy_many(ctx, request).await
    }

    async fn get_messages_between(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "userId1")] user_id_1: ID,
        #[graphql(name = "userId2")] user_id_2: ID,
    ) -> Result<Option<Vec<Message>>> {
        let request = UpstreamRequest::path([
            "api",
            "messages",
            "between",
            user_id_1.as_str(),
            user_id_2.as_str(),
        ]);
        proxy_many(ctx, request).await
    }

    /// Messages have no single-message endpoint upstream, so references to
    /// them resolve to `null`.
    #[graphql(entity)]
    async fn find_message_by_id(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Message>> {
        resolve_entity(ctx, "Message", &id).await
    }

    #[graphql(entity)]
    async fn find_user_by_id(&self, ctx: &Context<'_>, id: ID) -> Result<Option<UserRef>> {
        resolve_entity(ctx, "User", &id).await
    }

    #[graphql(entity)]
    async fn find_listing_by_id(&self, ctx: &Context<'_>, id: ID) -> Result<Option<ListingRef>> {
        resolve_entity(ctx, "Listing", &id).await
    }
}

pub fn schema_builder() -> SchemaBuilder<Query, EmptyMutation, EmptySubscription> {
    Schema::build(Query, EmptyMutation, EmptySubscription).enable_federation()
}

pub fn schema(resolver: ReferenceResolver) -> MessagesSchema {
    schema_builder().data(resolver).finish()
}
