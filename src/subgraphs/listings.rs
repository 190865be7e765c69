use async_graphql::{
    ComplexObject, Context, EmptyMutation, EmptySubscription, ErrorExtensions, ID, InputObject, Object, Result,
    Schema, SchemaBuilder, SimpleObject,
};
use serde::{Deserialize, Serialize};

use super::{authorization, proxy_many, proxy_one, reference_to, resolve_entity};
use crate::reference_resolver::ReferenceResolver;
use crate::upstream::UpstreamRequest;

pub type ListingsSchema = Schema<Query, EmptyMutation, EmptySubscription>;

/// A book offered on the marketplace. Owned by this subgraph and served
/// from the API's `/api/books` collection.
#[derive(SimpleObject, Deserialize, Clone, Debug, PartialEq)]
#[graphql(complex)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(deserialize_with = "super::id")]
    pub id: ID,
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub condition: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "super::opt_id")]
    pub owner_id: Option<ID>,
    pub created_at: Option<String>,
}

#[ComplexObject]
impl Listing {
    /// The user offering this listing. Only the key is known here; the
    /// users subgraph fills in the rest.
    async fn seller(&self, ctx: &Context<'_>) -> Result<Option<Seller>> {
        match &self.owner_id {
            Some(owner_id) => reference_to(ctx, "User", owner_id).map(Some),
            None => Ok(None),
        }
    }
}

/// `User` as this subgraph sees it: the key plus the listings it owns.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Seller {
    #[serde(deserialize_with = "super::id")]
    pub id: ID,
}

#[Object(name = "User")]
impl Seller {
    async fn id(&self) -> &ID {
        &self.id
    }

    /// Everything this user has listed.
    async fn listings(&self, ctx: &Context<'_>) -> Result<Option<Vec<Listing>>> {
        let request = UpstreamRequest::path(["api", "books"]).query_pair("ownerId", self.id.as_str());
        proxy_many(ctx, request).await
    }
}

/// Optional narrowing for `searchListings`, sent as query-string pairs.
#[derive(InputObject, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListingFilter {
    pub category: Option<String>,
    pub condition: Option<String>,
    pub author: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

pub struct Query;

#[Object]
impl Query {
    async fn get_listing(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Listing>> {
        proxy_one(ctx, UpstreamRequest::path(["api", "books", id.as_str()])).await
    }

    /// Full-text search. Returns an empty list when nothing matches.
    async fn search_listings(
        &self,
        ctx: &Context<'_>,
        query: Option<String>,
        filter: Option<ListingFilter>,
    ) -> Result<Option<Vec<Listing>>> {
        let mut request = UpstreamRequest::path(["api", "books", "search"]);
        if let Some(query) = query {
            request = request.query_pair("query", query);
        }
        if let Some(filter) = &filter {
            request = request
                .query_object(filter)
                .map_err(|e| crate::Error::from(e).extend())?;
        }
        proxy_many(ctx, request).await
    }

    async fn recent_listings(&self, ctx: &Context<'_>, limit: Option<i32>) -> Result<Option<Vec<Listing>>> {
        let mut request = UpstreamRequest::path(["api", "books"]);
        if let Some(limit) = limit {
            request = request.query_pair("limit", limit);
        }
        proxy_many(ctx, request).await
    }

    /// Listings of the caller identified by the forwarded `Authorization` header.
    async fn my_listings(&self, ctx: &Context<'_>) -> Result<Option<Vec<Listing>>> {
        let request =
            UpstreamRequest::path(["api", "books", "my-listings"]).authorization(authorization(ctx));
        proxy_many(ctx, request).await
    }

    #[graphql(entity)]
    async fn find_listing_by_id(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Listing>> {
        resolve_entity(ctx, "Listing", &id).await
    }

    #[graphql(entity)]
    async fn find_user_by_id(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Seller>> {
        resolve_entity(ctx, "User", &id).await
    }
}

pub fn schema_builder() -> SchemaBuilder<Query, EmptyMutation, EmptySubscription> {
    Schema::build(Query, EmptyMutation, EmptySubscription).enable_federation()
}

pub fn schema(resolver: ReferenceResolver) -> ListingsSchema {
    schema_builder().data(resolver).finish()
}
