use async_graphql::ErrorExtensions;
use http::StatusCode;
use thiserror::Error;

/// Errors raised while talking to the upstream REST API.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream {url} is unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {url} answered with status {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to decode response from {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected response shape from {url}: expected {expected}")]
    UnexpectedShape { url: String, expected: &'static str },

    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown entity type `{0}`")]
    UnknownEntity(String),

    #[error("reference to `{typename}` is missing key field `{field}`")]
    InvalidKey { typename: String, field: String },

    #[error("subgraph {service} declares `{typename}` with key {found:?}, registry expects {expected:?}")]
    KeyMismatch {
        service: String,
        typename: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("subgraph {service} does not publish its entity `{typename}`")]
    MissingEntity { service: String, typename: String },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Stable code reported in `extensions.code` of GraphQL errors.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownEntity(_) => "UNKNOWN_ENTITY",
            Error::InvalidKey { .. } => "INVALID_KEY",
            Error::KeyMismatch { .. } => "KEY_MISMATCH",
            Error::MissingEntity { .. } => "MISSING_ENTITY",
            Error::Upstream(UpstreamError::Unreachable { .. }) => "UPSTREAM_UNREACHABLE",
            Error::Upstream(UpstreamError::Status { .. }) => "UPSTREAM_STATUS",
            Error::Upstream(UpstreamError::Decode { .. })
            | Error::Upstream(UpstreamError::UnexpectedShape { .. }) => "UPSTREAM_BAD_RESPONSE",
            Error::Upstream(UpstreamError::InvalidUrl(_)) | Error::Config(_) => "CONFIGURATION",
            Error::Io(_) | Error::Yaml(_) => "INTERNAL",
        }
    }
}

impl ErrorExtensions for Error {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| e.set("code", self.code()))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_error_carries_code() {
        let err = Error::InvalidKey {
            typename: "User".to_string(),
            field: "id".to_string(),
        };
        let gql = err.extend();
        assert_eq!(gql.message, "reference to `User` is missing key field `id`");
        let code = gql
            .extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .cloned();
        assert_eq!(code, Some(async_graphql::Value::from("INVALID_KEY")));
    }

    #[test]
    fn upstream_status_maps_to_its_own_code() {
        let err = Error::from(UpstreamError::Status {
            url: "http://upstream/api/users/1".to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        });
        assert_eq!(err.code(), "UPSTREAM_STATUS");
    }
}
