use async_graphql::http::GraphiQLSource;
use async_graphql::{ObjectType, Schema, SubscriptionType};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::subgraphs::Authorization;

type Body = BoxBody<Bytes, hyper::Error>;

fn full<T: Into<Bytes>>(value: T) -> Body {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

fn internal_server_error() -> Response<Body> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

fn forwarded_authorization<B>(req: &Request<B>) -> Option<Authorization> {
    req.headers().get(AUTHORIZATION).cloned().map(Authorization)
}

async fn execute<Q, M, S>(schema: &Schema<Q, M, S>, req: Request<Incoming>) -> Response<Body>
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    let authorization = forwarded_authorization(&req);

    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(error = %e, "failed to read request body");
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(full("Failed to read request body"))
                .unwrap_or_else(|_| internal_server_error());
        }
    };

    let mut request = match serde_json::from_slice::<async_graphql::Request>(&body) {
        Ok(request) => request,
        Err(e) => {
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .header("Access-Control-Allow-Origin", "*")
                .body(full(format!("Invalid JSON request: {}", e)))
                .unwrap_or_else(|_| internal_server_error());
        }
    };

    if let Some(authorization) = authorization {
        request = request.data(authorization);
    }

    let response = schema.execute(request).await;
    let json = match serde_json::to_vec(&response) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize graphql response");
            return internal_server_error();
        }
    };

    Response::builder()
        .header(CONTENT_TYPE, "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full(json))
        .unwrap_or_else(|_| internal_server_error())
}

pub async fn handle_request<Q, M, S>(
    req: Request<Incoming>,
    schema: Schema<Q, M, S>,
) -> Result<Response<Body>, Infallible>
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") | (&Method::POST, "/") => execute(&schema, req).await,

        (&Method::GET, "/graphiql") => Response::builder()
            .header(CONTENT_TYPE, "text/html")
            .body(full(GraphiQLSource::build().endpoint("/graphql").finish()))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/health") => Response::builder()
            .header(CONTENT_TYPE, "text/plain")
            .body(full("ok"))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header("Location", "/graphiql")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::OPTIONS, _) => Response::builder()
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Access-Control-Allow-Origin", "*")
            .body(full("Not Found"))
            .unwrap_or_else(|_| internal_server_error()),
    };

    Ok(response)
}

#[derive(Clone)]
struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

/// Serves `schema` on `listener` until `shutdown` completes.
///
/// Dropping a connection drops its in-flight GraphQL execution, and with it
/// every outbound upstream call that execution was waiting on.
pub async fn serve<Q, M, S>(
    listener: TcpListener,
    schema: Schema<Q, M, S>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()>
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    info!(addr = %listener.local_addr()?, "subgraph listening");
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => {
                info!("shutting down");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let schema = schema.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, schema.clone()));

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor)
                .serve_connection(io, service)
                .await
            {
                warn!(%peer, error = %e, "error processing connection");
            }
        });
    }
}
