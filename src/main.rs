use netfed::batch::{API_KEY_HEADER, API_TOKEN_HEADER, BatchKind, BatchService, Credentials, InMemoryObjectStore};
use netfed::config::{Args, DEFAULT_CONFIG, DEFAULT_CONFIG_DIR, NetworkConfig};
use netfed::query_executor::ConcurrentQueryExecutor;
use netfed::{
    ExecutionContext, FederationError, FederationGateway, GraphQLRequest, HttpResolver, InMemorySchemaRegistry,
    SimpleQueryPlanner,
};

use clap::Parser;
use serde_json::json;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

type Body = BoxBody<Bytes, hyper::Error>;

struct AppState {
    gateway: FederationGateway,
    batches: BatchService,
}

fn full<T: Into<Bytes>>(value: T) -> Body {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

const GRAPHIQL_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>GraphiQL - netfed</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #graphiql { height: 100vh; }
  </style>
</head>
<body>
  <div id="graphiql"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    function graphQLFetcher(graphQLParams) {
      return fetch('/v1/graphql', {
        method: 'post',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('graphiql')
    );
  </script>
</body>
</html>
"#;

async fn handle_request(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(%method, %path, "request");

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/v1/graphql" | "/graphql") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => return Ok(text_response(StatusCode::BAD_REQUEST, "Failed to read request body")),
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(graphql_req) => {
                    match state.gateway.process_request(graphql_req).await {
                        Ok(tree) => json_response(StatusCode::OK, &tree.into_value()),
                        Err(e) => {
                            let status = match &e {
                                FederationError::Query(_) => StatusCode::OK,
                                FederationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                                FederationError::Registry(_) => StatusCode::SERVICE_UNAVAILABLE,
                            };
                            warn!(error = %e, "query failed");
                            json_response(status, &json!({ "data": null, "errors": [{ "message": e.to_string() }] }))
                        }
                    }
                }
                Err(e) => text_response(StatusCode::BAD_REQUEST, format!("Invalid JSON request: {}", e)),
            }
        }

        (&Method::POST, "/v1/batching/actions" | "/v1/batching/things") => {
            let kind = if path.ends_with("actions") {
                BatchKind::Actions
            } else {
                BatchKind::Things
            };
            let key = header_value(&req, API_KEY_HEADER);
            let token = header_value(&req, API_TOKEN_HEADER);
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => return Ok(text_response(StatusCode::BAD_REQUEST, "Failed to read request body")),
            };

            let credentials = key
                .as_deref()
                .zip(token.as_deref())
                .map(|(key, token)| Credentials { key, token });
            let outcome = state.batches.create(kind, credentials, &body_bytes).await;
            json_response(outcome.status_code(), &outcome.body())
        }

        (&Method::GET, "/graphiql") => Response::builder()
            .header("Content-Type", "text/html")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(GRAPHIQL_HTML))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header("Location", "/graphiql")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::OPTIONS, _) => Response::builder()
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                format!("Content-Type, Authorization, {}, {}", API_KEY_HEADER, API_TOKEN_HEADER),
            )
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<Body> {
    let json = serde_json::to_string(value).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full(json))
        .unwrap_or_else(|_| internal_server_error())
}

fn text_response(status: StatusCode, message: impl Into<Bytes>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Access-Control-Allow-Origin", "*")
        .body(full(message))
        .unwrap_or_else(|_| internal_server_error())
}

fn internal_server_error() -> Response<Body> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

fn header_value(req: &Request<Incoming>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[derive(Clone)]
struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

fn load_config(args: &Args) -> Result<(NetworkConfig, PathBuf), netfed::ConfigError> {
    match &args.config {
        Some(path) => {
            let config = NetworkConfig::load(path)?;
            let base_dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
            Ok((config, base_dir))
        }
        None => {
            let config = NetworkConfig::from_yaml(DEFAULT_CONFIG, Path::new("network.yaml"))?;
            Ok((config, PathBuf::from(DEFAULT_CONFIG_DIR)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let (mut config, base_dir) = load_config(&args)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    let addr = config.listen_addr()?;

    let registry = Arc::new(InMemorySchemaRegistry::new());
    let (peers, load_errors) = config.load_peers(&base_dir);
    let registry_errors = registry.replace_all(peers).await;
    if !load_errors.is_empty() || !registry_errors.is_empty() {
        warn!(
            unreadable = load_errors.len(),
            malformed = registry_errors.len(),
            "some peers were excluded"
        );
    }

    let resolver = Arc::new(HttpResolver::new(registry.clone(), config.peer_timeout()));
    let gateway = FederationGateway::new(
        registry,
        Arc::new(SimpleQueryPlanner::new()),
        Arc::new(ConcurrentQueryExecutor::new(config.query_timeout())),
        ExecutionContext::new(resolver),
        config.aggregations.clone(),
    );
    let batches = BatchService::new(
        config.load_local_schema(&base_dir)?,
        config.api_keys.clone(),
        Arc::new(InMemoryObjectStore::new()),
    );
    let state = Arc::new(AppState { gateway, batches });

    let listener = TcpListener::bind(addr).await?;
    info!("netfed listening on http://{}", addr);
    info!("GraphiQL UI available at http://{}/graphiql", addr);

    loop {
        let (stream, remote) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));

            match hyper_util::server::conn::auto::Builder::new(TokioExecutor)
                .serve_connection(io, service)
                .await
            {
                Ok(_) => debug!(%remote, "connection closed"),
                Err(e) => error!(%remote, error = %e, "error processing connection"),
            }
        });
    }
}
