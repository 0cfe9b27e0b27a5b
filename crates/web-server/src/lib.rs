use axum::{Router, extract::DefaultBodyLimit};
use serde::Deserialize;
use std::future::Future;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer, ExposeHeaders},
    trace::TraceLayer,
};

pub mod error;
pub mod handlers;

pub use error::{AppError, ServerError};

/// A set of routes registered onto the server's prefix group.
///
/// Controllers own their state; attach it with `Router::with_state` on the
/// sub-router before merging it into `group`.
pub trait HttpController: Send + Sync {
    fn apply_http(&self, group: Router) -> Router;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Path every controller route is mounted under, e.g. `/api`. Empty mounts
    /// at the root.
    #[serde(default)]
    pub prefix: String,
    /// Skip the startup log line.
    #[serde(default)]
    pub hide_banner: bool,
    /// Skip logging the bound address.
    #[serde(default)]
    pub hide_port: bool,
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
    /// Allow cross-origin requests from anywhere.
    #[serde(default = "default_cors")]
    pub cors: bool,
}

fn default_body_limit() -> usize {
    1024 * 1024 * 50
}

fn default_cors() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            hide_banner: false,
            hide_port: false,
            body_limit: default_body_limit(),
            cors: default_cors(),
        }
    }
}

impl ServerConfig {
    /// Returns the normalized prefix: no trailing slash, empty for the root.
    pub fn validate(&self) -> Result<String, ServerError> {
        if self.body_limit == 0 {
            return Err(ServerError::Config("body_limit must be positive".into()));
        }
        let prefix = self.prefix.trim().trim_end_matches('/');
        if prefix.is_empty() {
            return Ok(String::new());
        }
        if !prefix.starts_with('/') {
            return Err(ServerError::Config(format!(
                "prefix `{}` must start with `/`",
                self.prefix
            )));
        }
        if prefix.contains(['*', ':', '{', '}']) {
            return Err(ServerError::Config(format!(
                "prefix `{}` must be a literal path",
                self.prefix
            )));
        }
        Ok(prefix.to_owned())
    }
}

/// The HTTP server shell. It defines no endpoints of its own; controllers
/// register everything under the configured prefix.
pub struct HttpServer {
    config: ServerConfig,
    prefix: String,
    group: Router,
}

impl HttpServer {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let prefix = config.validate()?;
        Ok(Self {
            config,
            prefix,
            group: Router::new(),
        })
    }

    /// Lets each controller apply its routes to the prefix group, in order.
    pub fn with_controllers(mut self, controllers: &[&dyn HttpController]) -> Self {
        self.group = controllers
            .iter()
            .fold(self.group, |group, controller| controller.apply_http(group));
        self
    }

    /// Assembles the final router: the prefix group, a JSON 404 fallback and
    /// the CORS, trace and body-limit layers.
    pub fn into_router(self) -> Router {
        let mut app = if self.prefix.is_empty() {
            Router::new().merge(self.group)
        } else {
            Router::new().nest(&self.prefix, self.group)
        };
        app = app.fallback(handlers::not_found);

        if self.config.cors {
            let cors = CorsLayer::new()
                .allow_origin(AllowOrigin::any())
                .allow_methods(Any)
                .allow_headers(AllowHeaders::any())
                .expose_headers(ExposeHeaders::any());
            app = app.layer(cors);
        }

        // This middleware will automatically log information about every incoming request.
        app.layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(self.config.body_limit))
    }

    /// Binds `host:port` and serves until `shutdown` resolves.
    pub async fn start<F>(self, host: &str, port: u16, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let hide_banner = self.config.hide_banner;
        let hide_port = self.config.hide_port;
        let app = self.into_router();

        let addr = join_host_port(host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        if !hide_banner {
            tracing::info!("Web server started.");
        }
        if !hide_port {
            let bound = listener.local_addr().map_err(ServerError::Serve)?;
            tracing::info!("Web server listening on http://{}", bound);
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;

        tracing::info!("Web server stopped.");
        Ok(())
    }
}

/// Joins a host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
