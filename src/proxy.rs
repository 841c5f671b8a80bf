//! The thumbnailing reverse proxy.
//!
//! For every inbound request:
//!
//! ```text
//! Director ──► origin fetch ──► Pool::submit(thumbnail) ──► response
//!    │              │                    │
//!    ▼              ▼                    ▼
//!  override     OriginError     ThumbnailError / PoolError
//! ```
//!
//! The [`Director`] decides where the original lives and how to transform
//! it, or vetoes the request with a status of its own. Failures on every
//! stage become a [`ProxyError`], which knows its HTTP status.
//!
//! A processing-deadline overrun goes to the pool's [`FatalHandler`], which
//! by default aborts the process before any response is written.

use crate::imaging::{self, ImageBackend, Options, Thumbnail, ThumbnailError};
use crate::pool::{FatalHandler, JobLimits, Pool, PoolError};
use axum::Router;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

/// What the proxy should do with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Direction {
    /// Fetch `origin` and transform it with `options`.
    Fetch { origin: Url, options: Options },
    /// Answer with this status and touch nothing else.
    Respond(StatusCode),
}

/// Maps an inbound request to an origin and transform options.
///
/// Any `Fn(&Parts) -> Direction` closure is a director.
pub trait Director: Send + Sync + 'static {
    fn direct(&self, request: &Parts) -> Direction;
}

impl<F> Director for F
where
    F: Fn(&Parts) -> Direction + Send + Sync + 'static,
{
    fn direct(&self, request: &Parts) -> Direction {
        self(request)
    }
}

#[derive(Error, Debug)]
pub enum OriginError {
    #[error("Origin has no such image")]
    NotFound,
    #[error("Origin returned {0}")]
    Status(StatusCode),
    #[error("Origin fetch timed out")]
    Timeout,
    #[error("Origin fetch failed: {0}")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for OriginError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OriginError::Timeout
        } else {
            OriginError::Transport(err)
        }
    }
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Origin(OriginError::NotFound) => StatusCode::NOT_FOUND,
            ProxyError::Origin(OriginError::Status(s)) if s.is_client_error() => *s,
            ProxyError::Origin(OriginError::Status(_) | OriginError::Transport(_)) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Origin(OriginError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Thumbnail(ThumbnailError::UnknownFormat | ThumbnailError::TooSmall) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ProxyError::Thumbnail(ThumbnailError::TooBig) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Thumbnail(ThumbnailError::BadOption) => StatusCode::BAD_REQUEST,
            ProxyError::Thumbnail(ThumbnailError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Pool(PoolError::QueueTimeout | PoolError::Closed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = %status, "Request failed");
        } else {
            warn!(error = %self, status = %status, "Request rejected");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

/// Origin body plus the headers worth passing on.
struct Fetched {
    body: Bytes,
    cache_control: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
}

pub struct Proxy<B: ImageBackend + 'static> {
    director: Box<dyn Director>,
    pool: Pool,
    backend: Arc<B>,
    client: reqwest::Client,
    closed: AtomicBool,
}

impl<B: ImageBackend + 'static> Proxy<B> {
    /// `client` carries the origin fetch timeout and connection limits.
    pub fn new(director: impl Director, pool: Pool, backend: B, client: reqwest::Client) -> Self {
        Self {
            director: Box::new(director),
            pool,
            backend: Arc::new(backend),
            client,
            closed: AtomicBool::new(false),
        }
    }

    /// Install `handler` on the pool in place of [`abort_process`].
    ///
    /// [`abort_process`]: crate::pool::abort_process
    pub fn with_fatal_handler(mut self, handler: FatalHandler) -> Self {
        self.pool = self.pool.with_fatal_handler(handler);
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// An axum router that sends every path through this proxy.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(serve::<B>).with_state(self)
    }

    /// Handle one request end to end. Never fails: errors become responses.
    pub async fn handle(&self, request: Request) -> Response {
        match self.respond(request).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    }

    async fn respond(&self, request: Request) -> Result<Response, ProxyError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed.into());
        }
        let (parts, _body) = request.into_parts();

        let (origin, options) = match self.director.direct(&parts) {
            Direction::Fetch { origin, options } => (origin, options),
            Direction::Respond(status) => {
                info!(path = %parts.uri.path(), status = %status, "Director answered");
                return Ok(status.into_response());
            }
        };

        let started = Instant::now();
        let fetched = self.fetch(&origin).await?;
        let thumb = self.transform(fetched.body, options).await?;

        info!(
            origin = %origin,
            width = thumb.width,
            height = thumb.height,
            format = %thumb.format,
            bytes = thumb.bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Thumbnail served"
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(thumb.format.mime_type()),
        );
        if let Ok(etag) = HeaderValue::from_str(&etag(&thumb.bytes)) {
            headers.insert(header::ETAG, etag);
        }
        if let Some(value) = fetched.cache_control {
            headers.insert(header::CACHE_CONTROL, value);
        }
        if let Some(value) = fetched.last_modified {
            headers.insert(header::LAST_MODIFIED, value);
        }

        if parts.method == Method::HEAD {
            return Ok((StatusCode::OK, headers).into_response());
        }
        Ok((StatusCode::OK, headers, thumb.bytes).into_response())
    }

    async fn fetch(&self, origin: &Url) -> Result<Fetched, OriginError> {
        let response = self.client.get(origin.clone()).send().await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(OriginError::NotFound),
            status => return Err(OriginError::Status(status)),
        }

        let cache_control = response.headers().get(header::CACHE_CONTROL).cloned();
        let last_modified = response.headers().get(header::LAST_MODIFIED).cloned();
        let body = response.bytes().await?;

        Ok(Fetched {
            body,
            cache_control,
            last_modified,
        })
    }

    async fn transform(&self, blob: Bytes, options: Options) -> Result<Thumbnail, ProxyError> {
        let backend = Arc::clone(&self.backend);
        let limits = JobLimits::from(&options);
        let job = move || imaging::thumbnail(backend.as_ref(), &blob, &options);

        // An overrun has already been escalated by the pool.
        Ok(self.pool.submit(limits, job).await??)
    }

    /// Stop serving and drain the pool. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.shutdown().await;
        info!("Proxy closed");
    }
}

async fn serve<B: ImageBackend + 'static>(
    State(proxy): State<Arc<Proxy<B>>>,
    request: Request,
) -> Response {
    proxy.handle(request).await
}

/// Strong entity tag: quoted hex SHA-256 of the body.
fn etag(body: &[u8]) -> String {
    format!("\"{:x}\"", Sha256::digest(body))
}
