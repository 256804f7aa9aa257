use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::key::PoolKwargs;
use crate::retry::Retry;
use crate::util::redirect_location;

/// Where a pool sends its connections.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolAddress {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl PoolAddress {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl std::fmt::Display for PoolAddress {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.url())
    }
}

/// A single request handed to a [`ConnectionPool`].
///
/// `url` is origin-form (`/path?query`) for direct and tunneled requests and
/// absolute-form when a plaintext proxy forwards the request.
#[derive(Clone, Debug)]
pub struct PoolRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub retries: Retry,
    pub redirect: bool,
    pub assert_same_host: bool,
    pub extra: PoolKwargs,
}

pub trait PoolResponse: Send {
    fn status(&self) -> StatusCode;

    fn headers(&self) -> &HeaderMap;

    fn get_redirect_location(&self) -> Option<String> {
        redirect_location(self.status(), self.headers())
    }

    /// Reads and discards the rest of the body so the connection can be reused.
    fn drain_conn(&mut self) {}

    fn release_conn(&mut self) {}
}

pub type Response = Box<dyn PoolResponse>;

/// A connection pool bound to one scheme, host and port.
pub trait ConnectionPool: Send + Sync {
    fn address(&self) -> &PoolAddress;

    fn urlopen(&self, request: PoolRequest) -> crate::Result<Response>;

    fn close(&self);
}

pub trait PoolFactory: Send + Sync {
    fn new_pool(
        &self,
        address: &PoolAddress,
        kwargs: &PoolKwargs,
    ) -> crate::Result<Arc<dyn ConnectionPool>>;

    /// Whether pools from this factory can run TLS inside a TLS tunnel (HTTPS through an HTTPS proxy).
    fn supports_tls_in_tls(&self) -> bool {
        true
    }
}

impl<F> PoolFactory for F
where
    F: Fn(&PoolAddress, &PoolKwargs) -> crate::Result<Arc<dyn ConnectionPool>> + Send + Sync,
{
    fn new_pool(
        &self,
        address: &PoolAddress,
        kwargs: &PoolKwargs,
    ) -> crate::Result<Arc<dyn ConnectionPool>> {
        self(address, kwargs)
    }
}

/// A fully read response.
#[derive(Clone, Debug)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl BufferedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl PoolResponse for BufferedResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}
