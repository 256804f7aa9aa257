//! `poolroute` is the request-routing core of a blocking HTTP client: it picks
//! the connection pool for every outgoing request, bounds how many pools stay
//! open, follows redirects within a retry budget, and routes through an
//! upstream proxy by tunneling or forwarding.
//!
//! Connection pools themselves are supplied by the caller through
//! [`PoolFactory`] and [`ConnectionPool`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use poolroute::prelude::{
//!     ConnectionPool, PoolAddress, PoolKwargs, PoolManager, PoolResponse, RequestOptions, Retry,
//!     SchemeRegistry,
//! };
//!
//! fn connect(
//!     address: &PoolAddress,
//!     kwargs: &PoolKwargs,
//! ) -> poolroute::Result<Arc<dyn ConnectionPool>> {
//!     // hand back the transport's pool for `address`
//!     # let _ = (address, kwargs);
//!     # unimplemented!()
//! }
//!
//! fn main() -> poolroute::Result<()> {
//!     let manager = PoolManager::builder(SchemeRegistry::http(Arc::new(connect)))
//!         .num_pools(16)
//!         .retries(Retry::new(3).redirect(Some(5)))
//!         .try_header("user-agent", "my-sdk/1.0")?
//!         .build();
//!
//!     let response = manager.urlopen(
//!         http::Method::GET,
//!         "https://api.example.com/v1/items",
//!         RequestOptions::new(),
//!     )?;
//!     println!("status={}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! # Pool keys
//!
//! Two requests share a pool exactly when their [`PoolKey`]s are equal. Keys
//! are built per scheme by a [`KeyNormalizer`] over a declared [`KeySchema`],
//! so a transport can add its own options to the key without touching the
//! manager.

mod cache;
mod config;
mod error;
mod key;
mod manager;
mod metrics;
mod pool;
mod proxy;
mod registry;
mod request;
mod retry;
mod util;

pub use crate::cache::{DEFAULT_NUM_POOLS, PoolCache};
pub use crate::config::{PoolManagerConfig, ProxySettings};
pub use crate::error::{BoxError, Error, ErrorCode, RetryCause};
pub use crate::key::{
    DEFAULT_BLOCKSIZE, DefaultKeyNormalizer, KeyField, KeyNormalizer, KeySchema,
    PROXY_CONFIG_OPTION, PROXY_HEADERS_OPTION, PROXY_OPTION, PoolKey, PoolKwargs,
    PoolKwargsOverride, PoolOption, RequestContext, TLS_KEYWORDS,
};
pub use crate::manager::{
    ClearPools, PoolManager, PoolManagerBuilder, PoolScope, RequestOptions,
};
pub use crate::metrics::PoolManagerMetricsSnapshot;
pub use crate::pool::{
    BufferedResponse, ConnectionPool, PoolAddress, PoolFactory, PoolRequest, PoolResponse,
    Response,
};
pub use crate::proxy::{
    ProxyConfig, ProxyManager, ProxyManagerBuilder, StandardTunnelPolicy, TlsContext,
    TunnelPolicy,
};
pub use crate::registry::{FALLBACK_PORT, KeyRegistration, SchemeRegistry};
pub use crate::request::RequestMethods;
pub use crate::retry::{RequestHistory, Retry, RetryKind};
pub use crate::util::{UrlParts, parse_url};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        BufferedResponse, ConnectionPool, Error, ErrorCode, KeySchema, PoolAddress, PoolFactory,
        PoolKey, PoolKwargs, PoolManager, PoolManagerConfig, PoolManagerMetricsSnapshot,
        PoolOption, PoolRequest, PoolResponse, ProxyManager, RequestMethods, RequestOptions,
        Response, Result, Retry, SchemeRegistry,
    };
}

#[cfg(test)]
mod tests;
