use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, info, info_span, warn};

use crate::cache::{DEFAULT_NUM_POOLS, PoolCache};
use crate::error::Error;
use crate::key::{PoolKey, PoolKwargs, PoolKwargsOverride, PoolOption, RequestContext};
use crate::metrics::{PoolManagerMetrics, PoolManagerMetricsSnapshot};
use crate::pool::{ConnectionPool, PoolAddress, PoolRequest, Response};
use crate::registry::SchemeRegistry;
use crate::request::RequestMethods;
use crate::retry::{RequestHistory, Retry, RetryKind};
use crate::util::{
    UrlParts, join_redirect_location, parse_header_name, parse_header_value, parse_url,
    prepare_headers_for_method_change, redact_url_for_logs,
};

/// Per-call options for [`PoolManager::urlopen`].
///
/// `headers: None` means "use the manager's default headers". `extra` is
/// passed through to the pool untouched.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    pub headers: Option<HeaderMap>,
    pub body: Option<Bytes>,
    pub retries: Option<Retry>,
    pub redirect: bool,
    pub extra: PoolKwargs,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn retries(mut self, retries: Retry) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn redirect(mut self, redirect: bool) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn extra(mut self, name: impl Into<String>, value: impl Into<PoolOption>) -> Self {
        self.extra.insert(name, value);
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: None,
            body: None,
            retries: None,
            redirect: true,
            extra: PoolKwargs::new(),
        }
    }
}

/// How a manager turns a parsed URL into a pool and a request target.
pub(crate) trait PoolRoute {
    fn validate_scheme(&self, scheme: &str) -> crate::Result<()>;

    fn select_pool(&self, parts: &UrlParts) -> crate::Result<Arc<dyn ConnectionPool>>;

    fn requires_absolute_form(&self, parts: &UrlParts) -> bool;

    /// Headers sent with one absolute-form hop to `url`; `headers` are the request's own.
    fn forwarded_headers(&self, _url: &str, headers: &HeaderMap) -> HeaderMap {
        headers.clone()
    }
}

struct RedirectState {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    retries: Retry,
    follow: bool,
    extra: PoolKwargs,
}

enum Step {
    Issue,
    CheckRedirect {
        response: Response,
        pool: Arc<dyn ConnectionPool>,
    },
    FollowRedirect {
        response: Response,
        pool: Arc<dyn ConnectionPool>,
        location: String,
    },
    Done(Response),
    Failed(Error),
}

pub struct PoolManagerBuilder {
    registry: SchemeRegistry,
    num_pools: usize,
    headers: HeaderMap,
    connection_pool_kw: PoolKwargs,
    retries: Retry,
}

impl PoolManagerBuilder {
    pub(crate) fn new(registry: SchemeRegistry) -> Self {
        Self {
            registry,
            num_pools: DEFAULT_NUM_POOLS,
            headers: HeaderMap::new(),
            connection_pool_kw: PoolKwargs::new(),
            retries: Retry::default(),
        }
    }

    pub fn num_pools(mut self, num_pools: usize) -> Self {
        self.num_pools = num_pools.max(1);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(self.header(header_name, header_value))
    }

    pub fn connection_pool_kw(mut self, connection_pool_kw: PoolKwargs) -> Self {
        self.connection_pool_kw = connection_pool_kw;
        self
    }

    pub fn pool_kwarg(mut self, name: impl Into<String>, value: impl Into<PoolOption>) -> Self {
        self.connection_pool_kw.insert(name, value);
        self
    }

    pub fn retries(mut self, retries: Retry) -> Self {
        self.retries = retries;
        self
    }

    pub(crate) fn registry(&self) -> &SchemeRegistry {
        &self.registry
    }

    pub fn build(self) -> PoolManager {
        let metrics = PoolManagerMetrics::default();
        PoolManager {
            pools: PoolCache::with_metrics(self.num_pools, metrics.clone()),
            registry: self.registry,
            headers: self.headers,
            connection_pool_kw: self.connection_pool_kw,
            retries: self.retries,
            metrics,
        }
    }
}

/// Routes requests to per-origin connection pools, following redirects.
pub struct PoolManager {
    pools: PoolCache,
    registry: SchemeRegistry,
    headers: HeaderMap,
    connection_pool_kw: PoolKwargs,
    retries: Retry,
    metrics: PoolManagerMetrics,
}

impl PoolManager {
    pub fn builder(registry: SchemeRegistry) -> PoolManagerBuilder {
        PoolManagerBuilder::new(registry)
    }

    pub fn new(registry: SchemeRegistry) -> Self {
        Self::builder(registry).build()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn connection_pool_kw(&self) -> &PoolKwargs {
        &self.connection_pool_kw
    }

    pub fn registry(&self) -> &SchemeRegistry {
        &self.registry
    }

    pub fn pools(&self) -> &PoolCache {
        &self.pools
    }

    pub fn default_retries(&self) -> &Retry {
        &self.retries
    }

    pub fn metrics_snapshot(&self) -> PoolManagerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Closes and forgets every pool.
    pub fn clear(&self) {
        self.pools.clear();
    }

    /// Borrows the manager; every pool is closed when the guard drops.
    pub fn scoped(&self) -> PoolScope<'_, Self> {
        PoolScope::new(self)
    }

    /// Defaults layered with `overrides`; a `None` override removes the option.
    pub fn merge_pool_kwargs(&self, overrides: Option<&PoolKwargsOverride>) -> PoolKwargs {
        let mut merged = self.connection_pool_kw.clone();
        if let Some(overrides) = overrides {
            for (name, value) in overrides {
                match value {
                    Some(value) => merged.insert(name.clone(), value.clone()),
                    None => {
                        merged.remove(name);
                    }
                }
            }
        }
        merged
    }

    pub fn connection_from_url(
        &self,
        url: &str,
        pool_kwargs: Option<&PoolKwargsOverride>,
    ) -> crate::Result<Arc<dyn ConnectionPool>> {
        let parts = parse_url(url)?;
        self.connection_from_host(
            parts.host.as_deref().unwrap_or_default(),
            parts.port,
            Some(&parts.scheme),
            pool_kwargs,
        )
    }

    pub fn connection_from_host(
        &self,
        host: &str,
        port: Option<u16>,
        scheme: Option<&str>,
        pool_kwargs: Option<&PoolKwargsOverride>,
    ) -> crate::Result<Arc<dyn ConnectionPool>> {
        if host.is_empty() {
            return Err(Error::LocationValue {
                location: format!("{}://", scheme.unwrap_or("http")),
            });
        }
        let scheme = scheme
            .filter(|scheme| !scheme.is_empty())
            .unwrap_or("http")
            .to_ascii_lowercase();
        let port = self.registry.port_or_default(&scheme, port);
        let context = RequestContext::new(scheme, host, port, self.merge_pool_kwargs(pool_kwargs));
        self.connection_from_context(&context)
    }

    pub fn connection_from_context(
        &self,
        context: &RequestContext,
    ) -> crate::Result<Arc<dyn ConnectionPool>> {
        let scheme = context.scheme().to_ascii_lowercase();
        let Some(registration) = self.registry.key_registration(&scheme) else {
            return Err(Error::UrlSchemeUnknown { scheme });
        };
        let key = registration
            .normalizer
            .normalize(&registration.schema, context);
        self.connection_from_pool_key(&key, context)
    }

    pub fn connection_from_pool_key(
        &self,
        key: &PoolKey,
        context: &RequestContext,
    ) -> crate::Result<Arc<dyn ConnectionPool>> {
        self.pools.get_or_create(key, || self.new_pool(context))
    }

    fn new_pool(&self, context: &RequestContext) -> crate::Result<Arc<dyn ConnectionPool>> {
        let scheme = context.scheme().to_ascii_lowercase();
        let Some(factory) = self.registry.pool_factory(&scheme) else {
            return Err(Error::UrlSchemeUnknown { scheme });
        };
        let address = PoolAddress::new(scheme, context.host(), context.port());
        factory.new_pool(&address, &context.pool_kwargs())
    }

    /// Sends `method url` through the right pool, following redirects while the retry budget allows.
    pub fn urlopen(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> crate::Result<Response> {
        self.run_redirect_loop(self, method, url, options)
    }

    pub(crate) fn run_redirect_loop(
        &self,
        route: &dyn PoolRoute,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> crate::Result<Response> {
        let span = info_span!(
            "poolroute.urlopen",
            method = %method,
            url = %redact_url_for_logs(url),
        );
        let _enter = span.enter();

        let follow = options.redirect;
        let mut state = RedirectState {
            method,
            url: url.to_owned(),
            headers: options.headers.unwrap_or_else(|| self.headers.clone()),
            body: options.body,
            retries: options
                .retries
                .unwrap_or_else(|| Retry::from_redirect_flag(self.retries.clone(), follow)),
            follow,
            extra: options.extra,
        };

        let mut step = Step::Issue;
        loop {
            step = match step {
                Step::Issue => self.issue(route, &state)?,
                Step::CheckRedirect { response, pool } => check_redirect(&state, response, pool)?,
                Step::FollowRedirect {
                    response,
                    pool,
                    location,
                } => self.follow_redirect(&mut state, response, pool.address(), location)?,
                Step::Done(response) => return Ok(response),
                Step::Failed(error) => return Err(error),
            };
        }
    }

    fn issue(&self, route: &dyn PoolRoute, state: &RedirectState) -> crate::Result<Step> {
        let parts = parse_url(&state.url)?;
        route.validate_scheme(&parts.scheme)?;
        let pool = route.select_pool(&parts)?;
        let (target, headers) = if route.requires_absolute_form(&parts) {
            (
                state.url.clone(),
                route.forwarded_headers(&state.url, &state.headers),
            )
        } else {
            (parts.request_uri(), state.headers.clone())
        };

        debug!(pool = %pool.address(), target = %redact_url_for_logs(&target), "issuing request");
        self.metrics.record_request();
        let response = pool.urlopen(PoolRequest {
            method: state.method.clone(),
            url: target,
            headers,
            body: state.body.clone(),
            retries: state.retries.clone(),
            redirect: false,
            assert_same_host: false,
            extra: state.extra.clone(),
        })?;
        Ok(Step::CheckRedirect { response, pool })
    }

    fn follow_redirect(
        &self,
        state: &mut RedirectState,
        mut response: Response,
        origin: &PoolAddress,
        location: String,
    ) -> crate::Result<Step> {
        let status = response.status();
        let next_retries = state
            .retries
            .decremented_for(RetryKind::Redirect)
            .record(RequestHistory {
                method: state.method.clone(),
                url: state.url.clone(),
                status: Some(status.as_u16()),
                redirect_location: Some(location.clone()),
            });

        if next_retries.is_exhausted() {
            self.metrics.record_retries_exhausted();
            warn!(
                status = status.as_u16(),
                location = %redact_url_for_logs(&location),
                "redirect budget exhausted"
            );
            if !state.retries.should_raise_on_redirect() {
                return Ok(Step::Done(response));
            }
            response.release_conn();
            return Ok(Step::Failed(Error::MaxRetry {
                method: state.method.clone(),
                url: state.url.clone(),
                reason: next_retries.exhaustion_cause(),
            }));
        }

        if status == StatusCode::SEE_OTHER {
            state.method = Method::GET;
            state.body = None;
            prepare_headers_for_method_change(&mut state.headers);
        }

        let removed = state.retries.headers_removed_on_redirect();
        if !removed.is_empty() && !self.is_same_host(origin, &location) {
            let mut headers = state.headers.clone();
            for name in removed {
                headers.remove(name);
            }
            state.headers = headers;
        }

        info!(
            from = %redact_url_for_logs(&state.url),
            to = %redact_url_for_logs(&location),
            status = status.as_u16(),
            "redirecting"
        );
        self.metrics.record_redirect();
        response.drain_conn();

        state.url = location;
        state.retries = next_retries;
        Ok(Step::Issue)
    }

    /// Whether `url` resolves to the same scheme, host and port as `address`.
    pub fn is_same_host(&self, address: &PoolAddress, url: &str) -> bool {
        if url.starts_with('/') {
            return true;
        }
        let Ok(parts) = parse_url(url) else {
            return false;
        };
        let Some(host) = parts.host.as_deref() else {
            return false;
        };
        parts.scheme.eq_ignore_ascii_case(&address.scheme)
            && host.eq_ignore_ascii_case(&address.host)
            && self.registry.port_or_default(&parts.scheme, parts.port) == address.port
    }
}

fn check_redirect(
    state: &RedirectState,
    response: Response,
    pool: Arc<dyn ConnectionPool>,
) -> crate::Result<Step> {
    if !state.follow {
        return Ok(Step::Done(response));
    }
    let Some(location) = response.get_redirect_location() else {
        return Ok(Step::Done(response));
    };
    let location = join_redirect_location(&state.url, &location)?;
    Ok(Step::FollowRedirect {
        response,
        pool,
        location,
    })
}

impl PoolRoute for PoolManager {
    fn validate_scheme(&self, _scheme: &str) -> crate::Result<()> {
        Ok(())
    }

    fn select_pool(&self, parts: &UrlParts) -> crate::Result<Arc<dyn ConnectionPool>> {
        self.connection_from_host(
            parts.host.as_deref().unwrap_or_default(),
            parts.port,
            Some(&parts.scheme),
            None,
        )
    }

    fn requires_absolute_form(&self, _parts: &UrlParts) -> bool {
        false
    }
}

impl RequestMethods for PoolManager {
    fn default_headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn urlopen(&self, method: Method, url: &str, options: RequestOptions) -> crate::Result<Response> {
        PoolManager::urlopen(self, method, url, options)
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PoolManager")
            .field("pools", &self.pools)
            .field("registry", &self.registry)
            .field("headers", &self.headers)
            .field("connection_pool_kw", &self.connection_pool_kw)
            .field("retries", &self.retries)
            .finish()
    }
}

/// Anything owning a pool cache that can be emptied.
pub trait ClearPools {
    fn clear_pools(&self);
}

impl ClearPools for PoolManager {
    fn clear_pools(&self) {
        self.clear();
    }
}

/// Scoped use of a manager: pools are closed when the scope ends, on every exit path.
pub struct PoolScope<'a, M: ClearPools> {
    manager: &'a M,
}

impl<'a, M: ClearPools> PoolScope<'a, M> {
    pub(crate) fn new(manager: &'a M) -> Self {
        Self { manager }
    }
}

impl<M: ClearPools> Deref for PoolScope<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.manager
    }
}

impl<M: ClearPools> Drop for PoolScope<'_, M> {
    fn drop(&mut self) {
        self.manager.clear_pools();
    }
}
