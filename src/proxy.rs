//! Routing through a single upstream proxy.
//!
//! Plaintext targets are forwarded: the request goes to the proxy's own pool
//! in absolute form. HTTPS targets get a pool keyed on the target and the
//! transport opens a CONNECT tunnel through the proxy, unless the proxy is
//! itself HTTPS and configured to forward HTTPS requests.

use std::sync::Arc;

use http::header::{ACCEPT, HOST, HeaderName, HeaderValue, PROXY_AUTHORIZATION};
use http::{HeaderMap, Method};

use crate::error::Error;
use crate::key::{
    PROXY_CONFIG_OPTION, PROXY_HEADERS_OPTION, PROXY_OPTION, PoolKwargs, PoolKwargsOverride,
    PoolOption,
};
use crate::manager::{
    ClearPools, PoolManager, PoolManagerBuilder, PoolRoute, PoolScope, RequestOptions,
};
use crate::metrics::PoolManagerMetricsSnapshot;
use crate::pool::{ConnectionPool, PoolAddress, Response};
use crate::registry::SchemeRegistry;
use crate::request::RequestMethods;
use crate::retry::Retry;
use crate::util::{UrlParts, merge_headers, parse_header_name, parse_header_value, parse_url};

const SUPPORTED_PROXY_SCHEMES: &[&str] = &["http", "https"];

/// Name of a TLS configuration known to the transport, used for the proxy connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TlsContext(String);

impl TlsContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ProxyConfig {
    pub ssl_context: Option<TlsContext>,
    pub use_forwarding_for_https: bool,
    pub assert_hostname: Option<String>,
    pub assert_fingerprint: Option<String>,
}

impl ProxyConfig {
    pub(crate) fn to_option(&self) -> PoolOption {
        let mut entries = vec![(
            "use_forwarding_for_https",
            PoolOption::Bool(self.use_forwarding_for_https),
        )];
        if let Some(context) = &self.ssl_context {
            entries.push(("ssl_context", PoolOption::text(context.name())));
        }
        if let Some(hostname) = &self.assert_hostname {
            entries.push(("assert_hostname", PoolOption::text(hostname.as_str())));
        }
        if let Some(fingerprint) = &self.assert_fingerprint {
            entries.push(("assert_fingerprint", PoolOption::text(fingerprint.as_str())));
        }
        PoolOption::map(entries)
    }
}

/// Decides whether a destination must be reached through a CONNECT tunnel.
pub trait TunnelPolicy: Send + Sync {
    fn connection_requires_http_tunnel(
        &self,
        proxy: Option<&PoolAddress>,
        proxy_config: Option<&ProxyConfig>,
        destination_scheme: Option<&str>,
    ) -> bool;
}

#[derive(Debug, Default)]
pub struct StandardTunnelPolicy;

impl TunnelPolicy for StandardTunnelPolicy {
    fn connection_requires_http_tunnel(
        &self,
        proxy: Option<&PoolAddress>,
        proxy_config: Option<&ProxyConfig>,
        destination_scheme: Option<&str>,
    ) -> bool {
        let Some(proxy) = proxy else {
            return false;
        };
        if destination_scheme.is_some_and(|scheme| scheme.eq_ignore_ascii_case("http")) {
            return false;
        }
        if proxy.scheme.eq_ignore_ascii_case("https")
            && proxy_config.is_some_and(|config| config.use_forwarding_for_https)
        {
            return false;
        }
        true
    }
}

enum ProxySource {
    Url(String),
    Address(PoolAddress),
}

pub struct ProxyManagerBuilder {
    source: ProxySource,
    inner: PoolManagerBuilder,
    proxy_headers: HeaderMap,
    proxy_config: ProxyConfig,
    tunnel_policy: Arc<dyn TunnelPolicy>,
}

impl ProxyManagerBuilder {
    fn new(source: ProxySource, registry: SchemeRegistry) -> Self {
        Self {
            source,
            inner: PoolManager::builder(registry),
            proxy_headers: HeaderMap::new(),
            proxy_config: ProxyConfig::default(),
            tunnel_policy: Arc::new(StandardTunnelPolicy),
        }
    }

    pub fn num_pools(mut self, num_pools: usize) -> Self {
        self.inner = self.inner.num_pools(num_pools);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.inner = self.inner.headers(headers);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.inner = self.inner.header(name, value);
        self
    }

    pub fn try_header(mut self, name: &str, value: &str) -> crate::Result<Self> {
        self.inner = self.inner.try_header(name, value)?;
        Ok(self)
    }

    pub fn connection_pool_kw(mut self, connection_pool_kw: PoolKwargs) -> Self {
        self.inner = self.inner.connection_pool_kw(connection_pool_kw);
        self
    }

    pub fn pool_kwarg(mut self, name: impl Into<String>, value: impl Into<PoolOption>) -> Self {
        self.inner = self.inner.pool_kwarg(name, value);
        self
    }

    pub fn retries(mut self, retries: Retry) -> Self {
        self.inner = self.inner.retries(retries);
        self
    }

    pub fn proxy_headers(mut self, proxy_headers: HeaderMap) -> Self {
        self.proxy_headers = proxy_headers;
        self
    }

    pub fn proxy_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.proxy_headers.insert(name, value);
        self
    }

    pub fn try_proxy_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(self.proxy_header(header_name, header_value))
    }

    pub fn proxy_authorization(mut self, mut proxy_authorization: HeaderValue) -> Self {
        proxy_authorization.set_sensitive(true);
        self.proxy_headers
            .insert(PROXY_AUTHORIZATION, proxy_authorization);
        self
    }

    pub fn try_proxy_authorization(self, proxy_authorization: &str) -> crate::Result<Self> {
        let proxy_authorization = parse_header_value("proxy-authorization", proxy_authorization)?;
        Ok(self.proxy_authorization(proxy_authorization))
    }

    pub fn proxy_ssl_context(mut self, ssl_context: TlsContext) -> Self {
        self.proxy_config.ssl_context = Some(ssl_context);
        self
    }

    pub fn use_forwarding_for_https(mut self, use_forwarding_for_https: bool) -> Self {
        self.proxy_config.use_forwarding_for_https = use_forwarding_for_https;
        self
    }

    pub fn proxy_assert_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.proxy_config.assert_hostname = Some(hostname.into());
        self
    }

    pub fn proxy_assert_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.proxy_config.assert_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn tunnel_policy(mut self, tunnel_policy: Arc<dyn TunnelPolicy>) -> Self {
        self.tunnel_policy = tunnel_policy;
        self
    }

    pub fn try_build(self) -> crate::Result<ProxyManager> {
        let proxy = resolve_proxy(self.source, self.inner.registry())?;
        let inner = self
            .inner
            .pool_kwarg(PROXY_OPTION, proxy.url())
            .pool_kwarg(PROXY_HEADERS_OPTION, headers_to_option(&self.proxy_headers))
            .pool_kwarg(PROXY_CONFIG_OPTION, self.proxy_config.to_option());

        Ok(ProxyManager {
            manager: inner.build(),
            proxy,
            proxy_headers: self.proxy_headers,
            proxy_config: self.proxy_config,
            tunnel_policy: self.tunnel_policy,
        })
    }
}

fn resolve_proxy(source: ProxySource, registry: &SchemeRegistry) -> crate::Result<PoolAddress> {
    let (scheme, host, port) = match source {
        ProxySource::Url(url) => {
            let parts = parse_url(&url)?;
            let Some(host) = parts.host.filter(|host| !host.is_empty()) else {
                return Err(Error::LocationValue { location: url });
            };
            (parts.scheme, host, parts.port)
        }
        ProxySource::Address(address) => (
            address.scheme.to_ascii_lowercase(),
            address.host,
            Some(address.port),
        ),
    };
    if !SUPPORTED_PROXY_SCHEMES.contains(&scheme.as_str()) {
        return Err(Error::ProxySchemeUnknown { scheme });
    }
    let port = registry.port_or_default(&scheme, port);
    Ok(PoolAddress::new(scheme, host, port))
}

fn headers_to_option(headers: &HeaderMap) -> PoolOption {
    PoolOption::map(headers.keys().map(|name| {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        (name.as_str().to_owned(), PoolOption::Text(joined))
    }))
}

/// A [`PoolManager`] that sends every request through one upstream proxy.
pub struct ProxyManager {
    manager: PoolManager,
    proxy: PoolAddress,
    proxy_headers: HeaderMap,
    proxy_config: ProxyConfig,
    tunnel_policy: Arc<dyn TunnelPolicy>,
}

impl ProxyManager {
    pub fn builder(proxy_url: impl Into<String>, registry: SchemeRegistry) -> ProxyManagerBuilder {
        ProxyManagerBuilder::new(ProxySource::Url(proxy_url.into()), registry)
    }

    /// Uses the scheme, host and port of an existing pool as the proxy.
    pub fn builder_for_pool(
        pool: &dyn ConnectionPool,
        registry: SchemeRegistry,
    ) -> ProxyManagerBuilder {
        ProxyManagerBuilder::new(ProxySource::Address(pool.address().clone()), registry)
    }

    pub fn proxy(&self) -> &PoolAddress {
        &self.proxy
    }

    pub fn proxy_headers(&self) -> &HeaderMap {
        &self.proxy_headers
    }

    pub fn proxy_config(&self) -> &ProxyConfig {
        &self.proxy_config
    }

    pub fn manager(&self) -> &PoolManager {
        &self.manager
    }

    pub fn metrics_snapshot(&self) -> PoolManagerMetricsSnapshot {
        self.manager.metrics_snapshot()
    }

    pub fn clear(&self) {
        self.manager.clear();
    }

    pub fn scoped(&self) -> PoolScope<'_, Self> {
        PoolScope::new(self)
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

    /// HTTPS targets get their own (tunneled) pool; everything else shares the proxy's pool.
    pub fn connection_from_host(
        &self,
        host: &str,
        port: Option<u16>,
        scheme: Option<&str>,
        pool_kwargs: Option<&PoolKwargsOverride>,
    ) -> crate::Result<Arc<dyn ConnectionPool>> {
        if scheme.is_some_and(|scheme| scheme.eq_ignore_ascii_case("https")) {
            return self
                .manager
                .connection_from_host(host, port, scheme, pool_kwargs);
        }
        self.manager.connection_from_host(
            &self.proxy.host,
            Some(self.proxy.port),
            Some(&self.proxy.scheme),
            pool_kwargs,
        )
    }

    /// `Accept: */*` and `Host` for the target, overridden by `headers`.
    pub fn set_proxy_headers(&self, url: &str, headers: Option<&HeaderMap>) -> HeaderMap {
        let mut defaults = HeaderMap::new();
        defaults.insert(ACCEPT, HeaderValue::from_static("*/*"));
        if let Ok(parts) = parse_url(url)
            && let Some(netloc) = parts.netloc()
            && let Ok(value) = HeaderValue::from_str(&netloc)
        {
            defaults.insert(HOST, value);
        }
        match headers {
            Some(headers) => merge_headers(&defaults, headers),
            None => defaults,
        }
    }

    fn requires_tunnel(&self, destination_scheme: &str) -> bool {
        self.tunnel_policy.connection_requires_http_tunnel(
            Some(&self.proxy),
            Some(&self.proxy_config),
            Some(destination_scheme),
        )
    }

    /// True when the request line must carry the full URL, i.e. the proxy forwards instead of tunneling.
    pub fn proxy_requires_url_absolute_form(&self, destination_scheme: &str) -> bool {
        !self.requires_tunnel(destination_scheme)
    }

    pub fn validate_proxy_scheme_url_selection(&self, url_scheme: &str) -> crate::Result<()> {
        if !url_scheme.eq_ignore_ascii_case("https")
            || !self.proxy.scheme.eq_ignore_ascii_case("https")
            || !self.requires_tunnel(url_scheme)
        {
            return Ok(());
        }
        let supports_tls_in_tls = self
            .manager
            .registry()
            .pool_factory(url_scheme)
            .is_none_or(|factory| factory.supports_tls_in_tls());
        if supports_tls_in_tls {
            return Ok(());
        }
        Err(Error::ProxySchemeUnsupported {
            message: format!(
                "contacting https destinations through https proxy {} requires TLS-in-TLS tunnels, which the pool factory does not support; set use_forwarding_for_https or use an http proxy",
                self.proxy
            ),
        })
    }

    /// Like [`PoolManager::urlopen`], with proxy-aware pool selection. Every
    /// forwarded hop, redirects included, carries `Accept` and a `Host` for that hop's URL.
    pub fn urlopen(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> crate::Result<Response> {
        self.manager.run_redirect_loop(self, method, url, options)
    }
}

impl PoolRoute for ProxyManager {
    fn validate_scheme(&self, scheme: &str) -> crate::Result<()> {
        self.validate_proxy_scheme_url_selection(scheme)
    }

    fn select_pool(&self, parts: &UrlParts) -> crate::Result<Arc<dyn ConnectionPool>> {
        self.connection_from_host(
            parts.host.as_deref().unwrap_or_default(),
            parts.port,
            Some(&parts.scheme),
            None,
        )
    }

    fn requires_absolute_form(&self, parts: &UrlParts) -> bool {
        self.proxy_requires_url_absolute_form(&parts.scheme)
    }

    fn forwarded_headers(&self, url: &str, headers: &HeaderMap) -> HeaderMap {
        self.set_proxy_headers(url, Some(headers))
    }
}

impl RequestMethods for ProxyManager {
    fn default_headers(&self) -> &HeaderMap {
        self.manager.headers()
    }

    fn urlopen(&self, method: Method, url: &str, options: RequestOptions) -> crate::Result<Response> {
        ProxyManager::urlopen(self, method, url, options)
    }
}

impl ClearPools for ProxyManager {
    fn clear_pools(&self) {
        self.clear();
    }
}

impl std::fmt::Debug for ProxyManager {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProxyManager")
            .field("proxy", &self.proxy)
            .field("proxy_config", &self.proxy_config)
            .field("manager", &self.manager)
            .finish()
    }
}
