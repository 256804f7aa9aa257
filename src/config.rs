use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_NUM_POOLS;
use crate::key::PoolKwargs;
use crate::manager::{PoolManager, PoolManagerBuilder};
use crate::proxy::{ProxyManager, ProxyManagerBuilder, TlsContext};
use crate::registry::SchemeRegistry;
use crate::retry::Retry;

/// Upstream proxy section of a [`PoolManagerConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub use_forwarding_for_https: bool,
    #[serde(default)]
    pub ssl_context: Option<String>,
}

/// Manager settings as they appear in a configuration file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolManagerConfig {
    #[serde(default = "default_num_pools")]
    pub num_pools: usize,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub connection_pool_kw: PoolKwargs,
    #[serde(default = "default_total_retries")]
    pub total_retries: Option<usize>,
    #[serde(default)]
    pub max_redirects: Option<usize>,
    #[serde(default = "default_raise_on_redirect")]
    pub raise_on_redirect: bool,
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            num_pools: default_num_pools(),
            headers: BTreeMap::new(),
            connection_pool_kw: PoolKwargs::new(),
            total_retries: default_total_retries(),
            max_redirects: None,
            raise_on_redirect: default_raise_on_redirect(),
            proxy: None,
        }
    }
}

impl PoolManagerConfig {
    pub fn retries(&self) -> Retry {
        Retry::unlimited()
            .total(self.total_retries)
            .redirect(self.max_redirects)
            .raise_on_redirect(self.raise_on_redirect)
    }

    pub fn into_builder(self, registry: SchemeRegistry) -> crate::Result<PoolManagerBuilder> {
        let retries = self.retries();
        let mut builder = PoolManager::builder(registry)
            .num_pools(self.num_pools)
            .connection_pool_kw(self.connection_pool_kw)
            .retries(retries);
        for (name, value) in &self.headers {
            builder = builder.try_header(name, value)?;
        }
        Ok(builder)
    }

    /// `None` when the configuration has no `proxy` section.
    pub fn into_proxy_builder(
        self,
        registry: SchemeRegistry,
    ) -> crate::Result<Option<ProxyManagerBuilder>> {
        let retries = self.retries();
        let Some(proxy) = self.proxy else {
            return Ok(None);
        };
        let mut builder = ProxyManager::builder(proxy.url, registry)
            .num_pools(self.num_pools)
            .connection_pool_kw(self.connection_pool_kw)
            .retries(retries)
            .use_forwarding_for_https(proxy.use_forwarding_for_https);
        if let Some(ssl_context) = proxy.ssl_context {
            builder = builder.proxy_ssl_context(TlsContext::new(ssl_context));
        }
        for (name, value) in &self.headers {
            builder = builder.try_header(name, value)?;
        }
        for (name, value) in &proxy.headers {
            builder = builder.try_proxy_header(name, value)?;
        }
        Ok(Some(builder))
    }
}

fn default_num_pools() -> usize {
    DEFAULT_NUM_POOLS
}

fn default_total_retries() -> Option<usize> {
    Some(3)
}

fn default_raise_on_redirect() -> bool {
    true
}
