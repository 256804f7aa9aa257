//! Per-manager scheme tables: pool factories, key normalizers and default ports.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::key::{DefaultKeyNormalizer, KeyNormalizer, KeySchema};
use crate::pool::PoolFactory;

pub const FALLBACK_PORT: u16 = 80;

#[derive(Clone)]
pub struct KeyRegistration {
    pub schema: KeySchema,
    pub normalizer: Arc<dyn KeyNormalizer>,
}

#[derive(Clone, Default)]
pub struct SchemeRegistry {
    pool_factories: BTreeMap<String, Arc<dyn PoolFactory>>,
    key_normalizers: BTreeMap<String, KeyRegistration>,
    default_ports: BTreeMap<String, u16>,
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `http` on port 80 and `https` on port 443, both served by `factory`
    /// and keyed with the standard schema.
    pub fn http(factory: Arc<dyn PoolFactory>) -> Self {
        Self::new()
            .with_scheme("http", 80, Arc::clone(&factory))
            .with_scheme("https", 443, factory)
    }

    pub fn with_scheme(
        self,
        scheme: &str,
        default_port: u16,
        factory: Arc<dyn PoolFactory>,
    ) -> Self {
        self.with_default_port(scheme, default_port)
            .with_pool_factory(scheme, factory)
            .with_key_normalizer(scheme, KeySchema::standard(), Arc::new(DefaultKeyNormalizer))
    }

    pub fn with_pool_factory(mut self, scheme: &str, factory: Arc<dyn PoolFactory>) -> Self {
        self.pool_factories
            .insert(scheme.to_ascii_lowercase(), factory);
        self
    }

    pub fn with_key_normalizer(
        mut self,
        scheme: &str,
        schema: KeySchema,
        normalizer: Arc<dyn KeyNormalizer>,
    ) -> Self {
        self.key_normalizers.insert(
            scheme.to_ascii_lowercase(),
            KeyRegistration { schema, normalizer },
        );
        self
    }

    pub fn with_default_port(mut self, scheme: &str, port: u16) -> Self {
        self.default_ports.insert(scheme.to_ascii_lowercase(), port);
        self
    }

    pub fn pool_factory(&self, scheme: &str) -> Option<&Arc<dyn PoolFactory>> {
        self.pool_factories.get(&scheme.to_ascii_lowercase())
    }

    pub fn key_registration(&self, scheme: &str) -> Option<&KeyRegistration> {
        self.key_normalizers.get(&scheme.to_ascii_lowercase())
    }

    pub fn default_port(&self, scheme: &str) -> Option<u16> {
        self.default_ports.get(&scheme.to_ascii_lowercase()).copied()
    }

    /// Registered default port, or 80 for unknown schemes.
    pub fn port_or_default(&self, scheme: &str, port: Option<u16>) -> u16 {
        port.or_else(|| self.default_port(scheme))
            .unwrap_or(FALLBACK_PORT)
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.pool_factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for SchemeRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SchemeRegistry")
            .field("pool_factories", &self.pool_factories.keys())
            .field("key_normalizers", &self.key_normalizers.keys())
            .field("default_ports", &self.default_ports)
            .finish()
    }
}
