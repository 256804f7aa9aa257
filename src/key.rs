//! Pool identity: request contexts and the keys derived from them.
//!
//! A [`PoolKey`] is built by a [`KeyNormalizer`] from a [`RequestContext`]
//! according to a [`KeySchema`], the declared list of connection-affecting
//! option names for one key kind. Two contexts that agree on scheme, host,
//! port and every declared option (ignoring the order of unordered
//! collections) produce equal keys.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default read block size recorded in keys built from the standard schema.
pub const DEFAULT_BLOCKSIZE: i64 = 16384;

/// Options that only make sense for TLS pools; stripped before building a plain `http` pool.
pub const TLS_KEYWORDS: &[&str] = &[
    "key_file",
    "cert_file",
    "cert_reqs",
    "ca_certs",
    "ca_cert_data",
    "ssl_version",
    "ssl_minimum_version",
    "ssl_maximum_version",
    "ca_cert_dir",
    "ssl_context",
    "key_password",
    "server_hostname",
];

/// Reserved option names carrying proxy state into every pool key.
pub const PROXY_OPTION: &str = "_proxy";
pub const PROXY_HEADERS_OPTION: &str = "_proxy_headers";
pub const PROXY_CONFIG_OPTION: &str = "_proxy_config";

/// A pool-construction option value.
///
/// `Set` is unordered: normalization sorts and deduplicates it. `List` keeps
/// its order (socket options are applied in sequence).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolOption {
    Bool(bool),
    Int(i64),
    Text(String),
    Duration(Duration),
    List(Vec<PoolOption>),
    Set(Vec<PoolOption>),
    Map(BTreeMap<String, PoolOption>),
}

impl PoolOption {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn set<I>(items: I) -> Self
    where
        I: IntoIterator<Item = PoolOption>,
    {
        Self::Set(items.into_iter().collect())
    }

    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = PoolOption>,
    {
        Self::List(items.into_iter().collect())
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, PoolOption)>,
        K: Into<String>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(value) => Some(*value),
            _ => None,
        }
    }

    /// Order-independent form: sets sorted and deduplicated, recursively.
    pub fn canonical(&self) -> Self {
        match self {
            Self::List(items) => Self::List(items.iter().map(Self::canonical).collect()),
            Self::Set(items) => {
                let mut items: Vec<_> = items.iter().map(Self::canonical).collect();
                items.sort();
                items.dedup();
                Self::Set(items)
            }
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(name, value)| (name.clone(), value.canonical()))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }
}

impl From<bool> for PoolOption {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PoolOption {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for PoolOption {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for PoolOption {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Duration> for PoolOption {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}

/// Named pool-construction options, the `connection_pool_kw` of a manager.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolKwargs(BTreeMap<String, PoolOption>);

impl PoolKwargs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<PoolOption>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<PoolOption>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<PoolOption> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&PoolOption> {
        self.0.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PoolOption)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>> FromIterator<(K, PoolOption)> for PoolKwargs {
    fn from_iter<I: IntoIterator<Item = (K, PoolOption)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }
}

/// Scheme-specific overrides layered over the manager defaults; `None` deletes the option.
pub type PoolKwargsOverride = BTreeMap<String, Option<PoolOption>>;

/// Everything needed to key and construct one pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    scheme: String,
    host: String,
    port: u16,
    options: PoolKwargs,
}

impl RequestContext {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        options: PoolKwargs,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            options,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn options(&self) -> &PoolKwargs {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&PoolOption> {
        self.options.get(name)
    }

    /// Options handed to the pool factory: TLS-only options are dropped for plain `http`.
    pub(crate) fn pool_kwargs(&self) -> PoolKwargs {
        let mut kwargs = self.options.clone();
        if self.scheme.eq_ignore_ascii_case("http") {
            for keyword in TLS_KEYWORDS {
                kwargs.remove(keyword);
            }
        }
        kwargs
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyField {
    name: String,
    default: Option<PoolOption>,
}

impl KeyField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> Option<&PoolOption> {
        self.default.as_ref()
    }
}

/// Declared option names that participate in a pool key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySchema {
    kind: String,
    fields: Vec<KeyField>,
}

impl KeySchema {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(self, name: impl Into<String>) -> Self {
        self.push_field(name.into(), None)
    }

    pub fn field_with_default(self, name: impl Into<String>, default: impl Into<PoolOption>) -> Self {
        self.push_field(name.into(), Some(default.into()))
    }

    fn push_field(mut self, name: String, default: Option<PoolOption>) -> Self {
        if let Some(existing) = self.fields.iter_mut().find(|field| field.name == name) {
            existing.default = default;
        } else {
            self.fields.push(KeyField { name, default });
        }
        self
    }

    /// The connection-affecting options an HTTP(S) pool is keyed on.
    pub fn standard() -> Self {
        [
            "timeout",
            "retries",
            "block",
            "source_address",
            "key_file",
            "key_password",
            "cert_file",
            "cert_reqs",
            "ca_certs",
            "ca_cert_data",
            "ssl_version",
            "ssl_minimum_version",
            "ssl_maximum_version",
            "ca_cert_dir",
            "ssl_context",
            "maxsize",
            "headers",
            PROXY_OPTION,
            PROXY_HEADERS_OPTION,
            PROXY_CONFIG_OPTION,
            "socket_options",
            "_socks_options",
            "assert_hostname",
            "assert_fingerprint",
            "server_hostname",
        ]
        .into_iter()
        .fold(Self::new("standard"), |schema, name| schema.field(name))
        .field_with_default("blocksize", DEFAULT_BLOCKSIZE)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn fields(&self) -> &[KeyField] {
        &self.fields
    }
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::standard()
    }
}

/// Immutable, hashable identity of a connection pool.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    kind: String,
    scheme: String,
    host: String,
    port: u16,
    fields: Vec<(String, Option<PoolOption>)>,
}

impl PoolKey {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `None` when the field is undeclared or was unset in the context.
    pub fn field(&self, name: &str) -> Option<&PoolOption> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&PoolOption>)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

pub trait KeyNormalizer: Send + Sync {
    fn normalize(&self, schema: &KeySchema, context: &RequestContext) -> PoolKey;
}

#[derive(Debug, Default)]
pub struct DefaultKeyNormalizer;

impl KeyNormalizer for DefaultKeyNormalizer {
    fn normalize(&self, schema: &KeySchema, context: &RequestContext) -> PoolKey {
        let fields = schema
            .fields
            .iter()
            .map(|field| {
                let value = context
                    .option(&field.name)
                    .map(PoolOption::canonical)
                    .or_else(|| field.default.clone());
                (field.name.clone(), value)
            })
            .collect();

        PoolKey {
            kind: schema.kind.clone(),
            scheme: context.scheme.to_ascii_lowercase(),
            host: context.host.to_ascii_lowercase(),
            port: context.port,
            fields,
        }
    }
}

impl<F> KeyNormalizer for F
where
    F: Fn(&KeySchema, &RequestContext) -> PoolKey + Send + Sync,
{
    fn normalize(&self, schema: &KeySchema, context: &RequestContext) -> PoolKey {
        self(schema, context)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        DEFAULT_BLOCKSIZE, DefaultKeyNormalizer, KeyNormalizer, KeySchema, PoolKwargs, PoolOption,
        RequestContext,
    };

    fn normalize(context: &RequestContext) -> super::PoolKey {
        DefaultKeyNormalizer.normalize(&KeySchema::standard(), context)
    }

    #[test]
    fn set_ordering_does_not_change_key() {
        let left = RequestContext::new(
            "https",
            "api.example.com",
            443,
            PoolKwargs::new().with(
                "cert_reqs",
                PoolOption::set([PoolOption::text("b"), PoolOption::text("a")]),
            ),
        );
        let right = RequestContext::new(
            "HTTPS",
            "API.example.com",
            443,
            PoolKwargs::new().with(
                "cert_reqs",
                PoolOption::set([
                    PoolOption::text("a"),
                    PoolOption::text("b"),
                    PoolOption::text("a"),
                ]),
            ),
        );

        assert_eq!(normalize(&left), normalize(&right));
    }

    #[test]
    fn list_ordering_changes_key() {
        let first = PoolOption::list([PoolOption::Int(6), PoolOption::Int(1)]);
        let second = PoolOption::list([PoolOption::Int(1), PoolOption::Int(6)]);
        let left = RequestContext::new(
            "http",
            "a",
            80,
            PoolKwargs::new().with("socket_options", first),
        );
        let right = RequestContext::new(
            "http",
            "a",
            80,
            PoolKwargs::new().with("socket_options", second),
        );

        assert_ne!(normalize(&left), normalize(&right));
    }

    #[test]
    fn absent_fields_are_unset_and_blocksize_defaults() {
        let key = normalize(&RequestContext::new("http", "a", 80, PoolKwargs::new()));
        assert_eq!(key.field("timeout"), None);
        assert_eq!(key.field("blocksize"), Some(&PoolOption::Int(DEFAULT_BLOCKSIZE)));
        assert_eq!(key.fields().count(), KeySchema::standard().fields().len());
    }

    #[test]
    fn undeclared_options_do_not_affect_key() {
        let plain = normalize(&RequestContext::new("http", "a", 80, PoolKwargs::new()));
        let extra = normalize(&RequestContext::new(
            "http",
            "a",
            80,
            PoolKwargs::new().with("preload_content", false),
        ));
        assert_eq!(plain, extra);
    }

    #[test]
    fn declared_option_value_changes_key() {
        let short = normalize(&RequestContext::new(
            "http",
            "a",
            80,
            PoolKwargs::new().with("timeout", Duration::from_secs(1)),
        ));
        let long = normalize(&RequestContext::new(
            "http",
            "a",
            80,
            PoolKwargs::new().with("timeout", Duration::from_secs(2)),
        ));
        assert_ne!(short, long);
    }

    #[test]
    fn custom_schema_fields_drive_the_key() {
        let schema = KeySchema::new("socks").field("_socks_options");
        let context = RequestContext::new(
            "socks5",
            "proxy",
            1080,
            PoolKwargs::new()
                .with("_socks_options", PoolOption::text("rdns"))
                .with("timeout", Duration::from_secs(3)),
        );
        let key = DefaultKeyNormalizer.normalize(&schema, &context);
        assert_eq!(key.kind(), "socks");
        assert_eq!(key.fields().count(), 1);
        assert_eq!(key.field("_socks_options"), Some(&PoolOption::text("rdns")));
        assert_eq!(key.field("timeout"), None);
    }

    #[test]
    fn http_pool_kwargs_drop_tls_keywords() {
        let options = PoolKwargs::new()
            .with("ca_certs", "/etc/ssl/ca.pem")
            .with("maxsize", 4_i64);
        let http = RequestContext::new("http", "a", 80, options.clone());
        let https = RequestContext::new("https", "a", 443, options);

        assert!(!http.pool_kwargs().contains_key("ca_certs"));
        assert!(http.pool_kwargs().contains_key("maxsize"));
        assert!(https.pool_kwargs().contains_key("ca_certs"));
    }
}
