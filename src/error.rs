use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a [`crate::Retry`] budget ran out.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RetryCause {
    #[error("too many redirects: {status} -> {location}")]
    TooManyRedirects { status: u16, location: String },
    #[error("retry budget exhausted after {attempts} attempts")]
    Exhausted { attempts: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    LocationValue,
    UrlSchemeUnknown,
    ProxySchemeUnknown,
    ProxySchemeUnsupported,
    MaxRetry,
    PoolInit,
    Transport,
    InvalidHeaderName,
    InvalidHeaderValue,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::LocationValue => "location_value",
            Self::UrlSchemeUnknown => "url_scheme_unknown",
            Self::ProxySchemeUnknown => "proxy_scheme_unknown",
            Self::ProxySchemeUnsupported => "proxy_scheme_unsupported",
            Self::MaxRetry => "max_retry",
            Self::PoolInit => "pool_init",
            Self::Transport => "transport",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("no host specified in {location}")]
    LocationValue { location: String },
    #[error("no pool registered for url scheme {scheme:?}")]
    UrlSchemeUnknown { scheme: String },
    #[error("proxy url has unsupported scheme {scheme:?}; expected http or https")]
    ProxySchemeUnknown { scheme: String },
    #[error("unsupported proxy configuration: {message}")]
    ProxySchemeUnsupported { message: String },
    #[error("max retries exceeded for {method} {url}: {reason}")]
    MaxRetry {
        method: Method,
        url: String,
        #[source]
        reason: RetryCause,
    },
    #[error("failed to create pool for {scheme}://{host}:{port}: {source}")]
    PoolInit {
        scheme: String,
        host: String,
        port: u16,
        #[source]
        source: BoxError,
    },
    #[error("transport error for {method} {url}: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::LocationValue { .. } => ErrorCode::LocationValue,
            Self::UrlSchemeUnknown { .. } => ErrorCode::UrlSchemeUnknown,
            Self::ProxySchemeUnknown { .. } => ErrorCode::ProxySchemeUnknown,
            Self::ProxySchemeUnsupported { .. } => ErrorCode::ProxySchemeUnsupported,
            Self::MaxRetry { .. } => ErrorCode::MaxRetry,
            Self::PoolInit { .. } => ErrorCode::PoolInit,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
        }
    }

    /// Configuration errors are raised at pool-selection time and are never retried.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl { .. }
                | Self::LocationValue { .. }
                | Self::UrlSchemeUnknown { .. }
                | Self::ProxySchemeUnknown { .. }
                | Self::ProxySchemeUnsupported { .. }
                | Self::InvalidHeaderName { .. }
                | Self::InvalidHeaderValue { .. }
        )
    }
}
