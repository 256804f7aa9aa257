use std::borrow::Cow;
use std::sync::Mutex;

use http::header::{
    CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_LOCATION, CONTENT_TYPE,
    HeaderName, HeaderValue, LAST_MODIFIED, LOCATION,
};
use http::{HeaderMap, StatusCode};

use crate::error::Error;

const DIGEST: &str = "digest";

/// Components of an absolute URL as seen by the routing core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl UrlParts {
    /// `host[:port]`, or `None` when the URL carries no authority.
    pub fn netloc(&self) -> Option<String> {
        let host = self.host.as_deref().filter(|host| !host.is_empty())?;
        Some(match self.port {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        })
    }

    /// Origin-form request target: path plus query, never empty.
    pub fn request_uri(&self) -> String {
        let mut uri = if self.path.is_empty() {
            "/".to_owned()
        } else {
            self.path.clone()
        };
        if let Some(query) = &self.query {
            uri.push('?');
            uri.push_str(query);
        }
        uri
    }
}

/// Parses an absolute URL. Input without `://` that is not a bare path is
/// read as a plain `http` authority, so `a.test:8080/x` means `http://a.test:8080/x`.
pub fn parse_url(url: &str) -> Result<UrlParts, Error> {
    let trimmed = url.trim();
    let absolute = if trimmed.contains("://") || trimmed.starts_with('/') {
        Cow::Borrowed(trimmed)
    } else {
        Cow::Owned(format!("http://{trimmed}"))
    };
    let parsed = url::Url::parse(&absolute).map_err(|source| match source {
        url::ParseError::EmptyHost => Error::LocationValue {
            location: url.to_owned(),
        },
        source => Error::InvalidUrl {
            url: url.to_owned(),
            source,
        },
    })?;

    Ok(UrlParts {
        scheme: parsed.scheme().to_ascii_lowercase(),
        host: parsed.host_str().map(ToOwned::to_owned),
        port: parsed.port(),
        path: parsed.path().to_owned(),
        query: parsed.query().map(ToOwned::to_owned),
        fragment: parsed.fragment().map(ToOwned::to_owned),
    })
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

/// Request headers win over defaults on a name collision.
pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    let mut merged = default_headers.clone();
    for name in request_headers.keys() {
        merged.remove(name);
    }
    for (name, value) in request_headers {
        merged.append(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn is_redirect_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

pub(crate) fn redirect_location(status: StatusCode, headers: &HeaderMap) -> Option<String> {
    if !is_redirect_status(status) {
        return None;
    }
    headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

pub(crate) fn join_redirect_location(current_url: &str, location: &str) -> Result<String, Error> {
    let base = url::Url::parse(current_url).map_err(|source| Error::InvalidUrl {
        url: current_url.to_owned(),
        source,
    })?;
    let joined = base.join(location).map_err(|source| Error::InvalidUrl {
        url: location.to_owned(),
        source,
    })?;
    Ok(joined.into())
}

/// Drops headers that describe a request body, used when a redirect turns the request into a GET.
pub(crate) fn prepare_headers_for_method_change(headers: &mut HeaderMap) {
    for name in [
        CONTENT_ENCODING,
        CONTENT_LANGUAGE,
        CONTENT_LOCATION,
        CONTENT_TYPE,
        CONTENT_LENGTH,
        LAST_MODIFIED,
    ] {
        headers.remove(name);
    }
    headers.remove(DIGEST);
}

pub(crate) fn redact_url_for_logs(url_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url_text) else {
        return url_text.split('?').next().unwrap_or(url_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn append_query_pairs(url_text: &str, query_pairs: &[(String, String)]) -> String {
    if query_pairs.is_empty() {
        return url_text.to_owned();
    }

    if let Ok(mut url) = url::Url::parse(url_text) {
        let existing = url
            .query()
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .map(|(name, value)| (name.into_owned(), value.into_owned()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let query = build_query_string(&existing, query_pairs);
        url.set_query(Some(&query));
        return url.to_string();
    }

    let (without_fragment, fragment) = match url_text.split_once('#') {
        Some((left, right)) => (left, Some(right)),
        None => (url_text, None),
    };
    let separator = if without_fragment.contains('?') {
        '&'
    } else {
        '?'
    };
    let mut merged = format!(
        "{without_fragment}{separator}{}",
        build_query_string(&[], query_pairs)
    );
    if let Some(fragment) = fragment {
        merged.push('#');
        merged.push_str(fragment);
    }
    merged
}

pub(crate) fn build_query_string(
    existing: &[(String, String)],
    appended: &[(String, String)],
) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in existing {
        serializer.append_pair(name, value);
    }
    for (name, value) in appended {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}
