use std::collections::HashSet;

use http::Method;
use http::header::{AUTHORIZATION, COOKIE, HeaderName, PROXY_AUTHORIZATION};

use crate::error::RetryCause;

const DEFAULT_TOTAL: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryKind {
    Redirect,
    Connect,
    Read,
    Status,
    Other,
}

/// One consumed attempt, recorded on the [`Retry`] that follows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHistory {
    pub method: Method,
    pub url: String,
    pub status: Option<u16>,
    pub redirect_location: Option<String>,
}

/// Remaining retry and redirect allowance for one logical request.
///
/// Counters are `None` when unlimited. A budget is exhausted as soon as any
/// counter drops below zero, so a redirect budget of `n` allows `n` hops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retry {
    total: Option<i64>,
    connect: Option<i64>,
    read: Option<i64>,
    redirect: Option<i64>,
    status: Option<i64>,
    raise_on_redirect: bool,
    remove_headers_on_redirect: HashSet<HeaderName>,
    history: Vec<RequestHistory>,
}

impl Retry {
    pub fn new(total: usize) -> Self {
        Self {
            total: Some(saturating_i64(total)),
            ..Self::unlimited()
        }
    }

    pub fn unlimited() -> Self {
        Self {
            total: None,
            connect: None,
            read: None,
            redirect: None,
            status: None,
            raise_on_redirect: true,
            remove_headers_on_redirect: default_remove_headers_on_redirect(),
            history: Vec::new(),
        }
    }

    /// No retries; redirect responses are handed back instead of failing.
    pub fn disabled() -> Self {
        Self {
            total: Some(0),
            raise_on_redirect: false,
            ..Self::unlimited()
        }
    }

    /// `retries` unchanged, or with `redirect` off a zero redirect budget
    /// that hands redirect responses back as-is.
    pub fn from_redirect_flag(retries: Retry, redirect: bool) -> Self {
        if redirect {
            retries
        } else {
            retries.redirect(Some(0)).raise_on_redirect(false)
        }
    }

    pub fn total(mut self, total: Option<usize>) -> Self {
        self.total = total.map(saturating_i64);
        self
    }

    pub fn redirect(mut self, redirect: Option<usize>) -> Self {
        self.redirect = redirect.map(saturating_i64);
        self
    }

    pub fn connect(mut self, connect: Option<usize>) -> Self {
        self.connect = connect.map(saturating_i64);
        self
    }

    pub fn read(mut self, read: Option<usize>) -> Self {
        self.read = read.map(saturating_i64);
        self
    }

    pub fn status(mut self, status: Option<usize>) -> Self {
        self.status = status.map(saturating_i64);
        self
    }

    pub fn raise_on_redirect(mut self, raise_on_redirect: bool) -> Self {
        self.raise_on_redirect = raise_on_redirect;
        self
    }

    pub fn remove_headers_on_redirect(mut self, headers: impl IntoIterator<Item = HeaderName>) -> Self {
        self.remove_headers_on_redirect = headers.into_iter().collect();
        self
    }

    pub fn should_raise_on_redirect(&self) -> bool {
        self.raise_on_redirect
    }

    pub fn headers_removed_on_redirect(&self) -> &HashSet<HeaderName> {
        &self.remove_headers_on_redirect
    }

    pub fn history(&self) -> &[RequestHistory] {
        &self.history
    }

    /// Redirects still allowed, `None` when neither `total` nor `redirect` limits them.
    pub fn remaining_redirects(&self) -> Option<usize> {
        let remaining = match (self.total, self.redirect) {
            (Some(total), Some(redirect)) => total.min(redirect),
            (Some(value), None) | (None, Some(value)) => value,
            (None, None) => return None,
        };
        Some(usize::try_from(remaining).unwrap_or(0))
    }

    /// A new budget with one attempt of `kind` consumed.
    pub fn decremented_for(&self, kind: RetryKind) -> Self {
        let mut next = self.clone();
        next.total = next.total.map(|value| value - 1);
        let counter = match kind {
            RetryKind::Redirect => &mut next.redirect,
            RetryKind::Connect => &mut next.connect,
            RetryKind::Read => &mut next.read,
            RetryKind::Status => &mut next.status,
            RetryKind::Other => return next,
        };
        *counter = counter.map(|value| value - 1);
        next
    }

    pub fn record(mut self, entry: RequestHistory) -> Self {
        self.history.push(entry);
        self
    }

    pub fn is_exhausted(&self) -> bool {
        [self.total, self.connect, self.read, self.redirect, self.status]
            .into_iter()
            .flatten()
            .any(|value| value < 0)
    }

    pub(crate) fn exhaustion_cause(&self) -> RetryCause {
        match self.history.last() {
            Some(RequestHistory {
                status: Some(status),
                redirect_location: Some(location),
                ..
            }) => RetryCause::TooManyRedirects {
                status: *status,
                location: location.clone(),
            },
            _ => RetryCause::Exhausted {
                attempts: self.history.len(),
            },
        }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(DEFAULT_TOTAL)
    }
}

fn saturating_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn default_remove_headers_on_redirect() -> HashSet<HeaderName> {
    [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION].into_iter().collect()
}

#[cfg(test)]
mod tests {
    use http::Method;
    use http::header::{AUTHORIZATION, COOKIE};

    use super::{RequestHistory, Retry, RetryKind};
    use crate::error::RetryCause;

    #[test]
    fn redirect_budget_allows_exactly_n_hops() {
        let mut retry = Retry::unlimited().redirect(Some(2));
        for _ in 0..2 {
            retry = retry.decremented_for(RetryKind::Redirect);
            assert!(!retry.is_exhausted());
        }
        assert!(retry.decremented_for(RetryKind::Redirect).is_exhausted());
    }

    #[test]
    fn total_budget_caps_every_kind() {
        let retry = Retry::new(1);
        let once = retry.decremented_for(RetryKind::Read);
        assert!(!once.is_exhausted());
        assert!(once.decremented_for(RetryKind::Redirect).is_exhausted());
    }

    #[test]
    fn unlimited_budget_never_exhausts() {
        let mut retry = Retry::unlimited();
        for _ in 0..64 {
            retry = retry.decremented_for(RetryKind::Redirect);
        }
        assert!(!retry.is_exhausted());
        assert_eq!(retry.remaining_redirects(), None);
    }

    #[test]
    fn decrementing_leaves_original_untouched() {
        let retry = Retry::new(2);
        let next = retry.decremented_for(RetryKind::Connect);
        assert_eq!(retry.remaining_redirects(), Some(2));
        assert_eq!(next.remaining_redirects(), Some(1));
    }

    #[test]
    fn default_strips_credentials_on_redirect() {
        let retry = Retry::default();
        assert!(retry.headers_removed_on_redirect().contains(&AUTHORIZATION));
        assert!(retry.headers_removed_on_redirect().contains(&COOKIE));
        assert!(retry.should_raise_on_redirect());
    }

    #[test]
    fn redirect_flag_off_zeroes_redirect_budget() {
        let retry = Retry::from_redirect_flag(Retry::new(5), false);
        assert_eq!(retry.remaining_redirects(), Some(0));
        assert!(!retry.should_raise_on_redirect());
        assert!(retry.decremented_for(RetryKind::Redirect).is_exhausted());

        let retry = Retry::from_redirect_flag(Retry::default(), true);
        assert_eq!(retry, Retry::default());
    }

    #[test]
    fn exhaustion_cause_reports_last_redirect() {
        let retry = Retry::new(0)
            .decremented_for(RetryKind::Redirect)
            .record(RequestHistory {
                method: Method::GET,
                url: "http://a/".to_owned(),
                status: Some(302),
                redirect_location: Some("http://b/".to_owned()),
            });
        match retry.exhaustion_cause() {
            RetryCause::TooManyRedirects { status, location } => {
                assert_eq!(status, 302);
                assert_eq!(location, "http://b/");
            }
            other => panic!("unexpected retry cause: {other}"),
        }
    }
}
