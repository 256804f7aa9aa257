use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};

use crate::manager::RequestOptions;
use crate::pool::Response;
use crate::util::{append_query_pairs, build_query_string};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Convenience layer over `urlopen`: encodes form fields into the URL or the body.
///
/// `GET`, `HEAD`, `DELETE` and `OPTIONS` carry fields in the query string;
/// every other method sends them as an `application/x-www-form-urlencoded`
/// body unless the caller already supplied one.
pub trait RequestMethods {
    fn default_headers(&self) -> &HeaderMap;

    fn urlopen(&self, method: Method, url: &str, options: RequestOptions) -> crate::Result<Response>;

    fn request(
        &self,
        method: Method,
        url: &str,
        fields: &[(String, String)],
        options: RequestOptions,
    ) -> crate::Result<Response> {
        if encodes_fields_in_url(&method) {
            self.request_encode_url(method, url, fields, options)
        } else {
            self.request_encode_body(method, url, fields, options)
        }
    }

    fn request_encode_url(
        &self,
        method: Method,
        url: &str,
        fields: &[(String, String)],
        mut options: RequestOptions,
    ) -> crate::Result<Response> {
        if options.headers.is_none() {
            options.headers = Some(self.default_headers().clone());
        }
        let url = append_query_pairs(url, fields);
        self.urlopen(method, &url, options)
    }

    fn request_encode_body(
        &self,
        method: Method,
        url: &str,
        fields: &[(String, String)],
        mut options: RequestOptions,
    ) -> crate::Result<Response> {
        let mut headers = options
            .headers
            .take()
            .unwrap_or_else(|| self.default_headers().clone());
        if options.body.is_none() && !fields.is_empty() {
            options.body = Some(Bytes::from(build_query_string(&[], fields)));
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));
            }
        }
        options.headers = Some(headers);
        self.urlopen(method, url, options)
    }
}

fn encodes_fields_in_url(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS
    )
}
