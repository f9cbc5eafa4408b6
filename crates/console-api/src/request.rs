//! Logical API call description and attempt numbering

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// One logical API call. Replayed unchanged on the post-renewal retry.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    headers: HeaderMap,
    renewal: bool,
}

impl ApiRequest {
    /// `path` is relative to the pipeline's base URL, e.g. `/notifications`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            renewal: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| Error::InvalidRequest(format!("body is not serializable: {e}")))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Add a header. A caller-supplied `Authorization` header is sent as-is
    /// on the first attempt instead of the stored credential.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Mark this call as the session renewal call, which is never itself
    /// eligible for renewal.
    pub(crate) fn for_renewal(mut self) -> Self {
        self.renewal = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_renewal(&self) -> bool {
        self.renewal
    }

    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key(AUTHORIZATION)
    }
}

/// Attempt number of a logical call, threaded through the retry path.
///
/// Only the first attempt may trigger a renewal; the replay after renewal is
/// the second and last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt(u8);

impl Attempt {
    pub const FIRST: Attempt = Attempt(1);

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn is_retry(self) -> bool {
        self.0 > 1
    }

    pub fn may_renew(self) -> bool {
        self.0 == 1
    }

    pub fn next(self) -> Attempt {
        Attempt(self.0.saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_parts() {
        let request = ApiRequest::get("/notifications")
            .query("current", 1)
            .query("size", 10)
            .header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("t-1"),
            );

        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.path(), "/notifications");
        assert_eq!(
            request.query_pairs(),
            &[
                ("current".to_string(), "1".to_string()),
                ("size".to_string(), "10".to_string())
            ]
        );
        assert_eq!(request.headers()["x-trace"], "t-1");
        assert!(!request.has_authorization());
        assert!(!request.is_renewal());
    }

    #[test]
    fn json_body_is_captured() {
        #[derive(Serialize)]
        struct Announce<'a> {
            title: &'a str,
            content: &'a str,
        }
        let request = ApiRequest::post("/notifications/announce")
            .json(&Announce {
                title: "Maintenance",
                content: "Tonight 22:00",
            })
            .unwrap();
        assert_eq!(
            request.body().unwrap(),
            &serde_json::json!({"title": "Maintenance", "content": "Tonight 22:00"})
        );
    }

    #[test]
    fn renewal_marker_is_explicit() {
        let request = ApiRequest::post("/auth/refresh").for_renewal();
        assert!(request.is_renewal());
    }

    #[test]
    fn only_first_attempt_may_renew() {
        let first = Attempt::FIRST;
        assert!(first.may_renew());
        assert!(!first.is_retry());

        let second = first.next();
        assert_eq!(second.number(), 2);
        assert!(second.is_retry());
        assert!(!second.may_renew());
        assert!(!second.next().may_renew());
    }
}
