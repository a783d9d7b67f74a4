use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;

use crate::errors::StreamError;

/// HTTP method used to open a stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Prompt travels in the query string.
    Get,
    /// Prompt travels in a JSON body.
    Post,
}

/// Describes one streaming request.
///
/// Built with the setters below and moved into the session on `start`, after
/// which it no longer changes.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    url: String,
    method: Method,
    body: Option<Bytes>,
    headers: BTreeMap<String, String>,
    query: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl StreamRequest {
    /// Creates a GET request. Add the prompt with `query`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            body: None,
            headers: BTreeMap::new(),
            query: Vec::new(),
            timeout: None,
        }
    }

    /// Creates a POST request with a JSON body and a matching content type.
    pub fn post_json<T: serde::Serialize + ?Sized>(
        url: impl Into<String>,
        body: &T,
    ) -> Result<Self, StreamError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| StreamError::Validation(format!("failed to serialize body: {e}")))?;
        let mut request = Self::get(url).header("Content-Type", "application/json");
        request.method = Method::Post;
        request.body = Some(Bytes::from(body));
        Ok(request)
    }

    /// Adds a query-string pair. Pairs are sent in insertion order.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets a request header, replacing an existing one with the same name
    /// (case-insensitive).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
        self
    }

    /// Sets a deadline after which the session cancels itself.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Looks up a header by name (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.timeout
    }

    /// Checks the request before any I/O happens.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.url.trim().is_empty() {
            return Err(StreamError::Validation("url must not be empty".into()));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(StreamError::Validation(
                "timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
