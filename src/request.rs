use std::fmt;

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};
use url::Url;

use crate::{FireError, Result};

/// Methods accepted by [`parse_method`].
pub const SUPPORTED_METHODS: [&str; 7] =
    ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Parses a method name case-insensitively.
///
/// Only the methods in [`SUPPORTED_METHODS`] are accepted; anything else is
/// rejected with [`FireError::InvalidRequest`].
pub fn parse_method(method: &str) -> Result<Method> {
    let upper = method.trim().to_ascii_uppercase();
    if !SUPPORTED_METHODS.contains(&upper.as_str()) {
        return Err(FireError::InvalidRequest(format!(
            "unsupported method '{method}'"
        )));
    }
    Method::from_bytes(upper.as_bytes())
        .map_err(|err| FireError::InvalidRequest(format!("invalid method '{method}': {err}")))
}

/// Immutable description of one logical HTTP call.
///
/// Built once, validated at construction, then shared read-only with the
/// dispatcher. Header names are case-insensitive and unique: setting the
/// same name twice keeps the last value.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("headers", &self.headers.len())
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

impl RequestDescriptor {
    /// Creates a descriptor for `method` against an absolute `http`/`https` URL.
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Ok(Self {
            url: parse_absolute_url(url)?,
            method,
            headers: HeaderMap::new(),
            body: None,
        })
    }

    /// Shorthand for a `GET` descriptor.
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    /// Shorthand for a `POST` descriptor.
    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    /// Builds a descriptor from loosely typed parts, as received from a UI binding.
    pub fn from_parts<I, K, V>(url: &str, method: &str, headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut descriptor = Self::new(parse_method(method)?, url)?;
        for (name, value) in headers {
            descriptor = descriptor.header(name.as_ref(), value.as_ref())?;
        }
        Ok(descriptor)
    }

    /// Sets a header, replacing any previous value under the same
    /// (case-insensitive) name.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|err| {
            FireError::InvalidRequest(format!("invalid header name '{name}': {err}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|err| {
            FireError::InvalidRequest(format!("invalid value for header '{name}': {err}"))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Attaches a request body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

fn parse_absolute_url(input: &str) -> Result<Url> {
    let url = Url::parse(input.trim())
        .map_err(|err| FireError::InvalidRequest(format!("invalid url '{input}': {err}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(FireError::InvalidRequest(format!(
                "unsupported url scheme '{other}' in '{input}'"
            )))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(FireError::InvalidRequest(format!("url '{input}' has no host")));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::{parse_method, RequestDescriptor};
    use crate::FireError;
    use reqwest::Method;

    #[test]
    fn rejects_relative_and_garbage_urls() {
        for input in ["not a url", "/relative/path", "localhost:3000", "ftp://host/file"] {
            let err = RequestDescriptor::get(input).expect_err("url must be rejected");
            assert!(matches!(err, FireError::InvalidRequest(_)), "{input}: {err}");
        }
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method(" Patch ").unwrap(), Method::PATCH);
        assert!(matches!(
            parse_method("TRACE"),
            Err(FireError::InvalidRequest(_))
        ));
    }

    #[test]
    fn headers_are_unique_and_case_insensitive() {
        let descriptor = RequestDescriptor::get("http://localhost:3000/")
            .unwrap()
            .header("X-Token", "a")
            .unwrap()
            .header("x-token", "b")
            .unwrap();

        assert_eq!(descriptor.headers().len(), 1);
        assert_eq!(descriptor.headers()["X-TOKEN"], "b");
    }

    #[test]
    fn from_parts_rejects_bad_header_names() {
        let err = RequestDescriptor::from_parts("http://localhost/", "GET", [("bad header", "v")])
            .expect_err("header name with space must fail");
        assert!(matches!(err, FireError::InvalidRequest(_)));
    }
}
