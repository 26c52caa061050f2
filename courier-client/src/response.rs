//! Unary response wrapper and call metadata.

use http::HeaderMap;
use std::ops::Deref;

/// The result of a successful unary or client-streaming call.
///
/// Derefs to the message. Initial metadata (response headers) and trailing
/// metadata are kept alongside it.
///
/// ```ignore
/// let response = client.unary(&SEND, request, CallOptions::new()).await?;
/// println!("id: {}", response.id);
/// if let Some(region) = response.headers().get("x-region") {
///     println!("served by {region}");
/// }
/// let message = response.into_inner();
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    inner: T,
    headers: Metadata,
    trailers: Metadata,
}

impl<T> Response<T> {
    pub fn new(inner: T, headers: Metadata, trailers: Metadata) -> Self {
        Self {
            inner,
            headers,
            trailers,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Initial metadata (the HTTP response headers).
    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    /// Trailing metadata, without the `grpc-*` status entries.
    pub fn trailers(&self) -> &Metadata {
        &self.trailers
    }

    /// Transform the message, keeping metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            inner: f(self.inner),
            headers: self.headers,
            trailers: self.trailers,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Decompose into message, headers and trailers.
    pub fn into_parts(self) -> (T, Metadata, Metadata) {
        (self.inner, self.headers, self.trailers)
    }
}

impl<T> Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

/// Read-only view over call metadata.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    headers: HeaderMap,
}

impl Metadata {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Get a header value as a string.
    ///
    /// Returns `None` if the header is missing or not valid visible ASCII.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.headers.get(key).map(|v| v.as_bytes())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// All values of a repeated header.
    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }
}

impl From<HeaderMap> for Metadata {
    fn from(headers: HeaderMap) -> Self {
        Self::new(headers)
    }
}

impl From<Metadata> for HeaderMap {
    fn from(metadata: Metadata) -> Self {
        metadata.headers
    }
}
