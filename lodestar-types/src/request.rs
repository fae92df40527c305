use serde::{Deserialize, Serialize};

/// The identity-relevant part of an outgoing request.
///
/// Only requests that can be cached get a document identity: an explicit
/// `cache_key` always wins, otherwise the `url` of a `GET` request (or one
/// with no method) is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

impl RequestInfo {
    /// A `GET` request for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            method: Some("GET".to_string()),
            cache_key: None,
        }
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets an explicit cache key.
    #[must_use]
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Returns the key this request's document identity is stored under, if any.
    pub fn document_key(&self) -> Option<&str> {
        if let Some(key) = self.cache_key.as_deref().filter(|k| !k.is_empty()) {
            return Some(key);
        }
        let cacheable = self
            .method
            .as_deref()
            .is_none_or(|m| m.eq_ignore_ascii_case("GET"));
        if cacheable {
            self.url.as_deref().filter(|u| !u.is_empty())
        } else {
            None
        }
    }
}
