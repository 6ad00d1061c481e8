use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;

use crate::stats::{is_failed_request, RequestTimings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` fields, in order.
    Form(Vec<(String, String)>),
}

/// Outbound request as built by a workload step.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Body,
    pub headers: Vec<(String, String)>,
    pub tags: HashMap<String, String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: Body::Empty,
            headers: Vec::new(),
            tags: HashMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::Patch, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Metric name: the `name` tag when set, otherwise the URL.
    pub fn name(&self) -> &str {
        self.tags.get("name").map(String::as_str).unwrap_or(&self.url)
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            Body::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    /// `0` when the request never produced a response.
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub timings: RequestTimings,
    pub error: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn transport_error(error: impl fmt::Display, timings: RequestTimings) -> Self {
        Self {
            status: 0,
            error: Some(error.to_string()),
            timings,
            ..Default::default()
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_str(&self.body).ok()
    }

    pub fn json_value(&self) -> Option<serde_json::Value> {
        self.json()
    }

    /// Field of a JSON object body.
    pub fn json_field(&self, field: &str) -> Option<serde_json::Value> {
        self.json_value()?.get(field).cloned()
    }

    pub fn is_failed(&self) -> bool {
        is_failed_request(self.status, self.error.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::post("https://example.test/auth/")
            .form([("username", "alice"), ("password", "pw")])
            .bearer("tok")
            .tag("name", "Login");

        assert_eq!(req.method, Method::Post);
        assert_eq!(req.name(), "Login");
        assert_eq!(req.form_value("username"), Some("alice"));
        assert_eq!(req.header_value("authorization"), Some("Bearer tok"));
        assert_eq!(req.header_value("x-missing"), None);
    }

    #[test]
    fn test_name_defaults_to_url() {
        let req = HttpRequest::get("https://example.test/public/");
        assert_eq!(req.name(), "https://example.test/public/");
        assert_eq!(req.form_value("anything"), None);
    }

    #[test]
    fn test_response_json_helpers() {
        let resp = HttpResponse::new(200, json!({"access": "abc", "id": 7}).to_string());
        assert_eq!(resp.json_field("access"), Some(json!("abc")));
        assert_eq!(resp.json_field("missing"), None);
        assert!(!resp.is_failed());

        let broken = HttpResponse::new(200, "<html>");
        assert_eq!(broken.json_value(), None);
    }

    #[test]
    fn test_transport_error_is_failed() {
        let resp = HttpResponse::transport_error("connection refused", RequestTimings::default());
        assert_eq!(resp.status, 0);
        assert!(resp.is_failed());
        assert_eq!(resp.error.as_deref(), Some("connection refused"));
    }
}
