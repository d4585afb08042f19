//! Routes binding message kinds and HTTP surfaces to processors

use http::Method;

/// A route addressed either by numeric id (TCP/RPC) or by method + URI
/// (HTTP). The id must be unique within one application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    id: u32,
    method: Method,
    uri: String,
    group: String,
}

impl Route {
    /// Create a new route.
    pub fn new(id: u32, method: Method, uri: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            id,
            method,
            uri: uri.into(),
            group: group.into(),
        }
    }

    /// The message kind identifier used by the TCP and RPC routers.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The HTTP method of this route.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The URI this route is bound at under HTTP.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The API group of this route.
    pub fn group(&self) -> &str {
        &self.group
    }
}
