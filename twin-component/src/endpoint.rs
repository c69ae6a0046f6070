use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use twin_auth::RequestHeaders;
use twin_core::TwinResult;
use twin_store::User;

/// HTTP methods a component endpoint may use. Anything else fails
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// The reconciled caller attached to a request by the engine's auth
/// wrapper.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: User,
    pub is_admin: bool,
}

/// Transport-agnostic request handed to endpoint handlers.
#[derive(Debug, Clone)]
pub struct EndpointRequest {
    pub method: Method,
    pub path: String,
    pub headers: RequestHeaders,
    /// Path parameters (`{id}` segments).
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
    /// Present when the auth provider identified the caller.
    pub caller: Option<Caller>,
}

impl EndpointRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn json_body<T: serde::de::DeserializeOwned>(&self) -> TwinResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            twin_core::TwinError::validation(format!("invalid JSON body: {e}")).into_anyhow()
        })
    }
}

/// What a handler sends back; the engine forwards it onto the HTTP
/// response.
#[derive(Debug, Clone)]
pub struct EndpointResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

#[derive(Debug, Clone)]
pub enum ResponseBody {
    Empty,
    Json(serde_json::Value),
    Bytes { content_type: String, data: Bytes },
}

impl EndpointResponse {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Json(value),
        }
    }

    pub fn ok_json(value: serde_json::Value) -> Self {
        Self::json(200, value)
    }

    pub fn created(value: serde_json::Value) -> Self {
        Self::json(201, value)
    }

    pub fn bytes(status: u16, content_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Bytes {
                content_type: content_type.into(),
                data,
            },
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            headers: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

pub type EndpointHandler =
    Arc<dyn Fn(EndpointRequest) -> BoxFuture<'static, TwinResult<EndpointResponse>> + Send + Sync>;

/// One endpoint a component contributes: method, path relative to the
/// component's mount point, and the handler. Handlers are plain async
/// closures built in constructors; there is no route metadata beyond
/// this struct.
#[derive(Clone)]
pub struct EndpointSpec {
    pub method: Method,
    pub path: String,
    pub handler: EndpointHandler,
}

impl EndpointSpec {
    pub fn new(method: Method, path: impl Into<String>, handler: EndpointHandler) -> Self {
        Self {
            method,
            path: path.into(),
            handler,
        }
    }

    fn from_fn<F, Fut>(method: Method, path: impl Into<String>, f: F) -> Self
    where
        F: Fn(EndpointRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TwinResult<EndpointResponse>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(
            method,
            path,
            Arc::new(move |req| {
                let f = f.clone();
                Box::pin(async move { f(req).await })
            }),
        )
    }

    pub fn get<F, Fut>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(EndpointRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TwinResult<EndpointResponse>> + Send + 'static,
    {
        Self::from_fn(Method::Get, path, f)
    }

    pub fn post<F, Fut>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(EndpointRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TwinResult<EndpointResponse>> + Send + 'static,
    {
        Self::from_fn(Method::Post, path, f)
    }

    pub fn put<F, Fut>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(EndpointRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TwinResult<EndpointResponse>> + Send + 'static,
    {
        Self::from_fn(Method::Put, path, f)
    }

    pub fn patch<F, Fut>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(EndpointRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TwinResult<EndpointResponse>> + Send + 'static,
    {
        Self::from_fn(Method::Patch, path, f)
    }

    pub fn delete<F, Fut>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(EndpointRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TwinResult<EndpointResponse>> + Send + 'static,
    {
        Self::from_fn(Method::Delete, path, f)
    }
}

impl std::fmt::Debug for EndpointSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointSpec")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Bare request for handler tests.
    pub fn request(method: Method, path: &str) -> EndpointRequest {
        EndpointRequest {
            method,
            path: path.to_string(),
            headers: RequestHeaders::new(),
            params: HashMap::new(),
            query: HashMap::new(),
            body: Bytes::new(),
            caller: None,
        }
    }

    pub fn caller(id: i64, external_id: &str, is_admin: bool) -> Caller {
        let now = chrono::Utc::now();
        Caller {
            user: User {
                id,
                external_id: external_id.to_string(),
                created_at: now,
                updated_at: now,
                roles: if is_admin {
                    vec!["admin".to_string()]
                } else {
                    vec![]
                },
            },
            is_admin,
        }
    }
}
