//! Purpose: Session-bound protocol client and privileged (root) operations.
//! Exports: `Client`, `KeyInfo`.
//! Role: Owns the immutable config, request builder, and transport; hands out library handles.
//! Invariants: One client per logical actor; the config never changes after construction.
//! Invariants: Root calls use Basic credentials from the config and fail fast without them.
#![allow(clippy::result_large_err)]

use super::library::{Library, header_form};
use crate::core::config::SessionConfig;
use crate::core::error::{Error, ErrorKind};
use crate::core::format::parse_json;
use crate::core::model::LibraryScope;
use crate::core::request::{Auth, RequestBuilder, RequestOptions};
use crate::core::transport::{HttpTransport, Method, Request, Response, Transport};
use crate::core::version::{Precondition, WriteAck, interpret_write, status_error};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

type ApiResult<T> = Result<T, Error>;

pub struct Client<T = HttpTransport> {
    inner: Arc<ClientInner<T>>,
}

struct ClientInner<T> {
    builder: RequestBuilder,
    transport: T,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Access granted by an API key, as reported by `keys/{key}`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub key: String,
    #[serde(rename = "userID")]
    pub user_id: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub access: Value,
}

impl Client<HttpTransport> {
    pub fn new(config: SessionConfig) -> Self {
        let transport = HttpTransport::new(config.timeout(), config.user_agent());
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: SessionConfig, transport: T) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                builder: RequestBuilder::new(config),
                transport,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        self.inner.builder.config()
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn library(&self, scope: LibraryScope) -> Library<T> {
        Library::new(self.clone(), scope)
    }

    pub fn user(&self, user_id: u64) -> Library<T> {
        self.library(LibraryScope::User(user_id))
    }

    pub fn group(&self, group_id: u64) -> Library<T> {
        self.library(LibraryScope::Group(group_id))
    }

    /// Builds and sends a request for a path relative to the API root.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> ApiResult<Response> {
        let request = self.inner.builder.build(method, path, options);
        self.execute(request).await
    }

    pub(crate) async fn send_scoped(
        &self,
        method: Method,
        scope: LibraryScope,
        path: &str,
        options: RequestOptions,
    ) -> ApiResult<Response> {
        let request = self.inner.builder.build_scoped(method, scope, path, options);
        self.execute(request).await
    }

    pub async fn execute(&self, request: Request) -> ApiResult<Response> {
        self.inner.transport.send(request).await
    }

    /// Looks up what an API key may access. Requires root credentials.
    pub async fn key_info(&self, api_key: &str) -> ApiResult<KeyInfo> {
        let options = RequestOptions::new().auth(self.root_auth()?);
        let response = self
            .send(Method::Get, &format!("keys/{api_key}"), options)
            .await?;
        read_json(&response)
    }

    pub async fn delete_key(&self, api_key: &str) -> ApiResult<WriteAck> {
        let options = RequestOptions::new().auth(self.root_auth()?);
        let response = self
            .send(Method::Delete, &format!("keys/{api_key}"), options)
            .await?;
        interpret_write(&response)
    }

    /// Group metadata, readable with the ambient key.
    pub async fn group_info(&self, group_id: u64) -> ApiResult<Value> {
        let response = self
            .send(Method::Get, &format!("groups/{group_id}"), RequestOptions::new())
            .await?;
        read_json(&response)
    }

    /// Deletes a group and its library. Requires root credentials.
    pub async fn delete_group(
        &self,
        group_id: u64,
        precondition: Precondition,
    ) -> ApiResult<WriteAck> {
        let options =
            header_form(precondition).apply(RequestOptions::new().auth(self.root_auth()?))?;
        let response = self
            .send(Method::Delete, &format!("groups/{group_id}"), options)
            .await?;
        interpret_write(&response)
    }

    fn root_auth(&self) -> ApiResult<Auth> {
        self.config().root().map(Auth::root).ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message("root credentials are not configured")
        })
    }
}

/// Decodes a JSON body after mapping non-success statuses to errors.
pub(crate) fn read_json<R: DeserializeOwned>(response: &Response) -> ApiResult<R> {
    if !response.is_success() {
        return Err(status_error(response));
    }
    parse_json(&response.body).map_err(|err| err.with_status(response.status))
}
