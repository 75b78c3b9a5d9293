//! Purpose: Build fully qualified protocol requests from a session config.
//! Exports: `Auth`, `RequestOptions`, `RequestBuilder`, header name constants.
//! Role: Injects API version, pinned schema version, and credentials into every request.
//! Invariants: Building is pure and infallible; bad input is left for the server to judge.
//! Invariants: Caller-supplied headers are applied last and win over injected ones.
use crate::core::config::{KeyPlacement, RootCredentials, SessionConfig};
use crate::core::model::LibraryScope;
use crate::core::transport::{Headers, Method, Request};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

pub const API_VERSION_HEADER: &str = "Zotero-API-Version";
pub const SCHEMA_VERSION_HEADER: &str = "Zotero-Schema-Version";
pub const API_KEY_HEADER: &str = "Zotero-API-Key";
pub const WRITE_TOKEN_HEADER: &str = "Zotero-Write-Token";
pub const IF_UNMODIFIED_SINCE_VERSION: &str = "If-Unmodified-Since-Version";
pub const IF_MODIFIED_SINCE_VERSION: &str = "If-Modified-Since-Version";
pub const LAST_MODIFIED_VERSION: &str = "Last-Modified-Version";
pub const IF_MATCH: &str = "If-Match";
pub const IF_NONE_MATCH: &str = "If-None-Match";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Auth {
    /// Use the session's API key, placed per `KeyPlacement`.
    #[default]
    Ambient,
    Basic {
        username: String,
        password: String,
    },
    /// Send no credential at all.
    Anonymous,
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Auth::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn root(credentials: &RootCredentials) -> Self {
        Auth::basic(credentials.username.clone(), credentials.password.clone())
    }
}

#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub headers: Headers,
    pub auth: Auth,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn queries(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// File uploads: replace only when the stored file has this MD5.
    pub fn if_match(self, md5: impl Into<String>) -> Self {
        self.header(IF_MATCH, md5)
    }

    /// File uploads: `*` means "only if no file exists yet".
    pub fn if_none_match(self, etag: impl Into<String>) -> Self {
        self.header(IF_NONE_MATCH, etag)
    }
}

#[derive(Clone, Debug)]
pub struct RequestBuilder {
    config: SessionConfig,
}

impl RequestBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Builds a request for a path under a library scope, e.g. `items/ABCD2345`.
    pub fn build_scoped(
        &self,
        method: Method,
        scope: LibraryScope,
        path: &str,
        options: RequestOptions,
    ) -> Request {
        let full = if path.is_empty() {
            scope.path_prefix()
        } else {
            format!("{}/{}", scope.path_prefix(), path.trim_start_matches('/'))
        };
        self.build(method, &full, options)
    }

    /// Builds a request for a path relative to the API root.
    pub fn build(&self, method: Method, path: &str, options: RequestOptions) -> Request {
        let mut url = self.config.base_url().clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
        }

        let mut headers = Headers::new();
        headers.set(API_VERSION_HEADER, self.config.api_version().to_string());
        if let Some(schema) = self.config.schema_version() {
            headers.set(SCHEMA_VERSION_HEADER, schema.to_string());
        }

        let mut key_param = None;
        match &options.auth {
            Auth::Ambient => {
                if let Some(key) = self.config.api_key() {
                    match self.config.key_placement() {
                        KeyPlacement::Bearer => {
                            headers.set("Authorization", format!("Bearer {key}"));
                        }
                        KeyPlacement::ApiKeyHeader => headers.set(API_KEY_HEADER, key),
                        KeyPlacement::Query => key_param = Some(key.to_string()),
                    }
                }
            }
            Auth::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                headers.set("Authorization", format!("Basic {encoded}"));
            }
            Auth::Anonymous => {}
        }

        if options.body.is_some() {
            headers.set("Content-Type", "application/json");
        }

        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &options.query {
                pairs.append_pair(name, value);
            }
            if let Some(key) = &key_param {
                pairs.append_pair("key", key);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        for (name, value) in options.headers.iter() {
            headers.set(name, value);
        }

        debug!(
            %method,
            %url,
            auth = auth_label(&options.auth, self.config.api_key().is_some()),
            conditional = headers.contains(IF_UNMODIFIED_SINCE_VERSION),
            "request built"
        );

        Request {
            method,
            url,
            headers,
            body: options.body,
        }
    }
}

fn auth_label(auth: &Auth, has_key: bool) -> &'static str {
    match auth {
        Auth::Ambient if has_key => "api-key",
        Auth::Ambient => "none",
        Auth::Basic { .. } => "basic",
        Auth::Anonymous => "anonymous",
    }
}
