//! Purpose: Define the request/response envelope and the transport seam.
//! Exports: `Method`, `Request`, `Headers`, `Response`, `Transport`, `HttpTransport`.
//! Role: The only suspension point of the client; everything above is pure or awaits this.
//! Invariants: Response headers are multi-valued and matched case-insensitively.
//! Invariants: Non-2xx statuses are returned as responses, never as transport errors.
//! Invariants: A failed write is reported as `Indeterminate`, never as success.
use crate::core::error::{Error, ErrorKind};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io::Read;
use std::time::Duration;
use tracing::debug;
use url::Url;

type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn is_write(self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive, multi-valued header map. Names are stored lowercased.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Headers {
    entries: BTreeMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replaces every existing value for `name`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .insert(name.to_ascii_lowercase(), vec![value.into()]);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.entries.remove(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(name, values)| {
            values
                .iter()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }
}

#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<String>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
            .map(|value| value.split(';').next().unwrap_or(value).trim())
    }

    pub fn last_modified_version(&self) -> Option<u64> {
        self.numeric_header("Last-Modified-Version")
    }

    pub fn total_results(&self) -> Option<u64> {
        self.numeric_header("Total-Results")
    }

    pub fn backoff(&self) -> Option<Duration> {
        self.numeric_header("Backoff").map(Duration::from_secs)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.numeric_header("Retry-After").map(Duration::from_secs)
    }

    fn numeric_header(&self, name: &str) -> Option<u64> {
        self.header(name).and_then(|value| value.trim().parse().ok())
    }
}

/// Performs exactly one HTTP exchange.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> impl Future<Output = ApiResult<Response>> + Send;
}

/// Blocking `ureq` agent driven from the tokio blocking pool.
#[derive(Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirects(0)
            .build();
        Self { agent }
    }

    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: Request) -> impl Future<Output = ApiResult<Response>> + Send {
        let agent = self.agent.clone();
        async move {
            let method = request.method;
            let url = request.url.clone();
            let joined = tokio::task::spawn_blocking(move || send_blocking(&agent, request)).await;
            match joined {
                Ok(result) => result,
                Err(err) => Err(transport_failure(method, &url, "transport task failed")
                    .with_source(err)),
            }
        }
    }
}

fn send_blocking(agent: &ureq::Agent, request: Request) -> ApiResult<Response> {
    let mut call = agent.request(request.method.as_str(), request.url.as_str());
    for (name, value) in request.headers.iter() {
        call = call.set(name, value);
    }
    let result = match &request.body {
        Some(body) => call.send_string(body),
        None => call.call(),
    };
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(err)) => {
            return Err(
                transport_failure(request.method, &request.url, "request failed").with_source(err)
            );
        }
    };

    read_response(response, request.method, &request.url)
}

fn read_response(response: ureq::Response, method: Method, url: &Url) -> ApiResult<Response> {
    let status = response.status();
    let mut headers = Headers::new();
    // `headers_names` repeats a name once per occurrence; `all` already yields every value.
    for name in response.headers_names() {
        if headers.contains(&name) {
            continue;
        }
        for value in response.all(&name) {
            headers.append(&name, value);
        }
    }
    // `into_string` caps bodies at 10 MB; unpaged key listings can exceed that.
    let mut body = String::new();
    response
        .into_reader()
        .read_to_string(&mut body)
        .map_err(|err| {
            transport_failure(method, url, "failed to read response body").with_source(err)
        })?;
    debug!(status, %url, "response received");
    Ok(Response {
        status,
        headers,
        body,
    })
}

/// Reads fail loudly; writes become indeterminate since the server may have applied them.
pub fn transport_failure(method: Method, url: &Url, message: &str) -> Error {
    let kind = if method.is_write() {
        ErrorKind::Indeterminate
    } else {
        ErrorKind::Io
    };
    Error::new(kind).with_message(format!("{message}: {method} {url}"))
}
