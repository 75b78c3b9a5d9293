//! Purpose: Define the immutable per-session configuration.
//! Exports: `SessionConfig`, `RootCredentials`, `KeyPlacement`, defaults.
//! Role: Replaces ambient mutable API-key/version state with an explicit value.
//! Invariants: Base URLs are http(s) and always end with `/`.
//! Invariants: Builder methods return new values; a config never changes after use.
use crate::core::error::{Error, ErrorKind};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

type ApiResult<T> = Result<T, Error>;

pub const DEFAULT_API_VERSION: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, PartialEq, Eq)]
pub struct RootCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RootCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the ambient API key travels on ordinary requests.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPlacement {
    #[default]
    Bearer,
    ApiKeyHeader,
    Query,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    base_url: Url,
    api_key: Option<String>,
    api_version: u32,
    schema_version: Option<u32>,
    root: Option<RootCredentials>,
    key_placement: KeyPlacement,
    timeout: Duration,
    user_agent: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    base_url: String,
    api_key: Option<String>,
    api_version: Option<u32>,
    schema_version: Option<u32>,
    root_user: Option<String>,
    root_password: Option<String>,
    key_placement: Option<KeyPlacement>,
    timeout_ms: Option<u64>,
}

impl SessionConfig {
    pub fn new(base_url: impl AsRef<str>) -> ApiResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.as_ref())?,
            api_key: None,
            api_version: DEFAULT_API_VERSION,
            schema_version: None,
            root: None,
            key_placement: KeyPlacement::default(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("zapi/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Reads `ZAPI_*` environment variables; `ZAPI_BASE_URL` is required.
    pub fn from_env() -> ApiResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ApiResult<Self> {
        let file = read_file_config(path.as_ref())?;
        Self::new(&file.base_url)?.with_file(file)
    }

    /// Environment first, then the optional JSON file over it.
    /// `base_url` wins over both when given; any `ZAPI_*` value that is set must still parse.
    pub fn from_layers(path: Option<&Path>, base_url: Option<&str>) -> ApiResult<Self> {
        Self::layered(|name| std::env::var(name).ok(), path, base_url)
    }

    fn layered(
        lookup: impl Fn(&str) -> Option<String>,
        path: Option<&Path>,
        base_url: Option<&str>,
    ) -> ApiResult<Self> {
        let file = path.map(read_file_config).transpose()?;
        let base_url = base_url
            .map(str::to_string)
            .or_else(|| file.as_ref().map(|file| file.base_url.clone()));
        let config = Self::from_lookup(|name| match (name, &base_url) {
            ("ZAPI_BASE_URL", Some(url)) => Some(url.clone()),
            _ => lookup(name),
        })?;
        match file {
            Some(file) => config.with_file(file),
            None => Ok(config),
        }
    }

    fn with_file(mut self, file: FileConfig) -> ApiResult<Self> {
        if file.api_key.is_some() {
            self.api_key = file.api_key;
        }
        if let Some(version) = file.api_version {
            self.api_version = version;
        }
        if file.schema_version.is_some() {
            self.schema_version = file.schema_version;
        }
        if let Some(placement) = file.key_placement {
            self.key_placement = placement;
        }
        if let Some(timeout_ms) = file.timeout_ms {
            self.timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(root) = root_from_parts(file.root_user, file.root_password)? {
            self.root = Some(root);
        }
        Ok(self)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ApiResult<Self> {
        let base_url = lookup("ZAPI_BASE_URL").ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message("ZAPI_BASE_URL is not set")
        })?;
        let mut config = Self::new(base_url)?;
        config.api_key = lookup("ZAPI_API_KEY").filter(|key| !key.is_empty());
        if let Some(version) = lookup("ZAPI_API_VERSION") {
            config.api_version = parse_number("ZAPI_API_VERSION", &version)?;
        }
        if let Some(version) = lookup("ZAPI_SCHEMA_VERSION") {
            config.schema_version = Some(parse_number("ZAPI_SCHEMA_VERSION", &version)?);
        }
        if let Some(timeout) = lookup("ZAPI_TIMEOUT_MS") {
            config.timeout = Duration::from_millis(parse_number("ZAPI_TIMEOUT_MS", &timeout)?);
        }
        config.root = root_from_parts(lookup("ZAPI_ROOT_USER"), lookup("ZAPI_ROOT_PASSWORD"))?;
        Ok(config)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn without_api_key(mut self) -> Self {
        self.api_key = None;
        self
    }

    pub fn with_api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = Some(version);
        self
    }

    pub fn with_root(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.root = Some(RootCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_key_placement(mut self, placement: KeyPlacement) -> Self {
        self.key_placement = placement;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn schema_version(&self) -> Option<u32> {
        self.schema_version
    }

    pub fn root(&self) -> Option<&RootCredentials> {
        self.root.as_ref()
    }

    pub fn key_placement(&self) -> KeyPlacement {
        self.key_placement
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

fn read_file_config(path: &Path) -> ApiResult<FileConfig> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("failed to read config file {}", path.display()))
            .with_source(err)
    })?;
    serde_json::from_str(&content).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid config file {}", path.display()))
            .with_source(err)
    })
}

fn normalize_base_url(raw: &str) -> ApiResult<Url> {
    let mut url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid base url: {raw}"))
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(
            Error::new(ErrorKind::Usage).with_message("base url must use http or https scheme")
        );
    }
    if url.cannot_be_a_base() {
        return Err(Error::new(ErrorKind::Usage).with_message("base url cannot be a base"));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> ApiResult<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.trim().parse::<T>().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{name} must be a number, got {value:?}"))
            .with_source(err)
    })
}

fn root_from_parts(
    username: Option<String>,
    password: Option<String>,
) -> ApiResult<Option<RootCredentials>> {
    match (username, password) {
        (Some(username), Some(password)) => Ok(Some(RootCredentials { username, password })),
        (None, None) => Ok(None),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message("root credentials need both a user and a password")),
    }
}
