//! Purpose: Encode the optimistic-concurrency rules for writes and conditional reads.
//! Exports: `Precondition`, `WriteTarget`, `Decision`, `decide`, `WriteAck`, `ReadOutcome`,
//! `interpret_write`, `interpret_read`, embedded-version helpers.
//! Role: Version Controller; each mutation is conditioned on a version the caller believes current.
//! Invariants: Header form and property form are equivalent; a request uses at most one.
//! Invariants: 412 outcomes always report the server's current library version when known.
//! Invariants: Reads never require a version; 304 is a short-circuit, not a failure.
use crate::core::error::{Error, ErrorKind};
use crate::core::model::ObjectKind;
use crate::core::request::{
    IF_MODIFIED_SINCE_VERSION, IF_UNMODIFIED_SINCE_VERSION, RequestOptions, WRITE_TOKEN_HEADER,
};
use crate::core::transport::Response;
use serde_json::Value;
use tracing::debug;

type ApiResult<T> = Result<T, Error>;

/// How a write states the version it was based on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Precondition {
    /// No version supplied; the server answers 428 for conditioned writes.
    #[default]
    None,
    /// `If-Unmodified-Since-Version: <v>` on the request.
    Header(u64),
    /// `version` embedded in each JSON object of the payload.
    Property(u64),
}

impl Precondition {
    pub fn expected(self) -> Option<u64> {
        match self {
            Precondition::None => None,
            Precondition::Header(version) | Precondition::Property(version) => Some(version),
        }
    }

    /// Adds the header form to a request; property form is applied to the body instead.
    pub fn apply(self, options: RequestOptions) -> ApiResult<RequestOptions> {
        match self {
            Precondition::Header(version) => {
                if options.headers.contains(WRITE_TOKEN_HEADER) {
                    return Err(Error::new(ErrorKind::Usage).with_message(
                        "write tokens cannot be combined with If-Unmodified-Since-Version",
                    ));
                }
                Ok(options.header(IF_UNMODIFIED_SINCE_VERSION, version.to_string()))
            }
            Precondition::None | Precondition::Property(_) => Ok(options),
        }
    }
}

/// Sets the embedded version on one JSON object. `legacy` uses the per-kind property name.
pub fn embed_version(object: &mut Value, kind: ObjectKind, version: u64, legacy: bool) {
    let Some(map) = object.as_object_mut() else {
        return;
    };
    let name = match (legacy, kind.version_property()) {
        (true, Some(name)) => name,
        _ => "version",
    };
    map.insert(name.to_string(), Value::from(version));
}

/// Reads the embedded version under either property name.
pub fn embedded_version(object: &Value, kind: ObjectKind) -> Option<u64> {
    let map = object.as_object()?;
    map.get("version")
        .or_else(|| kind.version_property().and_then(|name| map.get(name)))
        .and_then(Value::as_u64)
}

/// What a conditioned write is aimed at, as seen by the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteTarget {
    /// New objects without keys; a version is optional and checked against the library.
    NewObjects { library_version: u64 },
    /// A keyed object; `current` is `None` when the key does not exist.
    Object { current: Option<u64> },
    /// A library-wide mutation such as tag or multi-object deletion.
    Library { library_version: u64 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    Apply,
    PreconditionRequired,
    PreconditionFailed { current: u64 },
    NotFound,
}

impl Decision {
    pub fn status(self) -> Option<u16> {
        match self {
            Decision::Apply => None,
            Decision::PreconditionRequired => Some(428),
            Decision::PreconditionFailed { .. } => Some(412),
            Decision::NotFound => Some(404),
        }
    }
}

/// The OCC decision table.
///
/// An expected version at or above the current one is accepted; `0` means
/// "must not exist yet" and turns a PUT/PATCH into an explicit create.
pub fn decide(expected: Option<u64>, target: WriteTarget) -> Decision {
    match target {
        WriteTarget::NewObjects { library_version } => match expected {
            Some(version) if version < library_version => Decision::PreconditionFailed {
                current: library_version,
            },
            _ => Decision::Apply,
        },
        WriteTarget::Library { library_version } => match expected {
            None => Decision::PreconditionRequired,
            Some(version) if version < library_version => Decision::PreconditionFailed {
                current: library_version,
            },
            Some(_) => Decision::Apply,
        },
        WriteTarget::Object { current } => match (expected, current) {
            (None, _) => Decision::PreconditionRequired,
            (Some(0), None) => Decision::Apply,
            (Some(_), None) => Decision::NotFound,
            (Some(0), Some(current)) => Decision::PreconditionFailed { current },
            (Some(version), Some(current)) if version < current => {
                Decision::PreconditionFailed { current }
            }
            (Some(_), Some(_)) => Decision::Apply,
        },
    }
}

/// Accepted write as reported by the server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WriteAck {
    pub status: u16,
    pub library_version: Option<u64>,
}

/// Maps a write response to an acknowledgement or a taxonomy error.
pub fn interpret_write(response: &Response) -> ApiResult<WriteAck> {
    let library_version = response.last_modified_version();
    debug!(status = response.status, ?library_version, "write response");
    if response.is_success() {
        return Ok(WriteAck {
            status: response.status,
            library_version,
        });
    }
    Err(status_error(response))
}

#[derive(Clone, Debug)]
pub enum ReadOutcome {
    Modified(Response),
    NotModified { library_version: Option<u64> },
}

/// Adds `If-Modified-Since-Version` when the caller already holds a version.
pub fn condition_read(options: RequestOptions, since: Option<u64>) -> RequestOptions {
    match since {
        Some(version) => options.header(IF_MODIFIED_SINCE_VERSION, version.to_string()),
        None => options,
    }
}

pub fn interpret_read(response: Response) -> ApiResult<ReadOutcome> {
    if response.status == 304 {
        return Ok(ReadOutcome::NotModified {
            library_version: response.last_modified_version(),
        });
    }
    if response.is_success() {
        return Ok(ReadOutcome::Modified(response));
    }
    Err(status_error(&response))
}

/// Builds the taxonomy error for a non-success response, keeping status and raw body.
pub fn status_error(response: &Response) -> Error {
    let kind = ErrorKind::from_status(response.status);
    let mut err = Error::new(kind)
        .with_status(response.status)
        .with_body(response.body.clone());
    let message = match kind {
        ErrorKind::PreconditionRequired => "write requires a version precondition".to_string(),
        ErrorKind::PreconditionFailed => {
            "object or library changed since expected version".to_string()
        }
        ErrorKind::Unexpected => format!("unexpected status {}", response.status),
        _ => response.body.trim().to_string(),
    };
    err = err.with_message(message);
    if let Some(version) = response.last_modified_version() {
        err = err.with_library_version(version);
    }
    err
}
