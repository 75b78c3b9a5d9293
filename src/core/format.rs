//! Purpose: Map negotiated output formats to decoding rules for response bodies.
//! Exports: `Format`, `Decoded`, `decode`, `decode_auto`, `parse_json`, `parse_keys`.
//! Role: Format Negotiator between the transport envelope and typed results.
//! Invariants: Format names are a closed allow-list; anything else is a usage error.
//! Invariants: Every body that fails to parse is logged raw before the error propagates.
//! Invariants: A mismatched Content-Type is a hard error, never coerced.
use crate::core::atom::AtomDocument;
use crate::core::error::{Error, ErrorKind};
use crate::core::model::ObjectKey;
use crate::core::transport::Response;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    Json,
    Atom,
    Keys,
    Versions,
    Raw,
}

impl Format {
    pub const ALL: [Format; 5] = [
        Format::Json,
        Format::Atom,
        Format::Keys,
        Format::Versions,
        Format::Raw,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Atom => "atom",
            Format::Keys => "keys",
            Format::Versions => "versions",
            Format::Raw => "raw",
        }
    }

    /// Value for the `format` query parameter; `Raw` leaves the server default.
    pub fn query_value(self) -> Option<&'static str> {
        match self {
            Format::Raw => None,
            other => Some(other.name()),
        }
    }

    /// Content types this format accepts from the server.
    pub fn content_types(self) -> &'static [&'static str] {
        match self {
            Format::Json | Format::Versions => &["application/json"],
            Format::Atom => &["application/atom+xml", "application/xml", "text/xml"],
            Format::Keys => &["text/plain"],
            Format::Raw => &[],
        }
    }

    /// Infers the format from a self-describing response's Content-Type.
    pub fn from_content_type(content_type: &str) -> ApiResult<Self> {
        let content_type = content_type.trim().to_ascii_lowercase();
        [Format::Json, Format::Atom, Format::Keys]
            .into_iter()
            .find(|format| format.content_types().contains(&content_type.as_str()))
            .ok_or_else(|| {
                Error::new(ErrorKind::Parse)
                    .with_message(format!("unsupported content type: {content_type}"))
            })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Format::ALL
            .into_iter()
            .find(|format| format.name() == value)
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage).with_message(format!(
                    "unsupported format {value:?}; expected one of json, atom, keys, versions, raw"
                ))
            })
    }
}

#[derive(Clone, Debug)]
pub enum Decoded {
    Json(Value),
    Atom(AtomDocument),
    Keys(Vec<ObjectKey>),
    Versions(BTreeMap<String, u64>),
    Raw(Response),
}

pub fn decode(response: Response, format: Format) -> ApiResult<Decoded> {
    if format == Format::Raw {
        return Ok(Decoded::Raw(response));
    }
    check_content_type(&response, format)?;
    match format {
        Format::Json => parse_json(&response.body).map(Decoded::Json),
        Format::Atom => AtomDocument::parse(&response.body).map(Decoded::Atom),
        Format::Keys => parse_keys(&response.body).map(Decoded::Keys),
        Format::Versions => parse_json(&response.body).map(Decoded::Versions),
        Format::Raw => Ok(Decoded::Raw(response)),
    }
}

/// Decodes using the response's own Content-Type.
pub fn decode_auto(response: Response) -> ApiResult<Decoded> {
    let content_type = response.content_type().ok_or_else(|| {
        unparsable("response has no content type", &response.body).with_status(response.status)
    })?;
    let format = Format::from_content_type(content_type).map_err(|err| {
        let message = err.message().unwrap_or("unknown content type").to_string();
        unparsable(message, &response.body).with_status(response.status)
    })?;
    decode(response, format)
}

fn check_content_type(response: &Response, format: Format) -> ApiResult<()> {
    let Some(content_type) = response.content_type() else {
        return Ok(());
    };
    let content_type = content_type.to_ascii_lowercase();
    if format.content_types().contains(&content_type.as_str()) {
        return Ok(());
    }
    Err(unparsable(
        format!("expected {format} response, got content type {content_type}"),
        &response.body,
    )
    .with_status(response.status))
}

pub fn parse_json<T: DeserializeOwned>(body: &str) -> ApiResult<T> {
    serde_json::from_str(body)
        .map_err(|err| unparsable(format!("invalid response json: {err}"), body).with_source(err))
}

/// Newline-separated keys; blank lines and trailing separators are ignored.
pub fn parse_keys(body: &str) -> ApiResult<Vec<ObjectKey>> {
    body.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            ObjectKey::parse(line)
                .map_err(|_| unparsable(format!("invalid key in keys response: {line:?}"), body))
        })
        .collect()
}

/// Parse error carrying the raw body, logged before it propagates.
pub(crate) fn unparsable(message: impl Into<String>, body: &str) -> Error {
    let err = Error::new(ErrorKind::Parse)
        .with_message(message)
        .with_body(body);
    log_unparsable(body, &err);
    err
}

pub(crate) fn log_unparsable(body: &str, err: &Error) {
    warn!(
        error = %err.message().unwrap_or("parse failure"),
        raw_body = %body,
        "unparsable response body"
    );
}
