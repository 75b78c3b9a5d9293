//! Purpose: Encode multi-object write bodies and classify per-item batch outcomes.
//! Exports: `MAX_BATCH_SIZE`, `BatchEnvelope`, `encode_batch`, `classify`, `classify_body`,
//! `BatchOutcome`, `Written`, `Failed`, `ItemStatus`.
//! Role: Batch Result Classifier; partial success is data, not control flow.
//! Invariants: Every submitted index lands in exactly one of success/unchanged/failed.
//! Invariants: The library version advances iff at least one index is a success.
use crate::core::error::{Error, ErrorKind};
use crate::core::format::{log_unparsable, parse_json};
use crate::core::model::{ObjectKey, ObjectKind};
use crate::core::transport::Response;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

type ApiResult<T> = Result<T, Error>;

pub const MAX_BATCH_SIZE: usize = 50;

/// Request body shape for batch writes across protocol generations.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BatchEnvelope {
    /// A bare JSON array of objects.
    #[default]
    Array,
    /// An object keyed by the plural kind name, e.g. `{"items": [...]}`.
    Keyed,
}

pub fn encode_batch(
    kind: ObjectKind,
    objects: Vec<Value>,
    envelope: BatchEnvelope,
) -> ApiResult<String> {
    if objects.is_empty() {
        return Err(
            Error::new(ErrorKind::Usage).with_message("batch write needs at least one object")
        );
    }
    if objects.len() > MAX_BATCH_SIZE {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "batch of {} objects exceeds the limit of {MAX_BATCH_SIZE}",
            objects.len()
        )));
    }
    let body = match envelope {
        BatchEnvelope::Array => Value::Array(objects),
        BatchEnvelope::Keyed => {
            let mut map = Map::new();
            map.insert(kind.plural().to_string(), Value::Array(objects));
            Value::Object(map)
        }
    };
    serde_json::to_string(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode batch body")
            .with_source(err)
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct Written {
    pub key: ObjectKey,
    pub version: Option<u64>,
    /// Full object as echoed back by servers that send `successful`.
    pub data: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Failed {
    pub key: Option<String>,
    pub code: u16,
    pub message: String,
    pub data: Option<Value>,
}

impl Failed {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_status(self.code)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ItemStatus {
    Success,
    Unchanged,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchOutcome {
    pub success: BTreeMap<usize, Written>,
    pub unchanged: BTreeMap<usize, ObjectKey>,
    pub failed: BTreeMap<usize, Failed>,
    pub library_version: Option<u64>,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.success.len() + self.unchanged.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self, index: usize) -> Option<ItemStatus> {
        if self.success.contains_key(&index) {
            Some(ItemStatus::Success)
        } else if self.unchanged.contains_key(&index) {
            Some(ItemStatus::Unchanged)
        } else if self.failed.contains_key(&index) {
            Some(ItemStatus::Failed)
        } else {
            None
        }
    }

    /// Key at `index` for successful or unchanged items.
    pub fn key(&self, index: usize) -> Option<&ObjectKey> {
        self.success
            .get(&index)
            .map(|written| &written.key)
            .or_else(|| self.unchanged.get(&index))
    }

    pub fn advanced_library(&self) -> bool {
        !self.success.is_empty()
    }

    /// Turns the first failure into an error, for callers that need all-or-nothing.
    pub fn require_all(self) -> ApiResult<Self> {
        match self.failed.iter().next() {
            None => Ok(self),
            Some((index, failed)) => {
                let mut err = Error::new(failed.kind())
                    .with_status(failed.code)
                    .with_message(format!("batch index {index} failed: {}", failed.message));
                if let Some(version) = self.library_version {
                    err = err.with_library_version(version);
                }
                Err(err)
            }
        }
    }
}

#[derive(Deserialize)]
struct RawBatch {
    #[serde(default)]
    successful: BTreeMap<String, Value>,
    #[serde(default)]
    success: BTreeMap<String, Value>,
    #[serde(default)]
    unchanged: BTreeMap<String, Value>,
    #[serde(default)]
    failed: BTreeMap<String, RawFailure>,
}

#[derive(Deserialize)]
struct RawFailure {
    #[serde(default)]
    key: Option<Value>,
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Classifies a batch write response for `submitted` objects.
pub fn classify(response: &Response, submitted: usize) -> ApiResult<BatchOutcome> {
    let body: Value = parse_json(&response.body)?;
    classify_body(&body, submitted, response.last_modified_version()).map_err(|err| {
        log_unparsable(&response.body, &err);
        err.with_status(response.status)
            .with_body(response.body.clone())
    })
}

pub fn classify_body(
    body: &Value,
    submitted: usize,
    library_version: Option<u64>,
) -> ApiResult<BatchOutcome> {
    let raw: RawBatch = serde_json::from_value(body.clone()).map_err(|err| {
        Error::new(ErrorKind::Parse)
            .with_message(format!("batch response has unexpected shape: {err}"))
            .with_source(err)
    })?;

    let mut outcome = BatchOutcome {
        library_version,
        ..BatchOutcome::default()
    };

    // `successful` carries full objects; `success` only keys. Prefer the richer form.
    for (index, object) in &raw.successful {
        let index = parse_index(index, submitted)?;
        let key = object
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(index, "successful entry has no key"))?;
        let version = object
            .get("version")
            .and_then(Value::as_u64)
            .or(library_version);
        outcome.success.insert(
            index,
            Written {
                key: parse_key(index, key)?,
                version,
                data: object.get("data").cloned(),
            },
        );
    }
    for (index, key) in &raw.success {
        let index = parse_index(index, submitted)?;
        let key = key
            .as_str()
            .ok_or_else(|| malformed(index, "success entry is not a key"))?;
        let key = parse_key(index, key)?;
        match outcome.success.get(&index) {
            Some(existing) if existing.key != key => {
                return Err(malformed(index, "success and successful disagree on key"));
            }
            Some(_) => {}
            None => {
                outcome.success.insert(
                    index,
                    Written {
                        key,
                        version: library_version,
                        data: None,
                    },
                );
            }
        }
    }
    for (index, key) in &raw.unchanged {
        let index = parse_index(index, submitted)?;
        let key = key
            .as_str()
            .ok_or_else(|| malformed(index, "unchanged entry is not a key"))?;
        ensure_unclassified(&outcome, index)?;
        outcome.unchanged.insert(index, parse_key(index, key)?);
    }
    for (index, failure) in raw.failed {
        let index = parse_index(&index, submitted)?;
        ensure_unclassified(&outcome, index)?;
        let key = failure.key.and_then(|key| match key {
            Value::String(key) => Some(key),
            Value::Null => None,
            other => Some(other.to_string()),
        });
        outcome.failed.insert(
            index,
            Failed {
                key,
                code: failure.code,
                message: failure.message,
                data: failure.data,
            },
        );
    }

    if let Some(missing) = (0..submitted).find(|index| outcome.status(*index).is_none()) {
        return Err(malformed(missing, "index missing from batch response"));
    }
    Ok(outcome)
}

fn ensure_unclassified(outcome: &BatchOutcome, index: usize) -> ApiResult<()> {
    match outcome.status(index) {
        None => Ok(()),
        Some(status) => Err(malformed(
            index,
            &format!("index already classified as {status:?}"),
        )),
    }
}

fn parse_index(raw: &str, submitted: usize) -> ApiResult<usize> {
    let index = raw.parse::<usize>().map_err(|_| {
        Error::new(ErrorKind::Parse).with_message(format!("batch index is not a number: {raw:?}"))
    })?;
    if index >= submitted {
        return Err(malformed(index, &format!("index beyond {submitted} submitted objects")));
    }
    Ok(index)
}

fn parse_key(index: usize, key: &str) -> ApiResult<ObjectKey> {
    ObjectKey::parse(key).map_err(|_| malformed(index, &format!("invalid key {key:?}")))
}

fn malformed(index: usize, message: &str) -> Error {
    Error::new(ErrorKind::Parse).with_message(format!("batch index {index}: {message}"))
}
