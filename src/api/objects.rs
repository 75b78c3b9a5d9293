//! Purpose: Typed create/get/update/delete/search operations for one object kind.
//! Exports: `Objects`, `View`, `WriteOptions`, `WriteToken`, `ReturnFormat`, `WriteOutput`,
//! `Versioned`, `Listing`.
//! Role: Object Facade; composes request building, version control, transport, and decoding.
//! Invariants: Every write states its precondition explicitly; nothing retries on its own.
//! Invariants: Output formats are closed enums; the chosen variant decides the returned shape.
//! Invariants: Batch partial success comes back as a `BatchOutcome`, never as an error.
#![allow(clippy::result_large_err)]

use super::library::{Library, ListParams, encode, header_form};
use crate::core::atom::{AtomDocument, AtomEntry};
use crate::core::batch::{BatchEnvelope, BatchOutcome, MAX_BATCH_SIZE, classify, encode_batch};
use crate::core::error::{Error, ErrorKind};
use crate::core::format::{Decoded, Format, decode, parse_json, unparsable};
use crate::core::model::{AnnotationType, ItemData, LinkMode, ObjectData, ObjectKey, ObjectKind};
use crate::core::request::{RequestOptions, WRITE_TOKEN_HEADER};
use crate::core::transport::{Method, Response, Transport};
use crate::core::version::{
    Precondition, ReadOutcome, WriteAck, condition_read, embed_version, interpret_read,
    interpret_write, status_error,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use tracing::debug;

type ApiResult<T> = Result<T, Error>;

/// Which slice of a kind's objects a listing covers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum View {
    All,
    /// Top-level objects only (no child items, no sub-collections).
    Top,
    /// Soft-deleted objects.
    Trash,
    /// Child items of an item, or sub-collections of a collection.
    Children(ObjectKey),
    /// Items filed in a collection.
    InCollection(ObjectKey),
}

impl View {
    pub fn path(&self, kind: ObjectKind) -> ApiResult<String> {
        let base = kind.plural();
        let path = match (self, kind) {
            (View::All, _) => base.to_string(),
            (View::Top, ObjectKind::Item | ObjectKind::Collection) => format!("{base}/top"),
            (View::Trash, ObjectKind::Item | ObjectKind::Collection) => format!("{base}/trash"),
            (View::Children(key), ObjectKind::Item) => format!("items/{key}/children"),
            (View::Children(key), ObjectKind::Collection) => {
                format!("collections/{key}/collections")
            }
            (View::InCollection(key), ObjectKind::Item) => format!("collections/{key}/items"),
            (view, kind) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("{view:?} is not a listing for {kind}")));
            }
        };
        Ok(path)
    }
}

/// Idempotency token for POST batch writes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WriteToken(String);

impl WriteToken {
    /// 32 lowercase hex characters from OS randomness.
    pub fn generate() -> ApiResult<Self> {
        let mut bytes = [0u8; 16];
        getrandom::fill(&mut bytes).map_err(|err| {
            Error::new(ErrorKind::Internal).with_message(format!("randomness unavailable: {err}"))
        })?;
        let token = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    pub precondition: Precondition,
    pub write_token: Option<WriteToken>,
    pub envelope: BatchEnvelope,
    /// Embed property-form versions as `{kind}Version` instead of `version`.
    pub legacy_version_property: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    pub fn write_token(mut self, token: WriteToken) -> Self {
        self.write_token = Some(token);
        self
    }

    pub fn envelope(mut self, envelope: BatchEnvelope) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn legacy_version_property(mut self) -> Self {
        self.legacy_version_property = true;
        self
    }
}

/// What a create call hands back.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReturnFormat {
    /// The raw write response.
    Response,
    /// The write response body as JSON.
    ResponseJson,
    /// The classified batch outcome.
    Batch,
    /// Key of the created object; any failure becomes an error.
    Key,
    /// The created object re-read as JSON.
    Json,
    /// The created object re-read as an Atom document.
    Atom,
}

impl ReturnFormat {
    pub const ALL: [ReturnFormat; 6] = [
        ReturnFormat::Response,
        ReturnFormat::ResponseJson,
        ReturnFormat::Batch,
        ReturnFormat::Key,
        ReturnFormat::Json,
        ReturnFormat::Atom,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ReturnFormat::Response => "response",
            ReturnFormat::ResponseJson => "responsejson",
            ReturnFormat::Batch => "batch",
            ReturnFormat::Key => "key",
            ReturnFormat::Json => "json",
            ReturnFormat::Atom => "atom",
        }
    }
}

impl fmt::Display for ReturnFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReturnFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ReturnFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage).with_message(format!(
                    "unsupported return format {value:?}; \
                     expected one of response, responsejson, batch, key, json, atom"
                ))
            })
    }
}

#[derive(Clone, Debug)]
pub enum WriteOutput {
    Response(Response),
    ResponseJson(Value),
    Batch(BatchOutcome),
    Key(ObjectKey),
    Json(Value),
    Atom(AtomDocument),
}

/// An object read back with its server-assigned key and version.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<D> {
    pub key: ObjectKey,
    pub version: u64,
    pub data: D,
    /// Server-computed metadata (`meta` in the JSON envelope), `Null` when absent.
    pub meta: Value,
}

#[derive(Clone, Debug)]
pub struct Listing {
    pub decoded: Decoded,
    pub total_results: Option<u64>,
    pub library_version: Option<u64>,
}

pub struct Objects<T, D> {
    library: Library<T>,
    _data: PhantomData<fn() -> D>,
}

impl<T, D> Clone for Objects<T, D> {
    fn clone(&self) -> Self {
        Self {
            library: self.library.clone(),
            _data: PhantomData,
        }
    }
}

impl<T: Transport, D: ObjectData> Objects<T, D> {
    pub(crate) fn new(library: Library<T>) -> Self {
        Self {
            library,
            _data: PhantomData,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        D::KIND
    }

    fn object_path(key: &ObjectKey) -> String {
        format!("{}/{key}", D::KIND.plural())
    }

    /// Writes up to `MAX_BATCH_SIZE` objects in one POST and classifies each index.
    pub async fn write_batch(
        &self,
        objects: &[D],
        options: &WriteOptions,
    ) -> ApiResult<BatchOutcome> {
        let response = self.post_batch(objects, options).await?;
        if !response.is_success() {
            return Err(status_error(&response));
        }
        let outcome = classify(&response, objects.len())?;
        debug!(
            kind = %D::KIND,
            success = outcome.success.len(),
            unchanged = outcome.unchanged.len(),
            failed = outcome.failed.len(),
            library_version = ?outcome.library_version,
            "batch write classified"
        );
        Ok(outcome)
    }

    async fn post_batch(&self, objects: &[D], options: &WriteOptions) -> ApiResult<Response> {
        let mut payload = Vec::with_capacity(objects.len());
        for object in objects {
            object.validate()?;
            let mut value = serde_json::to_value(object).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode object")
                    .with_source(err)
            })?;
            if let Precondition::Property(version) = options.precondition {
                embed_version(
                    &mut value,
                    D::KIND,
                    version,
                    options.legacy_version_property,
                );
            }
            payload.push(value);
        }
        let body = encode_batch(D::KIND, payload, options.envelope)?;
        let mut request = RequestOptions::new().body(body);
        if let Some(token) = &options.write_token {
            request = request.header(WRITE_TOKEN_HEADER, token.as_str());
        }
        let request = options.precondition.apply(request)?;
        self.library
            .send(Method::Post, D::KIND.plural(), request)
            .await
    }

    /// Creates one object and returns the requested shape.
    pub async fn create(&self, object: D, returning: ReturnFormat) -> ApiResult<WriteOutput> {
        self.create_with(object, returning, &WriteOptions::default())
            .await
    }

    pub async fn create_with(
        &self,
        object: D,
        returning: ReturnFormat,
        options: &WriteOptions,
    ) -> ApiResult<WriteOutput> {
        let objects = [object];
        match returning {
            ReturnFormat::Response => {
                let response = self.post_batch(&objects, options).await?;
                Ok(WriteOutput::Response(response))
            }
            ReturnFormat::ResponseJson => {
                let response = self.post_batch(&objects, options).await?;
                if !response.is_success() {
                    return Err(status_error(&response));
                }
                parse_json(&response.body).map(WriteOutput::ResponseJson)
            }
            ReturnFormat::Batch => self
                .write_batch(&objects, options)
                .await
                .map(WriteOutput::Batch),
            ReturnFormat::Key | ReturnFormat::Json | ReturnFormat::Atom => {
                let key = self.create_key(&objects, options).await?;
                match returning {
                    ReturnFormat::Key => Ok(WriteOutput::Key(key)),
                    ReturnFormat::Atom => match self.get(&key, Format::Atom).await? {
                        Decoded::Atom(document) => Ok(WriteOutput::Atom(document)),
                        other => Err(unexpected_decode(other)),
                    },
                    _ => match self.get(&key, Format::Json).await? {
                        Decoded::Json(value) => Ok(WriteOutput::Json(value)),
                        other => Err(unexpected_decode(other)),
                    },
                }
            }
        }
    }

    async fn create_key(&self, objects: &[D], options: &WriteOptions) -> ApiResult<ObjectKey> {
        let outcome = self.write_batch(objects, options).await?.require_all()?;
        outcome.key(0).cloned().ok_or_else(|| {
            Error::new(ErrorKind::Parse).with_message("batch response has no key for index 0")
        })
    }

    /// Creates several objects; indexes in the outcome follow `objects`.
    pub async fn create_many(&self, objects: &[D]) -> ApiResult<BatchOutcome> {
        self.write_batch(objects, &WriteOptions::default()).await
    }

    /// Full replace of one object. `Precondition::Property(0)` creates it under `key`.
    pub async fn put(
        &self,
        key: &ObjectKey,
        mut object: D,
        precondition: Precondition,
    ) -> ApiResult<WriteAck> {
        object.set_key(key.clone());
        object.set_version(None);
        object.validate()?;
        let mut value = serde_json::to_value(&object).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode object")
                .with_source(err)
        })?;
        if let Precondition::Property(version) = precondition {
            embed_version(&mut value, D::KIND, version, false);
        }
        let options = precondition.apply(RequestOptions::new().body(encode(&value)?))?;
        let response = self
            .library
            .send(Method::Put, &Self::object_path(key), options)
            .await?;
        interpret_write(&response)
    }

    /// Partial merge of `changes` into one object.
    pub async fn patch(
        &self,
        key: &ObjectKey,
        mut changes: Value,
        precondition: Precondition,
    ) -> ApiResult<WriteAck> {
        if !changes.is_object() {
            return Err(Error::new(ErrorKind::Usage).with_message("patch body must be an object"));
        }
        if let Precondition::Property(version) = precondition {
            embed_version(&mut changes, D::KIND, version, false);
        }
        let options = precondition.apply(RequestOptions::new().body(encode(&changes)?))?;
        let response = self
            .library
            .send(Method::Patch, &Self::object_path(key), options)
            .await?;
        interpret_write(&response)
    }

    /// Marks an object as trashed; it stays readable via `View::Trash`.
    pub async fn trash(&self, key: &ObjectKey, precondition: Precondition) -> ApiResult<WriteAck> {
        self.patch(key, json!({"deleted": true}), precondition).await
    }

    pub async fn restore(
        &self,
        key: &ObjectKey,
        precondition: Precondition,
    ) -> ApiResult<WriteAck> {
        self.patch(key, json!({"deleted": false}), precondition).await
    }

    /// Hard delete; the key shows up in the library's deleted log afterwards.
    pub async fn delete(&self, key: &ObjectKey, precondition: Precondition) -> ApiResult<WriteAck> {
        let options = header_form(precondition).apply(RequestOptions::new())?;
        let response = self
            .library
            .send(Method::Delete, &Self::object_path(key), options)
            .await?;
        interpret_write(&response)
    }

    /// Hard delete of several objects, conditioned on the library version.
    pub async fn delete_many(
        &self,
        keys: &[ObjectKey],
        precondition: Precondition,
    ) -> ApiResult<WriteAck> {
        if keys.is_empty() || keys.len() > MAX_BATCH_SIZE {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "delete needs between 1 and {MAX_BATCH_SIZE} keys, got {}",
                keys.len()
            )));
        }
        let joined = keys
            .iter()
            .map(ObjectKey::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let options = RequestOptions::new().query(format!("{}Key", D::KIND.singular()), joined);
        let options = header_form(precondition).apply(options)?;
        let response = self
            .library
            .send(Method::Delete, D::KIND.plural(), options)
            .await?;
        interpret_write(&response)
    }

    /// Reads one object in `json`, `atom`, or `raw` form.
    pub async fn get(&self, key: &ObjectKey, format: Format) -> ApiResult<Decoded> {
        if !matches!(format, Format::Json | Format::Atom | Format::Raw) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("format {format} is not available for single objects")));
        }
        let mut options = RequestOptions::new();
        if let Some(value) = format.query_value() {
            options = options.query("format", value);
        }
        let response = self
            .library
            .send(Method::Get, &Self::object_path(key), options)
            .await?;
        if format != Format::Raw && !response.is_success() {
            return Err(status_error(&response));
        }
        decode(response, format)
    }

    pub async fn get_object(&self, key: &ObjectKey) -> ApiResult<Versioned<D>> {
        let options = RequestOptions::new().query("format", "json");
        let response = self
            .library
            .send(Method::Get, &Self::object_path(key), options)
            .await?;
        if !response.is_success() {
            return Err(status_error(&response));
        }
        let fallback = response.last_modified_version();
        let value = parse_json(&response.body)?;
        versioned_from_json(value, fallback)
    }

    /// Reads one object unless it is unchanged since `since`; `None` on 304.
    pub async fn get_if_modified(
        &self,
        key: &ObjectKey,
        since: u64,
    ) -> ApiResult<Option<Versioned<D>>> {
        let options = condition_read(RequestOptions::new().query("format", "json"), Some(since));
        let response = self
            .library
            .send(Method::Get, &Self::object_path(key), options)
            .await?;
        match interpret_read(response)? {
            ReadOutcome::NotModified { .. } => Ok(None),
            ReadOutcome::Modified(response) => {
                let fallback = response.last_modified_version();
                let value = parse_json(&response.body)?;
                versioned_from_json(value, fallback).map(Some)
            }
        }
    }

    /// Reads one object as an Atom entry record.
    pub async fn get_entry(&self, key: &ObjectKey) -> ApiResult<AtomEntry> {
        match self.get(key, Format::Atom).await? {
            Decoded::Atom(document) if document.is_feed() => {
                document.entries()?.into_iter().next().ok_or_else(|| {
                    Error::new(ErrorKind::Parse).with_message("atom feed has no entries")
                })
            }
            Decoded::Atom(document) => AtomEntry::from_element(document.root()),
            other => Err(unexpected_decode(other)),
        }
    }

    pub async fn list(
        &self,
        view: &View,
        params: &ListParams,
        format: Format,
    ) -> ApiResult<Listing> {
        let mut options = RequestOptions::new().queries(params.to_query(D::KIND));
        if let Some(value) = format.query_value() {
            options = options.query("format", value);
        }
        let response = self
            .library
            .send(Method::Get, &view.path(D::KIND)?, options)
            .await?;
        if format != Format::Raw && !response.is_success() {
            return Err(status_error(&response));
        }
        let mut total_results = response.total_results();
        let library_version = response.last_modified_version();
        let decoded = decode(response, format)?;
        if let Decoded::Atom(document) = &decoded {
            total_results = total_results.or_else(|| document.total_results());
        }
        Ok(Listing {
            decoded,
            total_results,
            library_version,
        })
    }

    /// Every listed object must carry its own version.
    pub async fn list_objects(
        &self,
        view: &View,
        params: &ListParams,
    ) -> ApiResult<Vec<Versioned<D>>> {
        let listing = self.list(view, params, Format::Json).await?;
        match listing.decoded {
            Decoded::Json(Value::Array(values)) => values
                .into_iter()
                .map(|value| versioned_from_json(value, None))
                .collect(),
            other => Err(unexpected_decode(other)),
        }
    }

    pub async fn keys(&self, view: &View, params: &ListParams) -> ApiResult<Vec<ObjectKey>> {
        match self.list(view, params, Format::Keys).await?.decoded {
            Decoded::Keys(keys) => Ok(keys),
            other => Err(unexpected_decode(other)),
        }
    }

    pub async fn versions(
        &self,
        view: &View,
        params: &ListParams,
    ) -> ApiResult<BTreeMap<String, u64>> {
        match self.list(view, params, Format::Versions).await?.decoded {
            Decoded::Versions(versions) => Ok(versions),
            other => Err(unexpected_decode(other)),
        }
    }

    /// Quick search over the kind's objects.
    pub async fn search(
        &self,
        query: &str,
        params: &ListParams,
    ) -> ApiResult<Vec<Versioned<D>>> {
        let params = params.clone().query(query);
        self.list_objects(&View::All, &params).await
    }
}

impl<T: Transport> Objects<T, ItemData> {
    pub async fn create_note(
        &self,
        parent: Option<ObjectKey>,
        text: &str,
    ) -> ApiResult<ObjectKey> {
        let mut note = ItemData::note(text);
        if let Some(parent) = parent {
            note = note.with_parent(parent);
        }
        self.create_returning_key(note).await
    }

    pub async fn create_attachment(
        &self,
        parent: Option<ObjectKey>,
        link_mode: LinkMode,
        content_type: &str,
        filename: Option<&str>,
    ) -> ApiResult<ObjectKey> {
        let mut attachment =
            ItemData::attachment(link_mode).with_field("contentType", content_type);
        if let Some(filename) = filename {
            attachment = attachment.with_field("filename", filename);
        }
        if let Some(parent) = parent {
            attachment = attachment.with_parent(parent);
        }
        self.create_returning_key(attachment).await
    }

    /// Annotations always live under an attachment.
    pub async fn create_annotation(
        &self,
        attachment: ObjectKey,
        annotation_type: AnnotationType,
        position: Value,
        text: Option<&str>,
        comment: Option<&str>,
    ) -> ApiResult<ObjectKey> {
        let mut annotation = ItemData::annotation(attachment, annotation_type, position);
        if let Some(text) = text {
            annotation = annotation.with_field("annotationText", text);
        }
        if let Some(comment) = comment {
            annotation = annotation.with_field("annotationComment", comment);
        }
        self.create_returning_key(annotation).await
    }

    async fn create_returning_key(&self, item: ItemData) -> ApiResult<ObjectKey> {
        match self.create(item, ReturnFormat::Key).await? {
            WriteOutput::Key(key) => Ok(key),
            _ => Err(Error::new(ErrorKind::Internal).with_message("create did not return a key")),
        }
    }
}

/// Accepts both the `{key, version, data, meta}` envelope and a bare data object.
/// `fallback_version` is only for single-object reads, where the header names the object.
fn versioned_from_json<D: ObjectData>(
    value: Value,
    fallback_version: Option<u64>,
) -> ApiResult<Versioned<D>> {
    let envelope_key = value.get("key").and_then(Value::as_str).map(str::to_string);
    let envelope_version = value.get("version").and_then(Value::as_u64);
    let meta = value.get("meta").cloned().unwrap_or(Value::Null);
    let data_value = match value.get("data") {
        Some(data) if data.is_object() => data.clone(),
        _ => value.clone(),
    };
    let data: D = serde_json::from_value(data_value).map_err(|err| {
        let message = format!("{} json has unexpected shape: {err}", D::KIND);
        unparsable(message, &value.to_string()).with_source(err)
    })?;
    let key = match (data.key(), envelope_key) {
        (Some(key), _) => key.clone(),
        (None, Some(key)) => ObjectKey::parse(&key)?,
        (None, None) => {
            return Err(unparsable(
                format!("{} json has no key", D::KIND),
                &value.to_string(),
            ));
        }
    };
    let version = envelope_version
        .or(data.version())
        .or(fallback_version)
        .ok_or_else(|| {
            unparsable(format!("{} json has no version", D::KIND), &value.to_string())
        })?;
    Ok(Versioned {
        key,
        version,
        data,
        meta,
    })
}

fn unexpected_decode(decoded: Decoded) -> Error {
    let shape = match decoded {
        Decoded::Json(_) => "json",
        Decoded::Atom(_) => "atom",
        Decoded::Keys(_) => "keys",
        Decoded::Versions(_) => "versions",
        Decoded::Raw(_) => "raw",
    };
    Error::new(ErrorKind::Parse).with_message(format!("unexpected {shape} response shape"))
}
