//! Purpose: Library-scoped operations that are not tied to one object kind.
//! Exports: `Library`, `ListParams`, `DeletedLog`, `TagEntry`, `TagMeta`.
//! Role: Hands out typed object sets and covers tags, settings, full-text, and the deleted log.
//! Invariants: `since` and `newer` are separate query parameters and are never merged.
//! Invariants: Tag deletion and setting writes are conditioned on the library version.
#![allow(clippy::result_large_err)]

use super::client::{Client, read_json};
use super::objects::Objects;
use crate::core::error::{Error, ErrorKind};
use crate::core::model::{
    CollectionData, FullTextContent, ItemData, LibraryScope, ObjectData, ObjectKey, ObjectKind,
    SearchData, SettingValue,
};
use crate::core::request::RequestOptions;
use crate::core::transport::{Method, Response, Transport};
use crate::core::version::{Precondition, WriteAck, interpret_write, status_error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type ApiResult<T> = Result<T, Error>;

pub struct Library<T> {
    client: Client<T>,
    scope: LibraryScope,
}

impl<T> Clone for Library<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            scope: self.scope,
        }
    }
}

/// Query parameters shared by listing endpoints, rendered in a fixed order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Objects modified after this library version.
    pub since: Option<u64>,
    /// Sent as its own parameter; servers have not pinned whether it equals `since`.
    pub newer: Option<u64>,
    pub keys: Vec<ObjectKey>,
    pub q: Option<String>,
    pub qmode: Option<String>,
    pub tags: Vec<String>,
    pub item_type: Option<String>,
    pub include_trashed: bool,
    pub limit: Option<u32>,
    pub start: Option<u32>,
    pub sort: Option<String>,
    pub direction: Option<String>,
    /// Export formats embedded in Atom `content`, e.g. `json` or `bib`.
    pub content: Vec<String>,
    pub include: Vec<String>,
    pub extra: Vec<(String, String)>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, version: u64) -> Self {
        self.since = Some(version);
        self
    }

    pub fn newer(mut self, version: u64) -> Self {
        self.newer = Some(version);
        self
    }

    pub fn key(mut self, key: ObjectKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn query(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start(mut self, start: u32) -> Self {
        self.start = Some(start);
        self
    }

    pub fn include_trashed(mut self) -> Self {
        self.include_trashed = true;
        self
    }

    pub fn extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((name.into(), value.into()));
        self
    }

    pub fn to_query(&self, kind: ObjectKind) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(since) = self.since {
            pairs.push(("since".to_string(), since.to_string()));
        }
        if let Some(newer) = self.newer {
            pairs.push(("newer".to_string(), newer.to_string()));
        }
        if !self.keys.is_empty() {
            let joined = self
                .keys
                .iter()
                .map(ObjectKey::as_str)
                .collect::<Vec<_>>()
                .join(",");
            pairs.push((format!("{}Key", kind.singular()), joined));
        }
        if let Some(q) = &self.q {
            pairs.push(("q".to_string(), q.clone()));
        }
        if let Some(qmode) = &self.qmode {
            pairs.push(("qmode".to_string(), qmode.clone()));
        }
        for tag in &self.tags {
            pairs.push(("tag".to_string(), tag.clone()));
        }
        if let Some(item_type) = &self.item_type {
            pairs.push(("itemType".to_string(), item_type.clone()));
        }
        if self.include_trashed {
            pairs.push(("includeTrashed".to_string(), "1".to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(start) = self.start {
            pairs.push(("start".to_string(), start.to_string()));
        }
        if let Some(sort) = &self.sort {
            pairs.push(("sort".to_string(), sort.clone()));
        }
        if let Some(direction) = &self.direction {
            pairs.push(("direction".to_string(), direction.clone()));
        }
        if !self.content.is_empty() {
            pairs.push(("content".to_string(), self.content.join(",")));
        }
        if !self.include.is_empty() {
            pairs.push(("include".to_string(), self.include.join(",")));
        }
        pairs.extend(self.extra.iter().cloned());
        pairs
    }
}

/// Keys removed from the library since a version, per kind.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeletedLog {
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub searches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub settings: Vec<String>,
}

impl DeletedLog {
    pub fn contains(&self, kind: ObjectKind, key: &str) -> bool {
        let list = match kind {
            ObjectKind::Item => &self.items,
            ObjectKind::Collection => &self.collections,
            ObjectKind::Search => &self.searches,
            ObjectKind::Setting => &self.settings,
            ObjectKind::Tag => &self.tags,
        };
        list.iter().any(|entry| entry == key)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagMeta {
    #[serde(rename = "type", default)]
    pub tag_type: u8,
    #[serde(default)]
    pub num_items: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TagEntry {
    pub tag: String,
    #[serde(default)]
    pub meta: TagMeta,
}

impl<T: Transport> Library<T> {
    pub(crate) fn new(client: Client<T>, scope: LibraryScope) -> Self {
        Self { client, scope }
    }

    pub fn scope(&self) -> LibraryScope {
        self.scope
    }

    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    pub fn items(&self) -> Objects<T, ItemData> {
        self.objects()
    }

    pub fn collections(&self) -> Objects<T, CollectionData> {
        self.objects()
    }

    pub fn searches(&self) -> Objects<T, SearchData> {
        self.objects()
    }

    pub fn objects<D: ObjectData>(&self) -> Objects<T, D> {
        Objects::new(self.clone())
    }

    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> ApiResult<Response> {
        self.client
            .send_scoped(method, self.scope, path, options)
            .await
    }

    /// Current library version, read from `Last-Modified-Version`.
    pub async fn version(&self) -> ApiResult<u64> {
        let options = RequestOptions::new()
            .query("format", "keys")
            .query("limit", "1");
        let response = self.send(Method::Get, "items", options).await?;
        if !response.is_success() {
            return Err(status_error(&response));
        }
        response.last_modified_version().ok_or_else(|| {
            Error::new(ErrorKind::Parse)
                .with_message("response has no Last-Modified-Version")
                .with_status(response.status)
        })
    }

    pub async fn deleted(&self, since: u64) -> ApiResult<DeletedLog> {
        let options = RequestOptions::new().query("since", since.to_string());
        let response = self.send(Method::Get, "deleted", options).await?;
        read_json(&response)
    }

    pub async fn tags(&self, params: &ListParams) -> ApiResult<Vec<TagEntry>> {
        let options = RequestOptions::new().queries(params.to_query(ObjectKind::Tag));
        let response = self.send(Method::Get, "tags", options).await?;
        read_json(&response)
    }

    /// Removes tags from every item; conditioned on the library version.
    pub async fn delete_tags(
        &self,
        tags: &[&str],
        precondition: Precondition,
    ) -> ApiResult<WriteAck> {
        let options = header_form(precondition)
            .apply(RequestOptions::new().query("tag", tags.join(" || ")))?;
        let response = self.send(Method::Delete, "tags", options).await?;
        interpret_write(&response)
    }

    pub async fn setting(&self, name: &str) -> ApiResult<SettingValue> {
        let response = self
            .send(Method::Get, &format!("settings/{name}"), RequestOptions::new())
            .await?;
        read_json(&response)
    }

    pub async fn settings(&self) -> ApiResult<BTreeMap<String, SettingValue>> {
        let response = self
            .send(Method::Get, "settings", RequestOptions::new())
            .await?;
        read_json(&response)
    }

    pub async fn put_setting(
        &self,
        name: &str,
        mut value: SettingValue,
        precondition: Precondition,
    ) -> ApiResult<WriteAck> {
        if let Precondition::Property(version) = precondition {
            value.version = Some(version);
        }
        let body = encode(&value)?;
        let options = precondition.apply(RequestOptions::new().body(body))?;
        let response = self
            .send(Method::Put, &format!("settings/{name}"), options)
            .await?;
        interpret_write(&response)
    }

    /// Writes several settings in one request, keyed by setting name.
    pub async fn put_settings(
        &self,
        values: &BTreeMap<String, SettingValue>,
        precondition: Precondition,
    ) -> ApiResult<WriteAck> {
        let body = match precondition {
            Precondition::Property(version) => {
                let versioned: BTreeMap<&String, SettingValue> = values
                    .iter()
                    .map(|(name, value)| {
                        let mut value = value.clone();
                        value.version = Some(version);
                        (name, value)
                    })
                    .collect();
                encode(&versioned)?
            }
            _ => encode(values)?,
        };
        let options = precondition.apply(RequestOptions::new().body(body))?;
        let response = self.send(Method::Post, "settings", options).await?;
        interpret_write(&response)
    }

    pub async fn delete_setting(
        &self,
        name: &str,
        precondition: Precondition,
    ) -> ApiResult<WriteAck> {
        let options = header_form(precondition).apply(RequestOptions::new())?;
        let response = self
            .send(Method::Delete, &format!("settings/{name}"), options)
            .await?;
        interpret_write(&response)
    }

    pub async fn fulltext(&self, key: &ObjectKey) -> ApiResult<FullTextContent> {
        let response = self
            .send(
                Method::Get,
                &format!("items/{key}/fulltext"),
                RequestOptions::new(),
            )
            .await?;
        let mut content: FullTextContent = read_json(&response)?;
        if content.version.is_none() {
            content.version = response.last_modified_version();
        }
        Ok(content)
    }

    pub async fn put_fulltext(
        &self,
        key: &ObjectKey,
        content: &FullTextContent,
        precondition: Precondition,
    ) -> ApiResult<WriteAck> {
        let body = encode(content)?;
        let options = header_form(precondition).apply(RequestOptions::new().body(body))?;
        let response = self
            .send(Method::Put, &format!("items/{key}/fulltext"), options)
            .await?;
        interpret_write(&response)
    }

    /// Full-text versions per item key, changed after `since`.
    pub async fn fulltext_versions(&self, since: u64) -> ApiResult<BTreeMap<String, u64>> {
        let options = RequestOptions::new().query("since", since.to_string());
        let response = self.send(Method::Get, "fulltext", options).await?;
        read_json(&response)
    }
}

/// Bodiless or non-object requests can only carry the header form.
pub(crate) fn header_form(precondition: Precondition) -> Precondition {
    match precondition {
        Precondition::Property(version) => Precondition::Header(version),
        other => other,
    }
}

pub(crate) fn encode<S: Serialize + ?Sized>(value: &S) -> ApiResult<String> {
    serde_json::to_string(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode request json")
            .with_source(err)
    })
}
