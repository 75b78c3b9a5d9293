//! Purpose: In-memory library server used by facade integration tests.
//! Exports: `FakeServer`, `client_for`, `root_client_for`, `BASE_URL`.
//! Role: Implements `Transport` so the facade runs end to end without sockets.
//! Invariants: One library version counter; it advances once per request that mutates anything.
//! Invariants: Write decisions go through `core::version::decide`, same table the client documents.
#![allow(dead_code)]

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use zapi::api::{Client, Error, ObjectKey, ObjectKind, Request, Response, SessionConfig, Transport};
use zapi::core::request::{
    API_VERSION_HEADER, IF_MODIFIED_SINCE_VERSION, IF_UNMODIFIED_SINCE_VERSION,
};
use zapi::core::transport::{Method, transport_failure};
use zapi::core::version::{Decision, WriteTarget, decide, embedded_version};

pub const BASE_URL: &str = "http://zapi.test/";
pub const API_KEY: &str = "test-key";
/// Property name the fake rejects with 400, standing in for schema validation.
pub const INVALID_FIELD: &str = "invalidField";
pub const MAX_FIELD_LEN: usize = 255;
pub const ROOT_USER: &str = "root";

#[derive(Clone, Debug)]
struct Stored {
    version: u64,
    data: Map<String, Value>,
}

#[derive(Default)]
struct State {
    library_version: u64,
    objects: BTreeMap<(ObjectKind, String), Stored>,
    deleted: Vec<(ObjectKind, String, u64)>,
    settings: BTreeMap<String, (Value, u64)>,
    fulltext: BTreeMap<String, (Value, u64)>,
    requests: Vec<Request>,
    fail_next: bool,
}

#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

pub fn client_for(server: &FakeServer) -> Client<FakeServer> {
    let config = SessionConfig::new(BASE_URL)
        .expect("config")
        .with_api_key(API_KEY);
    Client::with_transport(config, server.clone())
}

/// Same session plus root credentials for key and group administration.
pub fn root_client_for(server: &FakeServer) -> Client<FakeServer> {
    let config = SessionConfig::new(BASE_URL)
        .expect("config")
        .with_api_key(API_KEY)
        .with_root(ROOT_USER, "root-pw");
    Client::with_transport(config, server.clone())
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake server state")
    }

    pub fn library_version(&self) -> u64 {
        self.lock().library_version
    }

    pub fn object_version(&self, kind: ObjectKind, key: &str) -> Option<u64> {
        self.lock()
            .objects
            .get(&(kind, key.to_string()))
            .map(|stored| stored.version)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.lock().requests.last().cloned()
    }

    /// The next request is dropped as if the connection failed.
    pub fn fail_next_send(&self) {
        self.lock().fail_next = true;
    }

    fn handle(&self, request: Request) -> Result<Response, Error> {
        let mut state = self.lock();
        state.requests.push(request.clone());
        if std::mem::take(&mut state.fail_next) {
            return Err(transport_failure(
                request.method,
                &request.url,
                "connection reset",
            ));
        }
        if request.header(API_VERSION_HEADER).is_none() {
            return Ok(state.reply(400, "API version header missing"));
        }
        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|segments| segments.map(str::to_string).collect())
            .unwrap_or_default();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let rest = match segments.as_slice() {
            ["keys", key] => return Ok(state.key_info(&request, key)),
            ["groups", _id] if request.method == Method::Delete => {
                return Ok(state.delete_group(&request));
            }
            ["users" | "groups", _id, rest @ ..] => rest,
            _ => return Ok(state.reply(404, "Not found")),
        };
        Ok(state.route(&request, rest))
    }
}

impl Transport for FakeServer {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response, Error>> + Send {
        let result = self.handle(request);
        async move { result }
    }
}

impl State {
    fn reply(&self, status: u16, body: &str) -> Response {
        Response::new(status, body)
            .with_header("Last-Modified-Version", self.library_version.to_string())
    }

    fn json_reply(&self, status: u16, body: &Value) -> Response {
        self.reply(status, &body.to_string())
            .with_header("Content-Type", "application/json")
    }

    fn route(&mut self, request: &Request, rest: &[&str]) -> Response {
        match (request.method, rest) {
            (Method::Get, ["deleted"]) => return self.deleted_since(request),
            (Method::Get, ["tags"]) => return self.list_tags(),
            (Method::Delete, ["tags"]) => return self.delete_tags(request),
            (Method::Get, ["settings"]) => return self.all_settings(),
            (Method::Post, ["settings"]) => return self.write_settings(request),
            (Method::Get, ["settings", name]) => return self.get_setting(name),
            (Method::Put, ["settings", name]) => return self.put_setting(request, name),
            (Method::Delete, ["settings", name]) => return self.delete_setting(request, name),
            (Method::Get, ["fulltext"]) => return self.fulltext_versions(request),
            (Method::Get, ["items", key, "fulltext"]) => return self.get_fulltext(key),
            (Method::Put, ["items", key, "fulltext"]) => return self.put_fulltext(request, key),
            _ => {}
        }
        let Some((first, tail)) = rest.split_first() else {
            return self.reply(404, "Not found");
        };
        let Ok(kind) = first.parse::<ObjectKind>() else {
            return self.reply(404, "Not found");
        };
        match (request.method, tail) {
            (Method::Get, []) => self.list(request, kind, |_| true, false),
            (Method::Get, ["top"]) => self.list(
                request,
                kind,
                |stored| !stored.data.contains_key("parentItem"),
                false,
            ),
            (Method::Get, ["trash"]) => self.list(request, kind, is_trashed, true),
            (Method::Get, [key, "children"]) => {
                let key = key.to_string();
                self.list(
                    request,
                    kind,
                    move |stored| stored.data.get("parentItem") == Some(&json!(key)),
                    false,
                )
            }
            (Method::Get, [key, "items"]) if kind == ObjectKind::Collection => {
                let key = key.to_string();
                self.list(
                    request,
                    ObjectKind::Item,
                    move |stored| {
                        stored
                            .data
                            .get("collections")
                            .and_then(Value::as_array)
                            .is_some_and(|keys| keys.contains(&json!(key)))
                    },
                    false,
                )
            }
            (Method::Get, [key]) => self.get_object(request, kind, key),
            (Method::Post, []) => self.write_batch(request, kind),
            (Method::Put, [key]) => self.write_single(request, kind, key, false),
            (Method::Patch, [key]) => self.write_single(request, kind, key, true),
            (Method::Delete, [key]) => self.delete_single(request, kind, key),
            (Method::Delete, []) => self.delete_many(request, kind),
            _ => self.reply(405, "Method not allowed"),
        }
    }

    fn header_version(request: &Request) -> Option<u64> {
        request
            .header(IF_UNMODIFIED_SINCE_VERSION)
            .and_then(|value| value.parse().ok())
    }

    fn rendered(key: &str, stored: &Stored) -> Value {
        let mut data = stored.data.clone();
        data.insert("key".to_string(), json!(key));
        data.insert("version".to_string(), json!(stored.version));
        json!({
            "key": key,
            "version": stored.version,
            "library": {"type": "user", "id": 1},
            "meta": {},
            "data": Value::Object(data),
        })
    }

    fn get_object(&self, request: &Request, kind: ObjectKind, key: &str) -> Response {
        let Some(stored) = self.objects.get(&(kind, key.to_string())) else {
            return self.reply(404, "Not found");
        };
        if let Some(since) = request
            .header(IF_MODIFIED_SINCE_VERSION)
            .and_then(|value| value.parse::<u64>().ok())
            && stored.version <= since
        {
            return self.reply(304, "");
        }
        match request.query_param("format").as_deref() {
            Some("atom") => {
                let content = Value::Object(stored.data.clone()).to_string();
                let body = format!(
                    concat!(
                        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                        r#"<entry xmlns="http://www.w3.org/2005/Atom" "#,
                        r#"xmlns:zapi="http://zotero.org/ns/api">"#,
                        "<title>{key}</title><zapi:key>{key}</zapi:key>",
                        "<zapi:version>{version}</zapi:version>",
                        r#"<content type="application/json">{content}</content></entry>"#,
                    ),
                    key = key,
                    version = stored.version,
                    content = escape_xml(&content),
                );
                self.reply(200, &body)
                    .with_header("Content-Type", "application/atom+xml")
            }
            _ => self.json_reply(200, &Self::rendered(key, stored)),
        }
    }

    fn list(
        &self,
        request: &Request,
        kind: ObjectKind,
        filter: impl Fn(&Stored) -> bool,
        trash_view: bool,
    ) -> Response {
        let include_trashed = request.query_param("includeTrashed").as_deref() == Some("1");
        let since = request
            .query_param("since")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        let wanted_keys: Option<Vec<String>> = request
            .query_param(&format!("{}Key", kind.singular()))
            .map(|joined| joined.split(',').map(str::to_string).collect());
        let matches: Vec<(&String, &Stored)> = self
            .objects
            .iter()
            .filter(|((stored_kind, _), _)| *stored_kind == kind)
            .map(|((_, key), stored)| (key, stored))
            .filter(|(_, stored)| trash_view || include_trashed || !is_trashed(stored))
            .filter(|(_, stored)| stored.version > since)
            .filter(|(key, _)| {
                wanted_keys
                    .as_ref()
                    .is_none_or(|wanted| wanted.iter().any(|w| w == *key))
            })
            .filter(|(_, stored)| filter(stored))
            .collect();
        let total = matches.len().to_string();
        let response = match request.query_param("format").as_deref() {
            Some("keys") => {
                let mut body = String::new();
                for (key, _) in &matches {
                    body.push_str(key);
                    body.push('\n');
                }
                self.reply(200, &body)
                    .with_header("Content-Type", "text/plain")
            }
            Some("versions") => {
                let versions: Map<String, Value> = matches
                    .iter()
                    .map(|(key, stored)| (key.to_string(), json!(stored.version)))
                    .collect();
                self.json_reply(200, &Value::Object(versions))
            }
            _ => {
                let objects: Vec<Value> = matches
                    .iter()
                    .map(|(key, stored)| Self::rendered(key, stored))
                    .collect();
                self.json_reply(200, &Value::Array(objects))
            }
        };
        response.with_header("Total-Results", total)
    }

    fn deleted_since(&self, request: &Request) -> Response {
        let since = request
            .query_param("since")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        let mut log = json!({
            "collections": [],
            "items": [],
            "searches": [],
            "tags": [],
            "settings": [],
        });
        for (kind, key, version) in &self.deleted {
            if *version > since
                && let Some(list) = log[kind.plural()].as_array_mut()
            {
                list.push(json!(key));
            }
        }
        self.json_reply(200, &log)
    }

    fn validate(kind: ObjectKind, data: &Map<String, Value>) -> Option<(u16, String)> {
        if data.contains_key(INVALID_FIELD) {
            return Some((400, format!("Invalid property '{INVALID_FIELD}'")));
        }
        if kind == ObjectKind::Item && !data.contains_key("itemType") {
            return Some((400, "'itemType' property not provided".to_string()));
        }
        let too_long = data
            .values()
            .filter_map(Value::as_str)
            .any(|value| value.len() > MAX_FIELD_LEN);
        if too_long {
            return Some((413, "Field value too long".to_string()));
        }
        None
    }

    fn fresh_key(&self, kind: ObjectKind) -> String {
        loop {
            let key = ObjectKey::generate().expect("key").to_string();
            if !self.objects.contains_key(&(kind, key.clone())) {
                return key;
            }
        }
    }

    fn write_batch(&mut self, request: &Request, kind: ObjectKind) -> Response {
        let body = match request.body.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(body)) => body,
            _ => return self.reply(400, "Invalid JSON"),
        };
        let objects = match body {
            Value::Array(objects) => objects,
            Value::Object(mut map) => match map.remove(kind.plural()) {
                Some(Value::Array(objects)) => objects,
                _ => return self.reply(400, "Uploaded data must be a JSON array"),
            },
            _ => return self.reply(400, "Uploaded data must be a JSON array"),
        };
        let header_version = Self::header_version(request);
        if let Decision::PreconditionFailed { .. } = decide(
            header_version,
            WriteTarget::NewObjects {
                library_version: self.library_version,
            },
        ) {
            return self.reply(412, "Library has been modified since specified version");
        }

        let next_version = self.library_version + 1;
        let mut successful = Map::new();
        let mut success = Map::new();
        let mut unchanged = Map::new();
        let mut failed = Map::new();
        let mut pending = Vec::new();
        for (index, object) in objects.into_iter().enumerate() {
            let index_key = index.to_string();
            let Value::Object(mut data) = object else {
                let failure = json!({"key": null, "code": 400, "message": "Invalid value"});
                failed.insert(index_key, failure);
                continue;
            };
            let expected = embedded_version(&Value::Object(data.clone()), kind).or(header_version);
            strip_meta(kind, &mut data);
            let supplied_key = data
                .remove("key")
                .and_then(|key| key.as_str().map(str::to_string));
            if let Some((code, message)) = Self::validate(kind, &data) {
                failed.insert(
                    index_key,
                    json!({"key": supplied_key, "code": code, "message": message}),
                );
                continue;
            }
            let key = match &supplied_key {
                Some(key) => key.clone(),
                None => self.fresh_key(kind),
            };
            let existing = self.objects.get(&(kind, key.clone()));
            let decision = match (existing, supplied_key.is_some()) {
                (Some(stored), _) => decide(
                    expected,
                    WriteTarget::Object {
                        current: Some(stored.version),
                    },
                ),
                (None, true) if expected.is_some_and(|version| version > 0) => Decision::NotFound,
                (None, _) => Decision::Apply,
            };
            match decision {
                Decision::Apply => {
                    if existing.is_some_and(|stored| stored.data == data) {
                        unchanged.insert(index_key, json!(key));
                    } else {
                        pending.push((index_key, key, data));
                    }
                }
                other => {
                    let code = other.status().unwrap_or(500);
                    failed.insert(
                        index_key,
                        json!({"key": key, "code": code, "message": format!("{other:?}")}),
                    );
                }
            }
        }
        if !pending.is_empty() {
            self.library_version = next_version;
        }
        for (index_key, key, data) in pending {
            let stored = Stored {
                version: next_version,
                data,
            };
            successful.insert(index_key.clone(), Self::rendered(&key, &stored));
            success.insert(index_key, json!(key));
            self.objects.insert((kind, key), stored);
        }
        self.json_reply(
            200,
            &json!({
                "successful": successful,
                "success": success,
                "unchanged": unchanged,
                "failed": failed,
            }),
        )
    }

    fn write_single(
        &mut self,
        request: &Request,
        kind: ObjectKind,
        key: &str,
        merge: bool,
    ) -> Response {
        let mut data = match request.body.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(Value::Object(data))) => data,
            _ => return self.reply(400, "Invalid JSON"),
        };
        let expected = Self::header_version(request)
            .or_else(|| embedded_version(&Value::Object(data.clone()), kind));
        strip_meta(kind, &mut data);
        data.remove("key");
        let current = self
            .objects
            .get(&(kind, key.to_string()))
            .map(|stored| stored.version);
        match decide(expected, WriteTarget::Object { current }) {
            Decision::Apply => {}
            Decision::PreconditionRequired => {
                return self.reply(428, "If-Unmodified-Since-Version not provided");
            }
            Decision::PreconditionFailed { .. } => {
                return self.reply(412, "Object has been modified since specified version");
            }
            Decision::NotFound => return self.reply(404, "Not found"),
        }
        let merged = match (merge, self.objects.get(&(kind, key.to_string()))) {
            (true, Some(stored)) => {
                let mut merged = stored.data.clone();
                merged.extend(data);
                merged
            }
            _ => data,
        };
        if let Some((code, message)) = Self::validate(kind, &merged) {
            return self.reply(code, &message);
        }
        if let Some(stored) = self.objects.get(&(kind, key.to_string()))
            && stored.data == merged
        {
            return self.reply(204, "");
        }
        self.library_version += 1;
        self.objects.insert(
            (kind, key.to_string()),
            Stored {
                version: self.library_version,
                data: merged,
            },
        );
        self.reply(204, "")
    }

    fn delete_single(&mut self, request: &Request, kind: ObjectKind, key: &str) -> Response {
        let current = self
            .objects
            .get(&(kind, key.to_string()))
            .map(|stored| stored.version);
        match decide(Self::header_version(request), WriteTarget::Object { current }) {
            Decision::Apply if current.is_some() => {}
            Decision::Apply | Decision::NotFound => return self.reply(404, "Not found"),
            Decision::PreconditionRequired => {
                return self.reply(428, "If-Unmodified-Since-Version not provided");
            }
            Decision::PreconditionFailed { .. } => {
                return self.reply(412, "Object has been modified since specified version");
            }
        }
        self.library_version += 1;
        self.objects.remove(&(kind, key.to_string()));
        self.deleted
            .push((kind, key.to_string(), self.library_version));
        self.reply(204, "")
    }

    fn delete_many(&mut self, request: &Request, kind: ObjectKind) -> Response {
        let decision = decide(
            Self::header_version(request),
            WriteTarget::Library {
                library_version: self.library_version,
            },
        );
        match decision {
            Decision::Apply => {}
            Decision::PreconditionRequired => {
                return self.reply(428, "If-Unmodified-Since-Version not provided");
            }
            _ => return self.reply(412, "Library has been modified since specified version"),
        }
        let keys: Vec<String> = request
            .query_param(&format!("{}Key", kind.singular()))
            .map(|joined| joined.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        let present: Vec<String> = keys
            .into_iter()
            .filter(|key| self.objects.contains_key(&(kind, key.clone())))
            .collect();
        if present.is_empty() {
            return self.reply(204, "");
        }
        self.library_version += 1;
        for key in present {
            self.objects.remove(&(kind, key.clone()));
            self.deleted.push((kind, key, self.library_version));
        }
        self.reply(204, "")
    }
}

impl State {
    fn precondition_reply(&self, decision: Decision) -> Option<Response> {
        match decision {
            Decision::Apply => None,
            Decision::PreconditionRequired => {
                Some(self.reply(428, "If-Unmodified-Since-Version not provided"))
            }
            Decision::PreconditionFailed { .. } => {
                Some(self.reply(412, "Library has been modified since specified version"))
            }
            Decision::NotFound => Some(self.reply(404, "Not found")),
        }
    }

    fn library_decision(&self, request: &Request) -> Decision {
        decide(
            Self::header_version(request),
            WriteTarget::Library {
                library_version: self.library_version,
            },
        )
    }

    fn is_root(request: &Request) -> bool {
        request
            .header("Authorization")
            .is_some_and(|value| value.starts_with("Basic "))
    }

    fn key_info(&self, request: &Request, key: &str) -> Response {
        if !Self::is_root(request) {
            return self.reply(403, "Forbidden");
        }
        self.json_reply(
            200,
            &json!({
                "key": key,
                "userID": 1,
                "username": "tester",
                "access": {"user": {"library": true, "write": true}},
            }),
        )
    }

    fn delete_group(&self, request: &Request) -> Response {
        if !Self::is_root(request) {
            return self.reply(403, "Forbidden");
        }
        match self.precondition_reply(self.library_decision(request)) {
            Some(response) => response,
            None => self.reply(204, ""),
        }
    }

    fn item_tags(stored: &Stored) -> Vec<(String, u64)> {
        stored
            .data
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| {
                        let name = tag.get("tag")?.as_str()?.to_string();
                        let tag_type = tag.get("type").and_then(Value::as_u64).unwrap_or(0);
                        Some((name, tag_type))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn list_tags(&self) -> Response {
        let mut counts: BTreeMap<(String, u64), u64> = BTreeMap::new();
        for ((kind, _), stored) in &self.objects {
            if *kind != ObjectKind::Item {
                continue;
            }
            for tag in Self::item_tags(stored) {
                *counts.entry(tag).or_default() += 1;
            }
        }
        let entries: Vec<Value> = counts
            .into_iter()
            .map(|((tag, tag_type), num_items)| {
                json!({"tag": tag, "meta": {"type": tag_type, "numItems": num_items}})
            })
            .collect();
        let total = entries.len().to_string();
        self.json_reply(200, &Value::Array(entries))
            .with_header("Total-Results", total)
    }

    fn delete_tags(&mut self, request: &Request) -> Response {
        if let Some(response) = self.precondition_reply(self.library_decision(request)) {
            return response;
        }
        let names: Vec<String> = request
            .query_param("tag")
            .map(|joined| joined.split(" || ").map(str::to_string).collect())
            .unwrap_or_default();
        let next_version = self.library_version + 1;
        let mut removed = Vec::new();
        for ((kind, _), stored) in self.objects.iter_mut() {
            if *kind != ObjectKind::Item {
                continue;
            }
            let Some(Value::Array(tags)) = stored.data.get_mut("tags") else {
                continue;
            };
            let before = tags.len();
            tags.retain(|tag| {
                let name = tag.get("tag").and_then(Value::as_str).unwrap_or_default();
                if names.iter().any(|wanted| wanted == name) {
                    removed.push(name.to_string());
                    false
                } else {
                    true
                }
            });
            if tags.len() != before {
                stored.version = next_version;
            }
        }
        if !removed.is_empty() {
            self.library_version = next_version;
            removed.sort();
            removed.dedup();
            for name in removed {
                self.deleted.push((ObjectKind::Tag, name, next_version));
            }
        }
        self.reply(204, "")
    }

    fn setting_json(value: &Value, version: u64) -> Value {
        json!({"value": value, "version": version})
    }

    fn all_settings(&self) -> Response {
        let settings: Map<String, Value> = self
            .settings
            .iter()
            .map(|(name, (value, version))| (name.clone(), Self::setting_json(value, *version)))
            .collect();
        self.json_reply(200, &Value::Object(settings))
    }

    fn get_setting(&self, name: &str) -> Response {
        match self.settings.get(name) {
            Some((value, version)) => self.json_reply(200, &Self::setting_json(value, *version)),
            None => self.reply(404, "Setting not found"),
        }
    }

    fn setting_decision(&self, name: &str, expected: Option<u64>) -> Decision {
        let current = self.settings.get(name).map(|(_, version)| *version);
        decide(expected, WriteTarget::Object { current })
    }

    fn put_setting(&mut self, request: &Request, name: &str) -> Response {
        let body = match request.body.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(body)) if body.get("value").is_some() => body,
            _ => return self.reply(400, "Invalid setting"),
        };
        let expected = Self::header_version(request)
            .or_else(|| body.get("version").and_then(Value::as_u64));
        if let Some(response) = self.precondition_reply(self.setting_decision(name, expected)) {
            return response;
        }
        self.library_version += 1;
        self.settings
            .insert(name.to_string(), (body["value"].clone(), self.library_version));
        self.reply(204, "")
    }

    /// Header form is checked against the library; property form per setting.
    fn write_settings(&mut self, request: &Request) -> Response {
        let body = match request.body.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(Value::Object(body))) => body,
            _ => return self.reply(400, "Invalid settings"),
        };
        let decision = if Self::header_version(request).is_some() {
            self.library_decision(request)
        } else {
            body.iter()
                .map(|(name, entry)| {
                    self.setting_decision(name, entry.get("version").and_then(Value::as_u64))
                })
                .find(|decision| *decision != Decision::Apply)
                .unwrap_or(Decision::Apply)
        };
        if let Some(response) = self.precondition_reply(decision) {
            return response;
        }
        self.library_version += 1;
        for (name, entry) in body {
            let value = entry.get("value").cloned().unwrap_or(Value::Null);
            self.settings.insert(name, (value, self.library_version));
        }
        self.reply(204, "")
    }

    fn delete_setting(&mut self, request: &Request, name: &str) -> Response {
        let decision = self.setting_decision(name, Self::header_version(request));
        if let Some(response) = self.precondition_reply(decision) {
            return response;
        }
        if self.settings.remove(name).is_none() {
            return self.reply(404, "Setting not found");
        }
        self.library_version += 1;
        self.deleted
            .push((ObjectKind::Setting, name.to_string(), self.library_version));
        self.reply(204, "")
    }

    fn get_fulltext(&self, key: &str) -> Response {
        match self.fulltext.get(key) {
            Some((content, version)) => {
                let mut body = content.clone();
                body["version"] = json!(version);
                self.json_reply(200, &body)
            }
            None => self.reply(404, "Not found"),
        }
    }

    fn put_fulltext(&mut self, request: &Request, key: &str) -> Response {
        if !self.objects.contains_key(&(ObjectKind::Item, key.to_string())) {
            return self.reply(404, "Not found");
        }
        let mut content = match request.body.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(content)) if content.get("content").is_some() => content,
            _ => return self.reply(400, "'content' not provided"),
        };
        let current = self.fulltext.get(key).map(|(_, version)| *version);
        if let (Some(expected), Some(current)) = (Self::header_version(request), current)
            && expected < current
        {
            return self.reply(412, "Full-text content has been modified");
        }
        if let Some(map) = content.as_object_mut() {
            map.remove("version");
        }
        self.library_version += 1;
        self.fulltext
            .insert(key.to_string(), (content, self.library_version));
        self.reply(204, "")
    }

    fn fulltext_versions(&self, request: &Request) -> Response {
        let since = request
            .query_param("since")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        let versions: Map<String, Value> = self
            .fulltext
            .iter()
            .filter(|(_, (_, version))| *version > since)
            .map(|(key, (_, version))| (key.clone(), json!(version)))
            .collect();
        self.json_reply(200, &Value::Object(versions))
    }
}

fn is_trashed(stored: &Stored) -> bool {
    stored.data.get("deleted") == Some(&json!(true))
}

fn strip_meta(kind: ObjectKind, data: &mut Map<String, Value>) {
    data.remove("version");
    if let Some(name) = kind.version_property() {
        data.remove(name);
    }
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
