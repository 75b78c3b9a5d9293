//! Purpose: Define library scopes, object kinds, keys, and typed object payloads.
//! Exports: `LibraryScope`, `ObjectKind`, `ObjectKey`, `ObjectData`, payload structs.
//! Role: Schema layer; request bodies are built from these types and serialized.
//! Invariants: Object keys are exactly 8 chars from `KEY_ALPHABET`.
//! Invariants: A child item (one with `parentItem`) never carries collections.
//! Invariants: `deleted` absent means not trashed.
use crate::core::error::{Error, ErrorKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

type ApiResult<T> = Result<T, Error>;

pub const KEY_ALPHABET: &str = "23456789ABCDEFGHIJKLMNPQRSTUVWXYZ";
pub const KEY_LEN: usize = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LibraryScope {
    User(u64),
    Group(u64),
}

impl LibraryScope {
    /// Path prefix relative to the API root, e.g. `users/12`.
    pub fn path_prefix(&self) -> String {
        match self {
            LibraryScope::User(id) => format!("users/{id}"),
            LibraryScope::Group(id) => format!("groups/{id}"),
        }
    }
}

impl fmt::Display for LibraryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryScope::User(id) => write!(f, "user:{id}"),
            LibraryScope::Group(id) => write!(f, "group:{id}"),
        }
    }
}

impl FromStr for LibraryScope {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) = value.split_once(':').ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("library scope must be user:<id> or group:<id>, got {value}"))
        })?;
        let id = id.parse::<u64>().map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid library id: {id}"))
                .with_source(err)
        })?;
        match kind {
            "user" => Ok(LibraryScope::User(id)),
            "group" => Ok(LibraryScope::Group(id)),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unknown library scope kind: {kind}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Item,
    Collection,
    Search,
    Setting,
    Tag,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 5] = [
        ObjectKind::Item,
        ObjectKind::Collection,
        ObjectKind::Search,
        ObjectKind::Setting,
        ObjectKind::Tag,
    ];

    pub fn singular(self) -> &'static str {
        match self {
            ObjectKind::Item => "item",
            ObjectKind::Collection => "collection",
            ObjectKind::Search => "search",
            ObjectKind::Setting => "setting",
            ObjectKind::Tag => "tag",
        }
    }

    /// Plural name, which is also the path segment and legacy batch envelope key.
    pub fn plural(self) -> &'static str {
        match self {
            ObjectKind::Item => "items",
            ObjectKind::Collection => "collections",
            ObjectKind::Search => "searches",
            ObjectKind::Setting => "settings",
            ObjectKind::Tag => "tags",
        }
    }

    /// Per-kind version property accepted by older protocol generations.
    pub fn version_property(self) -> Option<&'static str> {
        match self {
            ObjectKind::Item => Some("itemVersion"),
            ObjectKind::Collection => Some("collectionVersion"),
            ObjectKind::Search => Some("searchVersion"),
            ObjectKind::Setting => Some("settingVersion"),
            ObjectKind::Tag => None,
        }
    }

    /// Tags are weak relations with no version of their own.
    pub fn is_versioned(self) -> bool {
        !matches!(self, ObjectKind::Tag)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ObjectKind::ALL
            .into_iter()
            .find(|kind| kind.singular() == value || kind.plural() == value)
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage).with_message(format!("unknown object kind: {value}"))
            })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn parse(value: &str) -> ApiResult<Self> {
        if value.len() != KEY_LEN || !value.chars().all(|ch| KEY_ALPHABET.contains(ch)) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid object key: {value:?}")));
        }
        Ok(Self(value.to_string()))
    }

    /// Draws a fresh key from OS randomness, for idempotent PUT-create.
    pub fn generate() -> ApiResult<Self> {
        let mut key = String::with_capacity(KEY_LEN);
        let mut bytes = [0u8; KEY_LEN * 2];
        while key.len() < KEY_LEN {
            getrandom::fill(&mut bytes).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message(format!("failed to draw random key: {err}"))
            })?;
            push_key_chars(&mut key, &bytes);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Skips bytes past the last whole multiple of the alphabet size, so no char is favored.
fn push_key_chars(key: &mut String, bytes: &[u8]) {
    let alphabet = KEY_ALPHABET.as_bytes();
    let limit = 256 - 256 % alphabet.len();
    for byte in bytes.iter().map(|byte| usize::from(*byte)) {
        if key.len() == KEY_LEN {
            break;
        }
        if byte < limit {
            key.push(char::from(alphabet[byte % alphabet.len()]));
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ObjectKey::parse(&value)
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.0
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ObjectKey::parse(value)
    }
}

/// Payload types that can be written through the batch and single-object endpoints.
pub trait ObjectData: Serialize + DeserializeOwned + Clone + Send + Sync {
    const KIND: ObjectKind;

    fn key(&self) -> Option<&ObjectKey>;

    fn version(&self) -> Option<u64>;

    fn set_key(&mut self, key: ObjectKey);

    fn set_version(&mut self, version: Option<u64>);

    /// Schema checks that can be made before anything is sent.
    fn validate(&self) -> ApiResult<()> {
        Ok(())
    }
}

fn is_empty_map(map: &BTreeMap<String, Value>) -> bool {
    map.is_empty()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub creator_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Creator {
    pub fn person(
        creator_type: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            creator_type: creator_type.into(),
            first_name: Some(first_name.into()),
            last_name: Some(last_name.into()),
            name: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    pub tag: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tag_type: Option<u8>,
}

impl TagRef {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            tag_type: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ObjectKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_item: Option<ObjectKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creators: Vec<Creator>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<ObjectKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagRef>,
    #[serde(default, skip_serializing_if = "is_empty_map")]
    pub relations: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<String>,
    /// Type-specific fields (`note`, `linkMode`, `annotationText`, `url`, ...).
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl ItemData {
    pub fn new(item_type: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            ..Self::default()
        }
    }

    pub fn note(text: impl Into<String>) -> Self {
        Self::new("note").with_field("note", text.into())
    }

    pub fn attachment(link_mode: LinkMode) -> Self {
        Self::new("attachment").with_field("linkMode", link_mode.as_str())
    }

    pub fn annotation(
        parent: ObjectKey,
        annotation_type: AnnotationType,
        position: Value,
    ) -> Self {
        let mut item = Self::new("annotation")
            .with_parent(parent)
            .with_field("annotationType", annotation_type.as_str())
            .with_field("annotationSortIndex", "00000|000000|00000")
            .with_field("annotationColor", "#ffd400");
        item.fields
            .insert("annotationPosition".to_string(), Value::String(position.to_string()));
        item
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_parent(mut self, parent: ObjectKey) -> Self {
        self.parent_item = Some(parent);
        self
    }

    pub fn with_collection(mut self, collection: ObjectKey) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(TagRef::new(tag));
        self
    }

    pub fn with_creator(mut self, creator: Creator) -> Self {
        self.creators.push(creator);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.unwrap_or(false)
    }

    pub fn date_modified(&self) -> Option<time::OffsetDateTime> {
        self.date_modified.as_deref().and_then(parse_timestamp)
    }
}

impl ObjectData for ItemData {
    const KIND: ObjectKind = ObjectKind::Item;

    fn key(&self) -> Option<&ObjectKey> {
        self.key.as_ref()
    }

    fn version(&self) -> Option<u64> {
        self.version
    }

    fn set_key(&mut self, key: ObjectKey) {
        self.key = Some(key);
    }

    fn set_version(&mut self, version: Option<u64>) {
        self.version = version;
    }

    fn validate(&self) -> ApiResult<()> {
        if self.item_type.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("item requires an itemType"));
        }
        if self.parent_item.is_some() && !self.collections.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("child items cannot be placed in collections"));
        }
        if self.parent_item.is_some() && self.parent_item == self.key {
            return Err(
                Error::new(ErrorKind::Usage).with_message("item cannot be its own parent")
            );
        }
        if self.item_type == "annotation" && self.parent_item.is_none() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("annotations require a parent attachment"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkMode {
    ImportedFile,
    ImportedUrl,
    LinkedFile,
    LinkedUrl,
    Embedded,
}

impl LinkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkMode::ImportedFile => "imported_file",
            LinkMode::ImportedUrl => "imported_url",
            LinkMode::LinkedFile => "linked_file",
            LinkMode::LinkedUrl => "linked_url",
            LinkMode::Embedded => "embedded_image",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AnnotationType {
    Highlight,
    Underline,
    Note,
    Image,
    Ink,
    Text,
}

impl AnnotationType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationType::Highlight => "highlight",
            AnnotationType::Underline => "underline",
            AnnotationType::Note => "note",
            AnnotationType::Image => "image",
            AnnotationType::Ink => "ink",
            AnnotationType::Text => "text",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ObjectKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub name: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "parent_or_false"
    )]
    pub parent_collection: Option<ObjectKey>,
    #[serde(default, skip_serializing_if = "is_empty_map")]
    pub relations: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

impl CollectionData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: ObjectKey) -> Self {
        self.parent_collection = Some(parent);
        self
    }
}

impl ObjectData for CollectionData {
    const KIND: ObjectKind = ObjectKind::Collection;

    fn key(&self) -> Option<&ObjectKey> {
        self.key.as_ref()
    }

    fn version(&self) -> Option<u64> {
        self.version
    }

    fn set_key(&mut self, key: ObjectKey) {
        self.key = Some(key);
    }

    fn set_version(&mut self, version: Option<u64>) {
        self.version = version;
    }

    fn validate(&self) -> ApiResult<()> {
        if self.name.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("collection name is empty"));
        }
        if self.parent_collection.is_some() && self.parent_collection == self.key {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("collection cannot be its own parent"));
        }
        Ok(())
    }
}

// The server encodes "no parent" as `false`.
fn parent_or_false<'de, D>(deserializer: D) -> Result<Option<ObjectKey>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(key) => ObjectKey::parse(&key)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Value::Bool(false) | Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "unexpected parent reference: {other}"
        ))),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCondition {
    pub condition: String,
    pub operator: String,
    pub value: String,
}

impl SearchCondition {
    pub fn new(
        condition: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            condition: condition.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ObjectKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<SearchCondition>,
}

impl SearchData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_condition(mut self, condition: SearchCondition) -> Self {
        self.conditions.push(condition);
        self
    }
}

impl ObjectData for SearchData {
    const KIND: ObjectKind = ObjectKind::Search;

    fn key(&self) -> Option<&ObjectKey> {
        self.key.as_ref()
    }

    fn version(&self) -> Option<u64> {
        self.version
    }

    fn set_key(&mut self, key: ObjectKey) {
        self.key = Some(key);
    }

    fn set_version(&mut self, version: Option<u64>) {
        self.version = version;
    }

    fn validate(&self) -> ApiResult<()> {
        if self.name.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("search name is empty"));
        }
        if self.conditions.is_empty() {
            return Err(
                Error::new(ErrorKind::Usage).with_message("search requires at least one condition")
            );
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettingValue {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl SettingValue {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            version: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullTextContent {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_chars: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chars: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl FullTextContent {
    pub fn paged(content: impl Into<String>, indexed_pages: u32, total_pages: u32) -> Self {
        Self {
            content: content.into(),
            indexed_pages: Some(indexed_pages),
            total_pages: Some(total_pages),
            ..Self::default()
        }
    }

    pub fn chars(content: impl Into<String>) -> Self {
        let content = content.into();
        let total = content.chars().count() as u64;
        Self {
            content,
            indexed_chars: Some(total),
            total_chars: Some(total),
            ..Self::default()
        }
    }
}

pub fn parse_timestamp(value: &str) -> Option<time::OffsetDateTime> {
    time::OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339).ok()
}
