//! Purpose: Define the stable public Rust API boundary for the protocol client.
//! Exports: Client, library and object handles, plus the core types they return.
//! Role: Public, additive-only surface; callers should not need `core` paths directly.
//! Invariants: Every write operation takes an explicit `Precondition`.
//! Invariants: Formats and return shapes are closed enums validated before sending.

mod client;
mod library;
mod objects;

pub use crate::core::atom::{AtomDocument, AtomEntry, parse_entry, render_entry};
pub use crate::core::batch::{BatchEnvelope, BatchOutcome, Failed, ItemStatus, Written};
pub use crate::core::config::{KeyPlacement, SessionConfig};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::format::{Decoded, Format};
pub use crate::core::model::{
    AnnotationType, CollectionData, Creator, FullTextContent, ItemData, LibraryScope, LinkMode,
    ObjectData, ObjectKey, ObjectKind, SearchCondition, SearchData, SettingValue, TagRef,
};
pub use crate::core::request::{Auth, RequestOptions};
pub use crate::core::transport::{HttpTransport, Method, Request, Response, Transport};
pub use crate::core::version::{Precondition, ReadOutcome, WriteAck};
pub use client::{Client, KeyInfo};
pub use library::{DeletedLog, Library, ListParams, TagEntry, TagMeta};
pub use objects::{
    Listing, Objects, ReturnFormat, Versioned, View, WriteOptions, WriteOutput, WriteToken,
};

pub type ApiResult<T> = Result<T, Error>;
