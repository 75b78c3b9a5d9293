//! Purpose: Client SDK for a versioned, multi-tenant library sync REST protocol.
//! Exports: `core` (protocol machinery), `api` (typed object facade and client).
//! Role: Library crate backing the `zapi` CLI and integration tests.
//! Invariants: All I/O goes through the `Transport` trait; nothing else touches the network.
//! Invariants: Session configuration is immutable once a client is built.
pub mod api;
pub mod core;
