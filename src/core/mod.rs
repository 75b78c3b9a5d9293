// Protocol layers: request building, decoding, version control, batch classification.
pub mod atom;
pub mod batch;
pub mod config;
pub mod error;
pub mod format;
pub mod model;
pub mod request;
pub mod transport;
pub mod version;
