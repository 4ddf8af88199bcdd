#![deny(rust_2018_idioms)]

//! Typed definitions for the Pretender data plane and control plane.
//!
//! Pretender speaks the DynamoDB JSON API; this crate holds the
//! `AttributeValue` tagged union with its canonical JSON codec, table
//! metadata, stream record shapes, and the input/output structures for
//! every supported operation. The engine crate consumes these types; a
//! front-end can serialize them straight onto the wire.

pub(crate) mod custom_serde;

/// DynamoDB attribute values and the canonical JSON item codec.
pub mod attr;

/// Operation inputs and outputs for the client surface.
pub mod ops;

/// Stream record and stream description shapes.
pub mod stream;

/// Table metadata and table description shapes.
pub mod table;

pub use attr::{AttributeValue, Item};
pub use table::{StreamViewType, TableMetadata};
