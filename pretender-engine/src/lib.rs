#![deny(clippy::all)]
#![warn(nonstandard_style, rust_2018_idioms)]

//! The Pretender engine: a drop-in DynamoDB emulation backed by a
//! relational database.
//!
//! Items live in per-table SQL relations, change-data events flow through
//! a sequenced stream log, and selected attributes are transparently
//! envelope-encrypted at rest. The [`service::Pretender`] façade is the
//! typed entry point; a front-end deserializes wire requests into the
//! `pretender_model` input types, calls the façade, and serializes the
//! outputs (or [`error::EngineError::wire_shape`]) back out.

/// Consumed-capacity arithmetic.
pub mod capacity;
/// Typed runtime configuration.
pub mod config;
/// Attribute-level envelope encryption.
pub mod crypto;
/// The engine error taxonomy.
pub mod error;
/// Expression parsing and evaluation.
pub mod expr;
/// Item data-plane operations.
pub mod item;
/// The keys-service collaborator contract.
pub mod keys;
/// Background TTL expiry and stream trimming.
pub mod retention;
/// The typed operation façade.
pub mod service;
/// SQL storage: schema provisioning and data access.
pub mod storage;
/// Change-data capture and the stream read surface.
pub mod stream;
/// Table metadata lifecycle.
pub mod table;

pub use config::Config;
pub use error::{EngineError, Result};
pub use service::Pretender;
