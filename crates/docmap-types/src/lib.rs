//! Foundation types for docmap.
//!
//! This crate provides the storable primitive shapes shared by the storage
//! collaborator and the document layer. Every other docmap crate depends on
//! `docmap-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- 12-byte document identifier (24 hex characters)
//! - [`Raw`] -- A storable primitive: scalar, identifier, nested mapping, or sequence
//! - [`RawDoc`] -- A storable record (field name to [`Raw`])
//! - [`path`] -- Dotted-path addressing into nested records

pub mod error;
pub mod object;
pub mod path;
pub mod raw;

pub use error::TypeError;
pub use object::ObjectId;
pub use raw::{raw_doc, Raw, RawDoc};
