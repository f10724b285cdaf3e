//! Document state and codec engine for docmap.
//!
//! This crate turns schema-described records into live, mutable documents
//! and back. It never talks to a database on its own: remote work goes
//! through the [`Binding`] a root document carries, in either the blocking
//! or the suspending execution model.
//!
//! # Core Concepts
//!
//! - [`Schema`] -- ordered field table of one document type, built once
//! - [`Codec`] -- per-field behaviour: default, normalize, encode, decode, fake
//! - [`Document`] -- three-tier field state (raw / cache / changed) with
//!   dirty tracking, nested-change propagation and a [`ChangeLog`]
//! - [`List`], [`Set`], [`Map`] -- container values with local and direct
//!   remote operations
//! - [`Reference`], [`ReferenceList`] -- lazy links to other root documents,
//!   deduplicated through a [`ReferenceCache`]
//! - [`Pending`] -- the uniform result of anything that may need storage
//!
//! # Design Rules
//!
//! 1. Writes go through `normalize`; reads never re-validate.
//! 2. Local state changes only after the remote call it depends on succeeds.
//! 3. Save diffs come from the `changed` tier, never from the change log.
//! 4. Nested items point at their parent weakly; the root owns the tree.

pub mod binding;
pub mod cache;
pub mod codec;
pub mod containers;
pub mod document;
pub mod error;
pub mod fake;
pub mod log;
pub mod markers;
pub mod reference;
pub mod schema;
pub mod serializer;
pub mod value;

// Re-export primary types at crate root for ergonomic imports.
pub use binding::{Backend, Binding, LocalFuture, Pending};
pub use cache::{FifoCache, ReferenceCache, ReferenceKey};
pub use codec::{
    BoolCodec, BytesCodec, Codec, EmailCodec, EmbeddedCodec, FieldOptions, FloatCodec, IntCodec,
    KeyCoercion, ListCodec, MapCodec, ObjectIdCodec, ObjectIdKeys, RawCodec, ReferenceCodec,
    ReferenceListCodec, SetCodec, StaticCodec, StrCodec, StringKeys, Validator,
};
pub use containers::{List, Map, Set};
pub use document::Document;
pub use error::{OdmError, OdmResult};
pub use fake::{fake_document, FakeContext, FakeHooks};
pub use log::{ChangeLog, LogEntry};
pub use markers::{AttributeNotSet, FieldState, NotLoaded, Slot};
pub use reference::{materialize, Reference, ReferenceList};
pub use schema::{Schema, SchemaBuilder, ID_FIELD};
pub use serializer::{from_storage, not_loaded_for, to_storage, EncodeOptions};
pub use value::Value;
