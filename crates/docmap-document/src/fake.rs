//! Test-data generation.
//!
//! Generation runs in three explicit phases driven by a schema's
//! [`FakeHooks`]: fixed values first, then one value per remaining field,
//! then a hook after the document has been persisted (run by the SDK).
//! Counters live in the [`FakeContext`] passed through every call.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::document::Document;
use crate::error::OdmResult;
use crate::schema::{Schema, ID_FIELD};
use crate::value::Value;

/// Random source and per-schema counters for one generation run.
#[derive(Debug)]
pub struct FakeContext {
    rng: StdRng,
    counts: HashMap<String, usize>,
}

impl FakeContext {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic context for reproducible fixtures.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            counts: HashMap::new(),
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Documents of `schema` generated so far.
    pub fn count(&self, schema: &str) -> usize {
        self.counts.get(schema).copied().unwrap_or(0)
    }

    fn bump(&mut self, schema: &str) {
        *self.counts.entry(schema.to_string()).or_default() += 1;
    }
}

impl Default for FakeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-schema customization of generated documents. Every phase defaults to
/// doing nothing.
pub trait FakeHooks: Send + Sync {
    /// Values assigned before any field is generated. Fields listed here are
    /// skipped by the per-field phase.
    fn override_values(&self, _ctx: &mut FakeContext) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Value for one field. `None` falls back to the field codec.
    fn per_field(&self, _name: &str, _depth: i32, _ctx: &mut FakeContext) -> Option<Value> {
        None
    }

    /// Runs once the generated document has been stored.
    fn after_persist(&self, _doc: &Document, _ctx: &mut FakeContext) -> OdmResult<()> {
        Ok(())
    }
}

/// Build an unsaved document of `schema` filled with generated values.
pub fn fake_document(schema: &Arc<Schema>, depth: i32, ctx: &mut FakeContext) -> OdmResult<Document> {
    let doc = Document::new(Arc::clone(schema));
    let hooks = schema.hooks().cloned();

    let mut fixed = Vec::new();
    if let Some(hooks) = &hooks {
        for (name, value) in hooks.override_values(ctx) {
            doc.set(&name, value)?;
            fixed.push(name);
        }
    }

    for (name, codec) in schema.fields() {
        if name == ID_FIELD || fixed.iter().any(|f| f == name) {
            continue;
        }
        let value = hooks
            .as_ref()
            .and_then(|h| h.per_field(name, depth, ctx))
            .or_else(|| codec.fake(depth, ctx));
        if let Some(value) = value {
            doc.set(name, value)?;
        }
    }

    ctx.bump(schema.name());
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EmbeddedCodec, IntCodec, StaticCodec, StrCodec};
    use crate::schema::SchemaBuilder;

    struct Fixed;

    impl FakeHooks for Fixed {
        fn override_values(&self, _ctx: &mut FakeContext) -> Vec<(String, Value)> {
            vec![("name".into(), Value::from("fixed"))]
        }

        fn per_field(&self, name: &str, _depth: i32, _ctx: &mut FakeContext) -> Option<Value> {
            (name == "age").then(|| Value::Int(42))
        }
    }

    #[test]
    fn hooks_drive_the_three_phases() {
        let schema = SchemaBuilder::document("Person", "people")
            .field("name", StrCodec::new())
            .field("age", IntCodec::new())
            .field("score", IntCodec::new().min(1).max(3))
            .hooks(Arc::new(Fixed))
            .build();
        let mut ctx = FakeContext::seeded(7);
        let doc = fake_document(&schema, 1, &mut ctx).unwrap();
        assert_eq!(doc.get("name").unwrap(), Value::from("fixed"));
        assert_eq!(doc.get("age").unwrap(), Value::Int(42));
        let score = doc.get("score").unwrap().as_i64().unwrap();
        assert!((1..=3).contains(&score));
        assert_eq!(doc.id(), None);
        assert_eq!(ctx.count("Person"), 1);
    }

    #[test]
    fn static_fields_are_not_reassigned() {
        let schema = SchemaBuilder::document("Versioned", "v")
            .field("v", StaticCodec::new(2))
            .build();
        let doc = fake_document(&schema, 0, &mut FakeContext::seeded(1)).unwrap();
        assert_eq!(doc.get("v").unwrap(), Value::Int(2));
        assert!(!doc.is_changed());
    }

    #[test]
    fn depth_bounds_embedded_recursion() {
        let inner = SchemaBuilder::embedded("Inner")
            .field("x", IntCodec::new())
            .build();
        let outer = SchemaBuilder::document("Outer", "outer")
            .field("inner", EmbeddedCodec::new(inner))
            .build();
        let mut ctx = FakeContext::seeded(3);
        let deep = fake_document(&outer, 1, &mut ctx).unwrap();
        let inner_doc = deep.get("inner").unwrap();
        assert!(inner_doc.as_document().unwrap().get("x").is_ok());

        let shallow = fake_document(&outer, 0, &mut ctx).unwrap();
        let inner_doc = shallow.get("inner").unwrap();
        assert!(inner_doc.as_document().unwrap().get("x").is_err());
        assert_eq!(ctx.count("Inner"), 2);
    }
}
