use std::fmt;
use std::sync::Arc;

use docmap_types::{ObjectId, Raw, RawDoc};
use rand::Rng;

use super::{Codec, FieldOptions};
use crate::error::{OdmError, OdmResult};
use crate::fake::FakeContext;
use crate::value::Value;

/// Type-specific half of a scalar codec.
///
/// [`Scalar`] supplies the shared modifiers (default, choices, validators,
/// nullability); a kind only knows its own type.
pub trait ScalarKind: fmt::Debug + Clone + Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Accept an input of this type, converting compatible ones.
    fn coerce(&self, value: Value) -> OdmResult<Value>;

    /// Reject a well-typed value. The message becomes an [`OdmError::Value`].
    fn check(&self, _value: &Value) -> Result<(), String> {
        Ok(())
    }

    fn to_raw(&self, value: &Value) -> OdmResult<Raw>;

    fn from_raw(&self, raw: &Raw) -> OdmResult<Value>;

    fn fake(&self, ctx: &mut FakeContext) -> Value;
}

/// A scalar codec: a [`ScalarKind`] plus [`FieldOptions`].
#[derive(Clone, Debug)]
pub struct Scalar<K> {
    kind: K,
    options: FieldOptions,
}

impl<K: ScalarKind> Scalar<K> {
    pub fn with_kind(kind: K) -> Self {
        Self {
            kind,
            options: FieldOptions::default(),
        }
    }

    /// Value used when the field was never assigned. Fails when `value` is
    /// not a valid value of this field.
    pub fn with_default(mut self, value: impl Into<Raw>) -> OdmResult<Self> {
        let raw = value.into();
        self.normalize(self.decode(&raw)?)?;
        self.options.default = Some(raw);
        Ok(self)
    }

    /// Restrict assignments to an enumerated set.
    pub fn choices<I, T>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Raw>,
    {
        self.options.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn validator(
        mut self,
        check: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.options.validators.push(Arc::new(check));
        self
    }

    /// Accept `Null` as a value.
    pub fn nullable(mut self) -> Self {
        self.options.nullable = true;
        self
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }
}

impl<K: ScalarKind + Default> Scalar<K> {
    pub fn new() -> Self {
        Self::with_kind(K::default())
    }
}

impl<K: ScalarKind + Default> Default for Scalar<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ScalarKind> Codec for Scalar<K> {
    fn type_name(&self) -> &'static str {
        self.kind.name()
    }

    fn default_value(&self) -> Option<Value> {
        // Checked by `with_default`.
        let raw = self.options.default.as_ref()?;
        self.decode(raw).ok()
    }

    fn normalize(&self, value: Value) -> OdmResult<Value> {
        if value.is_null() && self.options.nullable {
            return Ok(Value::Null);
        }
        let value = self.kind.coerce(value)?;
        self.kind.check(&value).map_err(OdmError::Value)?;
        if let Some(choices) = &self.options.choices {
            let raw = self.kind.to_raw(&value)?;
            if !choices.contains(&raw) {
                return Err(OdmError::Value(format!(
                    "{raw} is not one of the allowed choices"
                )));
            }
        }
        for validate in &self.options.validators {
            validate(&value).map_err(OdmError::Value)?;
        }
        Ok(value)
    }

    fn encode(&self, value: &Value) -> OdmResult<Raw> {
        if value.is_null() && self.options.nullable {
            return Ok(Raw::Null);
        }
        self.kind.to_raw(value)
    }

    fn decode(&self, raw: &Raw) -> OdmResult<Value> {
        if raw.is_null() && self.options.nullable {
            return Ok(Value::Null);
        }
        self.kind.from_raw(raw)
    }

    fn fake(&self, depth: i32, ctx: &mut FakeContext) -> Option<Value> {
        if depth < 0 {
            return None;
        }
        if let Some(choices) = self.options.choices.as_ref().filter(|c| !c.is_empty()) {
            let pick = ctx.rng().gen_range(0..choices.len());
            return self.decode(&choices[pick]).ok();
        }
        Some(self.kind.fake(ctx))
    }

    fn clone_codec(&self) -> Arc<dyn Codec> {
        Arc::new(self.clone())
    }
}

fn mismatch<T>(expected: &str, found: &str) -> OdmResult<T> {
    Err(OdmError::type_mismatch(expected, found))
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// 64-bit integers with optional inclusive bounds.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntKind {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

pub type IntCodec = Scalar<IntKind>;

impl IntCodec {
    pub fn min(mut self, min: i64) -> Self {
        self.kind.min = Some(min);
        self
    }

    pub fn max(mut self, max: i64) -> Self {
        self.kind.max = Some(max);
        self
    }
}

impl ScalarKind for IntKind {
    fn name(&self) -> &'static str {
        "int"
    }

    fn coerce(&self, value: Value) -> OdmResult<Value> {
        match value {
            Value::Int(_) => Ok(value),
            other => mismatch("int", other.type_name()),
        }
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        let Some(v) = value.as_i64() else {
            return Ok(());
        };
        if let Some(min) = self.min.filter(|min| v < *min) {
            return Err(format!("{v} is less than the minimum {min}"));
        }
        if let Some(max) = self.max.filter(|max| v > *max) {
            return Err(format!("{v} is greater than the maximum {max}"));
        }
        Ok(())
    }

    fn to_raw(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Int(i) => Ok(Raw::Int(*i)),
            other => mismatch("int", other.type_name()),
        }
    }

    fn from_raw(&self, raw: &Raw) -> OdmResult<Value> {
        match raw {
            Raw::Int(i) => Ok(Value::Int(*i)),
            other => mismatch("int", other.type_name()),
        }
    }

    fn fake(&self, ctx: &mut FakeContext) -> Value {
        let (lo, hi) = match (self.min, self.max) {
            (Some(lo), Some(hi)) => (lo, hi.max(lo)),
            (Some(lo), None) => (lo, lo.saturating_add(1000)),
            (None, Some(hi)) => (hi.saturating_sub(1000), hi),
            (None, None) => (0, 1000),
        };
        Value::Int(ctx.rng().gen_range(lo..=hi))
    }
}

/// Floating point numbers. Integers are accepted and widened.
#[derive(Clone, Copy, Debug, Default)]
pub struct FloatKind;

pub type FloatCodec = Scalar<FloatKind>;

impl ScalarKind for FloatKind {
    fn name(&self) -> &'static str {
        "float"
    }

    fn coerce(&self, value: Value) -> OdmResult<Value> {
        match value {
            Value::Float(_) => Ok(value),
            Value::Int(i) => Ok(Value::Float(i as f64)),
            other => mismatch("float", other.type_name()),
        }
    }

    fn to_raw(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Float(f) => Ok(Raw::Float(*f)),
            Value::Int(i) => Ok(Raw::Float(*i as f64)),
            other => mismatch("float", other.type_name()),
        }
    }

    fn from_raw(&self, raw: &Raw) -> OdmResult<Value> {
        match raw {
            Raw::Float(f) => Ok(Value::Float(*f)),
            Raw::Int(i) => Ok(Value::Float(*i as f64)),
            other => mismatch("float", other.type_name()),
        }
    }

    fn fake(&self, ctx: &mut FakeContext) -> Value {
        Value::Float(ctx.rng().gen_range(0.0..1000.0))
    }
}

/// Text with an optional maximum length in characters.
#[derive(Clone, Copy, Debug, Default)]
pub struct StrKind {
    pub max_len: Option<usize>,
}

pub type StrCodec = Scalar<StrKind>;

impl StrCodec {
    pub fn max_len(mut self, max_len: usize) -> Self {
        self.kind.max_len = Some(max_len);
        self
    }
}

impl ScalarKind for StrKind {
    fn name(&self) -> &'static str {
        "str"
    }

    fn coerce(&self, value: Value) -> OdmResult<Value> {
        match value {
            Value::Str(_) => Ok(value),
            other => mismatch("str", other.type_name()),
        }
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        match (value.as_str(), self.max_len) {
            (Some(s), Some(max)) if s.chars().count() > max => {
                Err(format!("text is longer than {max} characters"))
            }
            _ => Ok(()),
        }
    }

    fn to_raw(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Str(s) => Ok(Raw::Str(s.clone())),
            other => mismatch("str", other.type_name()),
        }
    }

    fn from_raw(&self, raw: &Raw) -> OdmResult<Value> {
        match raw {
            Raw::Str(s) => Ok(Value::Str(s.clone())),
            other => mismatch("str", other.type_name()),
        }
    }

    fn fake(&self, ctx: &mut FakeContext) -> Value {
        let len = self.max_len.unwrap_or(8).min(8);
        let word = (0..len)
            .map(|_| char::from(ctx.rng().gen_range(b'a'..=b'z')))
            .collect::<String>();
        Value::Str(word)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BoolKind;

pub type BoolCodec = Scalar<BoolKind>;

impl ScalarKind for BoolKind {
    fn name(&self) -> &'static str {
        "bool"
    }

    fn coerce(&self, value: Value) -> OdmResult<Value> {
        match value {
            Value::Bool(_) => Ok(value),
            other => mismatch("bool", other.type_name()),
        }
    }

    fn to_raw(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Bool(b) => Ok(Raw::Bool(*b)),
            other => mismatch("bool", other.type_name()),
        }
    }

    fn from_raw(&self, raw: &Raw) -> OdmResult<Value> {
        match raw {
            Raw::Bool(b) => Ok(Value::Bool(*b)),
            other => mismatch("bool", other.type_name()),
        }
    }

    fn fake(&self, ctx: &mut FakeContext) -> Value {
        Value::Bool(ctx.rng().gen_bool(0.5))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BytesKind;

pub type BytesCodec = Scalar<BytesKind>;

impl ScalarKind for BytesKind {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn coerce(&self, value: Value) -> OdmResult<Value> {
        match value {
            Value::Bytes(_) => Ok(value),
            other => mismatch("bytes", other.type_name()),
        }
    }

    fn to_raw(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Bytes(b) => Ok(Raw::Bytes(b.clone())),
            other => mismatch("bytes", other.type_name()),
        }
    }

    fn from_raw(&self, raw: &Raw) -> OdmResult<Value> {
        match raw {
            Raw::Bytes(b) => Ok(Value::Bytes(b.clone())),
            other => mismatch("bytes", other.type_name()),
        }
    }

    fn fake(&self, ctx: &mut FakeContext) -> Value {
        Value::Bytes(ctx.rng().gen::<[u8; 8]>().to_vec())
    }
}

/// Document identifiers. Accepts valid 24-character hex strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectIdKind;

pub type ObjectIdCodec = Scalar<ObjectIdKind>;

impl ScalarKind for ObjectIdKind {
    fn name(&self) -> &'static str {
        "objectid"
    }

    fn coerce(&self, value: Value) -> OdmResult<Value> {
        match value {
            Value::Id(_) => Ok(value),
            Value::Str(s) => ObjectId::from_hex(&s)
                .map(Value::Id)
                .map_err(|_| OdmError::Value(format!("{s:?} is not a valid object id"))),
            other => mismatch("objectid", other.type_name()),
        }
    }

    fn to_raw(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Id(id) => Ok(Raw::Id(*id)),
            other => mismatch("objectid", other.type_name()),
        }
    }

    fn from_raw(&self, raw: &Raw) -> OdmResult<Value> {
        match raw {
            Raw::Id(id) => Ok(Value::Id(*id)),
            other => mismatch("objectid", other.type_name()),
        }
    }

    fn fake(&self, ctx: &mut FakeContext) -> Value {
        Value::Id(ObjectId::from_bytes(ctx.rng().gen()))
    }
}

/// Email addresses. The domain part is lowercased.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmailKind;

pub type EmailCodec = Scalar<EmailKind>;

fn normalize_email(address: &str) -> Result<String, String> {
    let malformed = || format!("{address:?} is not a valid email address");
    let (local, domain) = address.split_once('@').ok_or_else(malformed)?;
    let bad_domain = domain.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || domain.contains("..");
    if local.is_empty() || bad_domain || address.chars().any(char::is_whitespace) {
        return Err(malformed());
    }
    Ok(format!("{local}@{}", domain.to_ascii_lowercase()))
}

impl ScalarKind for EmailKind {
    fn name(&self) -> &'static str {
        "email"
    }

    fn coerce(&self, value: Value) -> OdmResult<Value> {
        match value {
            Value::Str(s) => normalize_email(&s).map(Value::Str).map_err(OdmError::Value),
            other => mismatch("email", other.type_name()),
        }
    }

    fn to_raw(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Str(s) => Ok(Raw::Str(s.clone())),
            other => mismatch("email", other.type_name()),
        }
    }

    fn from_raw(&self, raw: &Raw) -> OdmResult<Value> {
        match raw {
            Raw::Str(s) => Ok(Value::Str(s.clone())),
            other => mismatch("email", other.type_name()),
        }
    }

    fn fake(&self, ctx: &mut FakeContext) -> Value {
        Value::Str(format!("user{}@example.com", ctx.rng().gen_range(0..100_000)))
    }
}

// ---------------------------------------------------------------------------
// Static and raw
// ---------------------------------------------------------------------------

/// A field whose value is fixed at schema definition.
///
/// Assignment is a protocol violation, and so is a stored value that differs
/// from the constant: a corrupted record must not pass for a valid one.
#[derive(Clone, Debug)]
pub struct StaticCodec {
    value: Raw,
}

impl StaticCodec {
    pub fn new(value: impl Into<Raw>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn value(&self) -> &Raw {
        &self.value
    }
}

impl Codec for StaticCodec {
    fn type_name(&self) -> &'static str {
        "static"
    }

    fn default_value(&self) -> Option<Value> {
        Some(Value::from_scalar_raw(&self.value))
    }

    fn normalize(&self, _value: Value) -> OdmResult<Value> {
        Err(OdmError::Protocol(format!(
            "cannot assign to constant field (fixed to {})",
            self.value
        )))
    }

    fn encode(&self, value: &Value) -> OdmResult<Raw> {
        match value.to_scalar_raw() {
            Some(raw) if raw == self.value => Ok(raw),
            _ => Err(OdmError::Protocol(format!(
                "constant field holds {value:?}, expected {}",
                self.value
            ))),
        }
    }

    fn decode(&self, raw: &Raw) -> OdmResult<Value> {
        if *raw != self.value {
            return Err(OdmError::Protocol(format!(
                "stored value {raw} does not match constant {}",
                self.value
            )));
        }
        Ok(Value::from_scalar_raw(raw))
    }

    /// The default already supplies the constant; there is nothing to assign.
    fn fake(&self, _depth: i32, _ctx: &mut FakeContext) -> Option<Value> {
        None
    }

    fn clone_codec(&self) -> Arc<dyn Codec> {
        Arc::new(self.clone())
    }
}

/// Untyped passthrough of storable values.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

impl RawCodec {
    pub fn new() -> Self {
        Self
    }
}

fn literal_raw(value: &Value) -> Option<Raw> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(literal_raw)
            .collect::<Option<Vec<_>>>()
            .map(Raw::List),
        Value::Pairs(pairs) => pairs
            .iter()
            .map(|(k, v)| Some((k.as_str()?.to_string(), literal_raw(v)?)))
            .collect::<Option<RawDoc>>()
            .map(Raw::Doc),
        other => other.to_scalar_raw(),
    }
}

impl Codec for RawCodec {
    fn type_name(&self) -> &'static str {
        "raw"
    }

    fn normalize(&self, value: Value) -> OdmResult<Value> {
        literal_raw(&value)
            .map(|raw| Value::from_scalar_raw(&raw))
            .ok_or_else(|| OdmError::type_mismatch("storable value", value.type_name()))
    }

    fn encode(&self, value: &Value) -> OdmResult<Raw> {
        value
            .to_scalar_raw()
            .ok_or_else(|| OdmError::type_mismatch("storable value", value.type_name()))
    }

    fn decode(&self, raw: &Raw) -> OdmResult<Value> {
        Ok(Value::from_scalar_raw(raw))
    }

    fn fake(&self, _depth: i32, _ctx: &mut FakeContext) -> Option<Value> {
        None
    }

    fn clone_codec(&self) -> Arc<dyn Codec> {
        Arc::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(codec: &dyn Codec, value: Value) -> Value {
        let normalized = codec.normalize(value).unwrap();
        let raw = codec.encode(&normalized).unwrap();
        let decoded = codec.decode(&raw).unwrap();
        assert_eq!(decoded, normalized);
        decoded
    }

    #[test]
    fn int_rejects_other_types() {
        let codec = IntCodec::new();
        assert!(matches!(
            codec.normalize(Value::from("1")),
            Err(OdmError::Type { .. })
        ));
        assert!(matches!(codec.decode(&Raw::Bool(true)), Err(OdmError::Type { .. })));
    }

    #[test]
    fn int_bounds_are_value_errors() {
        let codec = IntCodec::new().min(0).max(10);
        assert_eq!(round_trip(&codec, Value::Int(10)), Value::Int(10));
        assert!(matches!(codec.normalize(Value::Int(-1)), Err(OdmError::Value(_))));
        assert!(matches!(codec.normalize(Value::Int(11)), Err(OdmError::Value(_))));
    }

    #[test]
    fn float_widens_ints() {
        let codec = FloatCodec::new();
        assert_eq!(codec.normalize(Value::Int(2)).unwrap(), Value::Float(2.0));
        assert_eq!(codec.decode(&Raw::Int(3)).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn str_max_len_counts_chars() {
        let codec = StrCodec::new().max_len(3);
        assert!(codec.normalize(Value::from("äöü")).is_ok());
        assert!(matches!(codec.normalize(Value::from("abcd")), Err(OdmError::Value(_))));
    }

    #[test]
    fn choices_restrict_values() {
        let codec = StrCodec::new().choices(["red", "green"]);
        assert!(codec.normalize(Value::from("red")).is_ok());
        assert!(matches!(codec.normalize(Value::from("blue")), Err(OdmError::Value(_))));
    }

    #[test]
    fn validator_runs_after_type_check() {
        let codec = IntCodec::new().validator(|v| match v.as_i64() {
            Some(i) if i % 2 == 0 => Ok(()),
            _ => Err("must be even".into()),
        });
        assert!(codec.normalize(Value::Int(4)).is_ok());
        let err = codec.normalize(Value::Int(3)).unwrap_err();
        assert!(matches!(err, OdmError::Value(msg) if msg == "must be even"));
    }

    #[test]
    fn default_is_decoded_on_demand() {
        assert_eq!(
            IntCodec::new().with_default(7).unwrap().default_value(),
            Some(Value::Int(7))
        );
        assert_eq!(IntCodec::new().default_value(), None);
    }

    #[test]
    fn mistyped_default_is_rejected_up_front() {
        assert!(matches!(
            IntCodec::new().with_default("seven"),
            Err(OdmError::Type { .. })
        ));
        assert!(matches!(
            IntCodec::new().max(3).with_default(7),
            Err(OdmError::Value(_))
        ));
    }

    #[test]
    fn nullable_accepts_null() {
        let codec = StrCodec::new().nullable();
        assert_eq!(round_trip(&codec, Value::Null), Value::Null);
        assert!(matches!(
            StrCodec::new().normalize(Value::Null),
            Err(OdmError::Type { .. })
        ));
    }

    #[test]
    fn object_id_accepts_hex() {
        let id = ObjectId::new();
        let codec = ObjectIdCodec::new();
        assert_eq!(codec.normalize(Value::from(id.to_hex())).unwrap(), Value::Id(id));
        assert!(matches!(
            codec.normalize(Value::from("not-an-id")),
            Err(OdmError::Value(_))
        ));
    }

    #[test]
    fn email_lowercases_domain() {
        let codec = EmailCodec::new();
        assert_eq!(
            codec.normalize(Value::from("Jane.Doe@Example.COM")).unwrap(),
            Value::from("Jane.Doe@example.com")
        );
        for bad in ["plain", "@example.com", "a@", "a@b", "a b@c.d", "a@b..c", "a@@b.c"] {
            assert!(
                matches!(codec.normalize(Value::from(bad)), Err(OdmError::Value(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn static_defaults_to_constant() {
        let codec = StaticCodec::new("v1");
        assert_eq!(codec.default_value(), Some(Value::from("v1")));
        assert_eq!(codec.encode(&Value::from("v1")).unwrap(), Raw::from("v1"));
    }

    #[test]
    fn static_rejects_assignment_and_foreign_values() {
        let codec = StaticCodec::new(1);
        assert!(matches!(codec.normalize(Value::Int(1)), Err(OdmError::Protocol(_))));
        assert!(matches!(codec.encode(&Value::Int(2)), Err(OdmError::Protocol(_))));
        assert!(matches!(codec.decode(&Raw::Int(2)), Err(OdmError::Protocol(_))));
    }

    #[test]
    fn raw_codec_passes_literals_through() {
        let codec = RawCodec::new();
        let value = Value::pairs([("a", Value::array([1, 2]))]);
        let normalized = codec.normalize(value).unwrap();
        let raw = codec.encode(&normalized).unwrap();
        assert_eq!(raw.to_json(), serde_json::json!({"a": [1, 2]}));
        assert_eq!(codec.decode(&raw).unwrap(), normalized);
    }

    #[test]
    fn fake_respects_depth_and_bounds() {
        let mut ctx = FakeContext::seeded(1);
        let codec = IntCodec::new().min(5).max(6);
        assert_eq!(codec.fake(-1, &mut ctx), None);
        for _ in 0..20 {
            let v = codec.fake(0, &mut ctx).unwrap().as_i64().unwrap();
            assert!((5..=6).contains(&v));
        }
        let email = EmailCodec::new().fake(0, &mut ctx).unwrap();
        assert!(EmailCodec::new().normalize(email).is_ok());
    }

    #[test]
    fn fake_picks_from_choices() {
        let mut ctx = FakeContext::seeded(2);
        let codec = StrCodec::new().choices(["a", "b"]);
        let v = codec.fake(0, &mut ctx).unwrap();
        assert!(v == Value::from("a") || v == Value::from("b"));
    }

    proptest! {
        #[test]
        fn int_round_trip(i in any::<i64>()) {
            let codec = IntCodec::new();
            let raw = codec.encode(&Value::Int(i)).unwrap();
            prop_assert_eq!(codec.decode(&raw).unwrap(), Value::Int(i));
        }

        #[test]
        fn float_round_trip(f in -1.0e12f64..1.0e12) {
            let codec = FloatCodec::new();
            let raw = codec.encode(&Value::Float(f)).unwrap();
            prop_assert_eq!(codec.decode(&raw).unwrap(), Value::Float(f));
        }

        #[test]
        fn str_round_trip(s in ".*") {
            let codec = StrCodec::new();
            let normalized = codec.normalize(Value::Str(s)).unwrap();
            let raw = codec.encode(&normalized).unwrap();
            prop_assert_eq!(codec.decode(&raw).unwrap(), normalized);
        }

        #[test]
        fn bytes_round_trip(b in proptest::collection::vec(any::<u8>(), 0..64)) {
            let codec = BytesCodec::new();
            let raw = codec.encode(&Value::Bytes(b.clone())).unwrap();
            prop_assert_eq!(codec.decode(&raw).unwrap(), Value::Bytes(b));
        }

        #[test]
        fn object_id_round_trip(bytes in any::<[u8; 12]>()) {
            let codec = ObjectIdCodec::new();
            let id = Value::Id(ObjectId::from_bytes(bytes));
            let raw = codec.encode(&id).unwrap();
            prop_assert_eq!(codec.decode(&raw).unwrap(), id);
        }

        #[test]
        fn email_normalization_is_idempotent(local in "[a-zA-Z0-9._]{1,12}", domain in "[a-zA-Z]{1,8}\\.[a-zA-Z]{2,4}") {
            let codec = EmailCodec::new();
            let once = codec.normalize(Value::Str(format!("{local}@{domain}"))).unwrap();
            let twice = codec.normalize(once.clone()).unwrap();
            prop_assert_eq!(twice, once);
        }
    }
}
