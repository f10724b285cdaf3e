//! The field codec contract and its implementations.
//!
//! A codec owns everything type-specific about a field: its default, how
//! assigned input is checked and canonicalized, and how values move to and
//! from storable [`Raw`] form. The round-trip law `decode(encode(x)) == x`
//! holds for every value `normalize` accepts.

mod composite;
mod scalar;

use std::fmt;
use std::sync::Arc;

use docmap_types::{ObjectId, Raw};

use crate::error::{OdmError, OdmResult};
use crate::fake::FakeContext;
use crate::schema::Schema;
use crate::value::Value;

pub use composite::{
    EmbeddedCodec, ListCodec, MapCodec, ReferenceCodec, ReferenceListCodec, SetCodec,
};
pub use scalar::{
    BoolCodec, BoolKind, BytesCodec, BytesKind, EmailCodec, EmailKind, FloatCodec, FloatKind,
    IntCodec, IntKind, ObjectIdCodec, ObjectIdKind, RawCodec, Scalar, ScalarKind, StaticCodec,
    StrCodec, StrKind,
};

/// Behaviour of one field type.
pub trait Codec: fmt::Debug + Send + Sync {
    /// Short type name used in errors and debug output.
    fn type_name(&self) -> &'static str;

    /// Value of a field that was never assigned. `None` means the field is
    /// unset (`AttributeNotSet`).
    fn default_value(&self) -> Option<Value> {
        None
    }

    /// Check and canonicalize assigned input.
    ///
    /// Fails with [`OdmError::Type`] on an incompatible input type and with
    /// [`OdmError::Value`] on a value rejected by validation.
    fn normalize(&self, value: Value) -> OdmResult<Value>;

    /// Storable form of a normalized value.
    fn encode(&self, value: &Value) -> OdmResult<Raw>;

    /// In-memory form of a stored value.
    fn decode(&self, raw: &Raw) -> OdmResult<Value>;

    /// Random value for test data. `None` when `depth < 0` or when the type
    /// has nothing sensible to generate.
    fn fake(&self, depth: i32, ctx: &mut FakeContext) -> Option<Value>;

    /// Independent copy, used when a schema inherits this field.
    fn clone_codec(&self) -> Arc<dyn Codec>;

    /// Schema of the embedded document this codec produces, if any.
    fn embedded_schema(&self) -> Option<&Arc<Schema>> {
        None
    }
}

/// Custom validation hook attached to a scalar codec.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Modifiers shared by scalar codecs.
///
/// Defaults and choices are kept in storable form so that codecs stay
/// `Send + Sync`; they are decoded on demand.
#[derive(Clone, Default)]
pub struct FieldOptions {
    /// Set through `Scalar::with_default`, which checks it.
    pub(crate) default: Option<Raw>,
    pub choices: Option<Vec<Raw>>,
    pub validators: Vec<Validator>,
    pub nullable: bool,
}

impl fmt::Debug for FieldOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldOptions")
            .field("default", &self.default)
            .field("choices", &self.choices)
            .field("validators", &self.validators.len())
            .field("nullable", &self.nullable)
            .finish()
    }
}

/// Converts map keys to and from the string keys storage sees.
pub trait KeyCoercion: fmt::Debug + Send + Sync {
    fn to_key(&self, key: &Value) -> OdmResult<String>;
    fn from_key(&self, key: &str) -> OdmResult<Value>;
}

fn check_storable_key(key: String) -> OdmResult<String> {
    if key.contains('.') || key.starts_with('$') {
        return Err(OdmError::Value(format!(
            "map key {key:?} cannot contain '.' or start with '$'"
        )));
    }
    Ok(key)
}

/// Plain string keys. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringKeys;

impl KeyCoercion for StringKeys {
    fn to_key(&self, key: &Value) -> OdmResult<String> {
        match key {
            Value::Str(s) => check_storable_key(s.clone()),
            other => Err(OdmError::type_mismatch("str key", other.type_name())),
        }
    }

    fn from_key(&self, key: &str) -> OdmResult<Value> {
        Ok(Value::Str(key.to_string()))
    }
}

/// Identifier keys, stored as their 24-character hex form.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectIdKeys;

impl KeyCoercion for ObjectIdKeys {
    fn to_key(&self, key: &Value) -> OdmResult<String> {
        match key {
            Value::Id(id) => Ok(id.to_hex()),
            Value::Str(s) => Ok(ObjectId::from_hex(s)?.to_hex()),
            other => Err(OdmError::type_mismatch("objectid key", other.type_name())),
        }
    }

    fn from_key(&self, key: &str) -> OdmResult<Value> {
        Ok(Value::Id(ObjectId::from_hex(key)?))
    }
}

/// Item validation failures inside containers surface as value errors.
pub(crate) fn item_error(err: OdmError) -> OdmError {
    match err {
        OdmError::Type { expected, found } => {
            OdmError::Value(format!("invalid item: expected {expected}, got {found}"))
        }
        other => other,
    }
}
