//! The record model: FlowQL's wire format between every component.
//!
//! A [`Record`] is a JSON-like value. We reuse `serde_json::Value` directly
//! rather than defining a parallel enum — every operator, sink, and the CLI
//! already speak JSON, and the six JSON types are exactly the six record
//! types `spec.md` §3 asks for.
//!
//! "Absent" (a field that does not exist) is never a `Record` variant; it is
//! the *absence* of a value, represented at lookup sites as `None` in
//! `Option<Record>`. `Some(Record::Null)` is an explicit null, which is a
//! distinct, present value.

use serde_json::{Map, Value};

/// FlowQL's record type. See module docs.
pub type Record = Value;

/// Build the absent sentinel's dual: a present, explicit null.
pub fn null() -> Record {
    Value::Null
}

/// Safe property lookup on an object. Returns `None` if `v` is not an
/// object or the key is missing; returns `Some(Record::Null)` if the key is
/// present and explicitly null. Never panics.
pub fn get_field<'a>(v: &'a Record, key: &str) -> Option<&'a Record> {
    v.as_object().and_then(|m| m.get(key))
}

/// Safe index lookup on an array. Negative/out-of-range/non-array yields
/// `None`.
pub fn get_index(v: &Record, idx: i64) -> Option<&Record> {
    let arr = v.as_array()?;
    let len = arr.len() as i64;
    let i = if idx < 0 { len + idx } else { idx };
    if i < 0 || i >= len {
        None
    } else {
        arr.get(i as usize)
    }
}

/// Truthiness as defined by the expression evaluator contract (spec §4.4,
/// §9 Open Question resolved in SPEC_FULL.md): JSON-coercive. `null`,
/// `false`, `0`/`0.0`, `""`, `[]`, `{}` are falsy; everything else
/// (including absent, by convention of callers mapping `None` to `false`
/// before calling this) is truthy.
pub fn truthy(v: &Record) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(m) => !m.is_empty(),
    }
}

/// Policy applied by [`sanitize`] to values considered "absent" during
/// construction (e.g. a `select` projector that never assigned a key it
/// otherwise reserved space for). Default is `Remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SanitizePolicy {
    #[default]
    Remove,
    Null,
}

/// Recursively sanitizes a record before it is handed to a subscriber.
///
/// `serde_json::Value` has no native "undefined" marker, so in practice the
/// only records that need sanitizing are objects built by the `select`/
/// `summarize` operators, which may carry a reserved-but-unset key
/// represented internally as `Value::Null` wrapped by the caller in a
/// temporary marker object `{"$absent": true}` — see
/// `flowql_runtime::select` for where such markers are produced. This
/// function strips (or nulls, per policy) any such marker recursively and
/// otherwise returns the tree unchanged, preserving object key insertion
/// order (`serde_json`'s `preserve_order` feature keeps `Map` ordered).
pub fn sanitize(v: Record, policy: SanitizePolicy) -> Record {
    match v {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, val) in map {
                if is_absent_marker(&val) {
                    if policy == SanitizePolicy::Null {
                        out.insert(k, Value::Null);
                    }
                    continue;
                }
                out.insert(k, sanitize(val, policy));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(|e| sanitize(e, policy)).collect()),
        other => other,
    }
}

fn is_absent_marker(v: &Record) -> bool {
    matches!(v.get("$absent"), Some(Value::Bool(true))) && v.as_object().map(|m| m.len() == 1).unwrap_or(false)
}

/// Constructs the marker `sanitize` strips (or nulls) for a field whose
/// value was the absent sentinel at construction time — see
/// `flowql_lang::expr::eval_object`, the only producer. Kept here so the
/// marker's shape has one definition shared with [`is_absent_marker`].
pub fn absent_marker() -> Record {
    let mut m = Map::with_capacity(1);
    m.insert("$absent".to_string(), Value::Bool(true));
    Value::Object(m)
}

/// Deep value equality, used by `==`/`!=`. `serde_json::Value` already
/// implements structural `PartialEq`; this wrapper exists so call sites in
/// the expression evaluator read as a named operation rather than a raw
/// `==`, and so object key order never matters (it doesn't: `Value`'s Map
/// equality is order-independent).
pub fn deep_eq(a: &Record, b: &Record) -> bool {
    a == b
}
