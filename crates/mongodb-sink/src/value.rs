//! JSON to BSON value conversion.

use bson::{Bson, Document};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// An integer that BSON cannot hold without losing precision.
#[derive(Debug, Error)]
#[error("integer {0} does not fit in a signed 64-bit BSON integer")]
pub(crate) struct IntegerOverflow(String);

pub(crate) fn json_to_bson(value: &Value) -> Result<Bson, IntegerOverflow> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => number_to_bson(n)?,
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(
            items
                .iter()
                .map(json_to_bson)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) => Bson::Document(object_to_document(map)?),
    })
}

/// Integers take the narrowest BSON integer type, like the Python driver.
/// Integers beyond `i64` are rejected rather than rounded into a double.
fn number_to_bson(n: &Number) -> Result<Bson, IntegerOverflow> {
    if let Some(i) = n.as_i64() {
        Ok(match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        })
    } else if n.is_u64() {
        Err(IntegerOverflow(n.to_string()))
    } else {
        Ok(Bson::Double(n.as_f64().unwrap_or(f64::NAN)))
    }
}

fn object_to_document(map: &Map<String, Value>) -> Result<Document, IntegerOverflow> {
    let mut doc = Document::new();
    for (key, value) in map {
        doc.insert(key.clone(), json_to_bson(value)?);
    }
    Ok(doc)
}
