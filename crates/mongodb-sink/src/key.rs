//! Record key normalization.
//!
//! Turns a record and its primary-key field into the filter and `$set`
//! payload of one upsert. When the primary key is MongoDB's `_id`, the value
//! is coerced into an [`ObjectId`] and removed from the payload, since `_id`
//! is immutable once a document exists.

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};

use crate::error::KeyError;
use crate::value::json_to_bson;
use crate::Record;

/// MongoDB's reserved per-document identifier field.
pub const NATIVE_ID_FIELD: &str = "_id";

/// A single-field equality filter plus the fields to set.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOperation {
    pub filter: Document,
    pub payload: Document,
}

impl UpsertOperation {
    /// The update document sent with `upsert = true`.
    ///
    /// An empty `$set` is accepted by MongoDB 5.0 and later, which happens
    /// when a record holds nothing but its `_id`.
    pub fn update(&self) -> Document {
        doc! { "$set": self.payload.clone() }
    }
}

/// Builds the upsert operation for `record` keyed by `primary_key`.
///
/// The record itself is never modified.
pub fn normalize(record: &Record, primary_key: &str) -> Result<UpsertOperation, KeyError> {
    let key_value = record.get(primary_key).ok_or_else(|| KeyError::MissingKey {
        field: primary_key.to_string(),
    })?;

    let is_native_id = primary_key == NATIVE_ID_FIELD;
    let filter_value = if is_native_id {
        Bson::ObjectId(coerce_object_id(primary_key, key_value)?)
    } else {
        json_to_bson(key_value).map_err(|e| KeyError::InvalidKeyFormat {
            field: primary_key.to_string(),
            value: key_value.to_string(),
            reason: e.to_string(),
        })?
    };

    let mut payload = Document::new();
    for (field, value) in record {
        if field == primary_key {
            if !is_native_id {
                payload.insert(field.clone(), filter_value.clone());
            }
            continue;
        }
        let converted = json_to_bson(value).map_err(|e| KeyError::UnsupportedValue {
            field: field.clone(),
            reason: e.to_string(),
        })?;
        payload.insert(field.clone(), converted);
    }

    let mut filter = Document::new();
    filter.insert(primary_key, filter_value);

    Ok(UpsertOperation { filter, payload })
}

fn coerce_object_id(field: &str, value: &serde_json::Value) -> Result<ObjectId, KeyError> {
    let invalid = |reason: String| KeyError::InvalidKeyFormat {
        field: field.to_string(),
        value: value.to_string(),
        reason,
    };

    match value {
        serde_json::Value::String(s) => {
            ObjectId::parse_str(s).map_err(|e| invalid(e.to_string()))
        }
        other => Err(invalid(format!(
            "expected a 24 character hex string, got {}",
            json_type_name(other)
        ))),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
