//! A minimal document value model, standing in for the query-language
//! runtime's datum type. Only as much as the artificial-table adapter and
//! primary-key extraction need: no typechecking, no query evaluation.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(name),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical byte encoding used as a B-tree key. Mirrors
    /// `store_key_t(pval.print_primary())` in the original: a primary key
    /// must round-trip losslessly through this to be usable as a map key.
    pub fn primary_key_bytes(&self) -> Result<Vec<u8>, crate::error::StoreError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

/// Extracts the primary-key value out of a row by field name, the way
/// `write_batched_insert` pulls `insert_row.get_field(primary_key)` before
/// calling `do_single_update`.
pub fn extract_primary_key(row: &Value, primary_key_name: &str) -> Option<Value> {
    row.get_field(primary_key_name).cloned()
}
