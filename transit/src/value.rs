//! Type-tagged argument values carried in record payloads
//!
//! The frontend encodes log arguments as a count-prefixed sequence of tagged
//! values; the backend decodes them into a reusable [`ArgStore`] that the
//! message formatter consumes by index.

use crate::{ReadCursor, WriteCursor};
use anyhow::{bail, Result};
use std::fmt;

const TAG_BOOL: u8 = 0;
const TAG_U64: u8 = 1;
const TAG_I64: u8 = 2;
const TAG_F64: u8 = 3;
const TAG_STR: u8 = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U64(u64),
    I64(i64),
    F64(f64),
    Str(String),
}

impl Value {
    pub fn encoded_size(&self) -> usize {
        1 + match self {
            Value::Bool(_) => 1,
            Value::U64(_) | Value::I64(_) | Value::F64(_) => 8,
            Value::Str(s) => std::mem::size_of::<u32>() + s.len(),
        }
    }

    pub fn encode(&self, cursor: &mut WriteCursor<'_>) {
        match self {
            Value::Bool(v) => {
                cursor.write_pod(&TAG_BOOL);
                cursor.write_pod(&u8::from(*v));
            }
            Value::U64(v) => {
                cursor.write_pod(&TAG_U64);
                cursor.write_pod(v);
            }
            Value::I64(v) => {
                cursor.write_pod(&TAG_I64);
                cursor.write_pod(v);
            }
            Value::F64(v) => {
                cursor.write_pod(&TAG_F64);
                cursor.write_pod(v);
            }
            Value::Str(s) => {
                cursor.write_pod(&TAG_STR);
                cursor.write_pod(&(s.len() as u32));
                cursor.write_bytes(s.as_bytes());
            }
        }
    }

    pub fn decode(cursor: &mut ReadCursor<'_>) -> Result<Self> {
        let tag: u8 = cursor.read_pod()?;
        Ok(match tag {
            TAG_BOOL => Value::Bool(cursor.read_pod::<u8>()? != 0),
            TAG_U64 => Value::U64(cursor.read_pod()?),
            TAG_I64 => Value::I64(cursor.read_pod()?),
            TAG_F64 => Value::F64(cursor.read_pod()?),
            TAG_STR => {
                let len = cursor.read_pod::<u32>()? as usize;
                let bytes = cursor.read_bytes(len)?;
                Value::Str(std::str::from_utf8(bytes)?.to_owned())
            }
            other => bail!("unknown value tag {}", other),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U64(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Reusable decoded-argument storage, cleared between records so the backend
/// never reallocates on the steady state.
#[derive(Debug, Default)]
pub struct ArgStore {
    values: Vec<Value>,
}

impl ArgStore {
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn encoded_args_size(args: &[Value]) -> usize {
    1 + args.iter().map(Value::encoded_size).sum::<usize>()
}

pub fn encode_args(cursor: &mut WriteCursor<'_>, args: &[Value]) {
    assert!(args.len() <= u8::MAX as usize, "too many log arguments");
    cursor.write_pod(&(args.len() as u8));
    for arg in args {
        arg.encode(cursor);
    }
}

/// The default record decoder installed by the frontend. Matches the
/// signature of the decoder pointer carried in every record header.
pub fn decode_args(cursor: &mut ReadCursor<'_>, store: &mut ArgStore) -> Result<()> {
    store.clear();
    let count: u8 = cursor.read_pod()?;
    for _ in 0..count {
        store.push(Value::decode(cursor)?);
    }
    Ok(())
}
