//! Size estimation for cached values.
//!
//! Estimates, not exact heap usage: text counts two bytes per UTF-16 code
//! unit, byte buffers their length, structured values twice their JSON
//! length, and scalars a flat eight bytes.

use std::sync::Arc;

use serde::Serialize;

const SCALAR_WEIGHT: usize = 8;

pub trait Weigh {
    fn weigh(&self) -> usize;
}

/// Weight of any serializable value: its JSON length times two.
/// Values that fail to serialize weigh as a scalar.
pub fn json_weight<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_vec(value).map_or(SCALAR_WEIGHT, |json| json.len() * 2)
}

impl Weigh for str {
    fn weigh(&self) -> usize {
        self.encode_utf16().count() * 2
    }
}

impl Weigh for String {
    fn weigh(&self) -> usize {
        self.as_str().weigh()
    }
}

impl Weigh for Vec<u8> {
    fn weigh(&self) -> usize {
        self.len()
    }
}

impl Weigh for serde_json::Value {
    fn weigh(&self) -> usize {
        match self {
            serde_json::Value::String(s) => s.weigh(),
            serde_json::Value::Null
            | serde_json::Value::Bool(_)
            | serde_json::Value::Number(_) => SCALAR_WEIGHT,
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => json_weight(self),
        }
    }
}

impl<T: Weigh + ?Sized> Weigh for Arc<T> {
    fn weigh(&self) -> usize {
        (**self).weigh()
    }
}

impl<T: Weigh> Weigh for Option<T> {
    fn weigh(&self) -> usize {
        self.as_ref().map_or(SCALAR_WEIGHT, Weigh::weigh)
    }
}

macro_rules! scalar_weight {
    ($($ty:ty),*) => {
        $(impl Weigh for $ty {
            fn weigh(&self) -> usize {
                SCALAR_WEIGHT
            }
        })*
    };
}

scalar_weight!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);
