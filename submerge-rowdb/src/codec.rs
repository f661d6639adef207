//! Decoding bytes this store previously wrote itself. A failure here means
//! on-disk corruption or a version mismatch, not a request-shaped error, so
//! it aborts the process rather than returning a `Result` the caller could
//! mistake for something recoverable.

use serde::de::DeserializeOwned;

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
    match rmp_serde::from_slice(bytes) {
        Ok(value) => value,
        Err(err) => panic!("corrupt stored value: {err}"),
    }
}
