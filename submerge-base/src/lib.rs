mod error;
mod guarantee;

pub use error::{err, Error, Result};
