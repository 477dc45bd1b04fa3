mod types;

pub use types::*;

#[cfg(feature = "actix")]
pub mod actix;

#[cfg(feature = "axum_api")]
pub mod axum;
