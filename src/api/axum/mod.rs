mod error;
mod layer;

pub use layer::{SessionLayer, SessionService};
