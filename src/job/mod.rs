//! Job records and payload normalization

mod model;
pub mod normalizer;

pub use model::Job;
pub use normalizer::{Normalizer, ParseError};
