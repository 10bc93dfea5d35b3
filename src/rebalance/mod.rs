//! Destination selection and dispatch (§4.4) plus the weighted sampler it
//! depends on.

pub mod dispatch;
pub mod weighted;

pub use dispatch::{dispatch, DispatchReport};
pub use weighted::WeightedSampler;
