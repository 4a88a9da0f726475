//! Label mapping engine.
//!
//! Token assignment for classification options, consensus reordering,
//! numeric range mapping and logit-bias construction.

mod bias;
mod mapping;
mod number;
mod shuffle;

pub use bias::*;
pub use mapping::*;
pub use number::*;
pub use shuffle::*;
