#![deny(unused_variables)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod block;
pub mod counts;
pub mod io;
pub mod kernel;
pub mod matrix;
pub mod pipeline;
pub mod types;

pub use matrix::KinshipMatrix;
pub use pipeline::compute_kinship;
pub use types::{GenotypeSource, KinshipConfig, KinshipError};
