pub mod neighborhood;

pub use neighborhood::{AvProblem, NattenConfig, validate_av_inputs};
