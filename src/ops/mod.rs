pub mod autograd_neighborhood;
pub mod cpu;
pub mod impl_generic;
pub mod traits;

pub use autograd_neighborhood::var_natten_av;
pub use impl_generic::neighborhood::NattenConfig;
pub use traits::NeighborhoodAttentionOps;
