pub mod neighborhood;

pub use neighborhood::NeighborhoodAttentionOps;
