pub mod attention;

pub use attention::NeighborhoodAttentionOps;
