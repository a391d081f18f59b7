//! Neighborhood attention AV: geometry, precision units, tiling and validation
//!
//! Everything here is backend-agnostic. Backends own the launch and the kernels.

pub mod config;
pub mod geometry;
pub mod problem;
pub mod tile;
pub mod unit;

pub use config::NattenConfig;
pub use geometry::{
    SUPPORTED_KERNEL_SIZES, backward_window_range, is_supported_kernel_size, neighborhood_size,
    window_start,
};
pub use problem::{AvProblem, validate_av_inputs};
pub use tile::{TILED_HEAD_DIM, TileConfig, TileGeometry, default_tile_config};
pub use unit::{AvUnit, Half2};
