//! Tile table for the head-dim-32 backward-to-attention kernels
//!
//! One block covers a `tile_y x tile_x` tile of queries inside a dilation group, plus
//! the key/value halo those queries' windows read. Windows of consecutive queries
//! start at most one position apart, so a key tile of `tile + kernel_size - 1` along
//! each axis always covers the whole block.
//!
//! | K  | query tile | key tile | threads |
//! |----|------------|----------|---------|
//! | 5  | 4 x 4      | 8 x 8    | 400     |
//! | 7  | 3 x 3      | 9 x 9    | 441     |
//! | 9  | 3 x 3      | 11 x 11  | 729     |
//! | 11 | 2 x 3      | 12 x 13  | 726     |
//! | 13 | 2 x 3      | 14 x 15  | 1014    |

use serde::{Deserialize, Serialize};

use super::geometry::{neighborhood_size, window_start};

/// Head dim served by the tiled kernels.
pub const TILED_HEAD_DIM: usize = 32;

/// Upper bound on logical threads per tiled block, and on key tile slots.
pub const MAX_TILE_THREADS: usize = 1024;

/// Tile shape for one kernel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileConfig {
    pub kernel_size: usize,
    /// Query tile rows
    pub tile_y: usize,
    /// Query tile columns
    pub tile_x: usize,
    /// Key/value tile rows
    pub key_tile_y: usize,
    /// Key/value tile columns
    pub key_tile_x: usize,
}

impl TileConfig {
    pub const fn new(kernel_size: usize, tile_y: usize, tile_x: usize) -> Self {
        Self {
            kernel_size,
            tile_y,
            tile_x,
            key_tile_y: tile_y + kernel_size - 1,
            key_tile_x: tile_x + kernel_size - 1,
        }
    }

    /// Queries per block.
    pub const fn queries(&self) -> usize {
        self.tile_y * self.tile_x
    }

    /// Logical threads per block: one per (query, window offset).
    pub const fn threads(&self) -> usize {
        self.queries() * self.kernel_size * self.kernel_size
    }

    /// Whether the block fits [`MAX_TILE_THREADS`], both in threads and in key tile slots.
    pub const fn fits_block(&self) -> bool {
        let window = match self.kernel_size.checked_mul(self.kernel_size) {
            Some(w) => w,
            None => return false,
        };
        let threads = match self.tile_y.checked_mul(self.tile_x) {
            Some(q) => q.checked_mul(window),
            None => None,
        };
        let key_slots = self.key_tile_y.checked_mul(self.key_tile_x);
        matches!(threads, Some(t) if t <= MAX_TILE_THREADS)
            && matches!(key_slots, Some(k) if k <= MAX_TILE_THREADS)
    }

    /// Whether the key tile can hold the halo of every query in the tile.
    pub const fn covers_halo(&self) -> bool {
        self.tile_y > 0
            && self.tile_x > 0
            && self.key_tile_y + 1 >= self.tile_y + self.kernel_size
            && self.key_tile_x + 1 >= self.tile_x + self.kernel_size
    }
}

/// Default tile table, keyed by kernel size.
pub const TILE_CONFIGS: [TileConfig; 5] = [
    TileConfig::new(5, 4, 4),
    TileConfig::new(7, 3, 3),
    TileConfig::new(9, 3, 3),
    TileConfig::new(11, 2, 3),
    TileConfig::new(13, 2, 3),
];

/// Default tile shape for `kernel_size`, if it has one.
pub fn default_tile_config(kernel_size: usize) -> Option<TileConfig> {
    TILE_CONFIGS
        .iter()
        .copied()
        .find(|t| t.kernel_size == kernel_size)
}

/// Tile layout for one launch: tile shape plus the per-call head width.
///
/// All coordinates here are dilation-group coordinates: group position `g` with
/// residue `r` is feature-map position `r + g * dilation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    pub config: TileConfig,
    /// Accumulation units per head (channels / lanes)
    pub head_units: usize,
}

impl TileGeometry {
    pub fn new(config: TileConfig, head_units: usize) -> Self {
        Self { config, head_units }
    }

    /// Tiles needed to cover a group of `group_h x group_w` queries.
    pub fn tiles(&self, group_h: usize, group_w: usize) -> (usize, usize) {
        (
            group_h.div_ceil(self.config.tile_y),
            group_w.div_ceil(self.config.tile_x),
        )
    }

    /// Units of query scratch per block.
    pub fn query_scratch_len(&self) -> usize {
        self.config.queries() * self.head_units
    }

    /// Units of key/value scratch per block.
    pub fn key_scratch_len(&self) -> usize {
        self.config.key_tile_y * self.config.key_tile_x * self.head_units
    }

    /// Scratch footprint in bytes for a unit of `unit_bytes`.
    pub fn scratch_bytes(&self, unit_bytes: usize) -> usize {
        (self.query_scratch_len() + self.key_scratch_len()) * unit_bytes
    }

    /// First key row/column read by a tile whose first query sits at `origin`.
    pub fn key_origin(&self, origin: usize, group_len: usize) -> usize {
        let k = self.config.kernel_size;
        window_start(origin, group_len, k, neighborhood_size(k), 1)
    }

    /// Scratch offset of query `(qy, qx)` within the block.
    #[inline]
    pub fn query_slot(&self, qy: usize, qx: usize) -> usize {
        (qy * self.config.tile_x + qx) * self.head_units
    }

    /// Scratch offset of key `(ky, kx)` within the block.
    #[inline]
    pub fn key_slot(&self, ky: usize, kx: usize) -> usize {
        (ky * self.config.key_tile_x + kx) * self.head_units
    }
}
