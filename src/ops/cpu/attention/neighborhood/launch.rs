//! Grid/block descriptors for the CPU AV kernels.
//!
//! A block is a batch of logical threads executed by one rayon task. The
//! descriptors only shape the work split; results never depend on them.

use crate::ops::impl_generic::neighborhood::{AvProblem, TileConfig, TileGeometry};

/// Launch shape of one kernel, in CUDA-style `(x, y, z)` dims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGrid {
    pub grid: (usize, usize, usize),
    pub block: (usize, usize, usize),
}

impl LaunchGrid {
    /// One logical thread per element of a flat output of `total` elements.
    pub fn linear(total: usize, threads_per_block: usize) -> Self {
        let threads = threads_per_block.max(1);
        Self {
            grid: (total.div_ceil(threads), 1, 1),
            block: (threads, 1, 1),
        }
    }

    /// One block per query tile of every dilation group of every plane.
    ///
    /// `block.x` runs over the queries of a tile, `block.y` over window offsets.
    pub fn tiled(problem: &AvProblem, tile: &TileConfig) -> Self {
        let d = problem.dilation;
        let geo = TileGeometry::new(*tile, 1);
        let (tiles_y, tiles_x) = geo.tiles(problem.height.div_ceil(d), problem.width.div_ceil(d));
        Self {
            grid: (tiles_x * d, tiles_y * d, problem.planes()),
            block: (tile.queries(), tile.kernel_size * tile.kernel_size, 1),
        }
    }

    pub fn blocks(&self) -> usize {
        self.grid.0 * self.grid.1 * self.grid.2
    }

    pub fn threads_per_block(&self) -> usize {
        self.block.0 * self.block.1 * self.block.2
    }
}
