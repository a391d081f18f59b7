//! Tiled backward-to-attention for head dim 32
//!
//! Each block owns a `tile_y x tile_x` tile of queries inside one dilation group.
//! It runs in two phases over block-local scratch:
//!
//! 1. **load**: copy the tile's `d_out` rows and the key/value halo its windows read.
//!    Slots outside the feature map are skipped.
//! 2. **compute**: one logical thread per `(query, window offset)` takes a dot product
//!    of two scratch rows. Threads past the edge of the map do nothing.
//!
//! The load phase holds the scratch mutably and the compute phase only shares it,
//! so the borrow hand-off is the block barrier. Blocks of a plane run in order on one
//! rayon task and reuse its scratch; planes run in parallel.

use rayon::prelude::*;
use tracing::trace;

use super::resolve_dilation;
use crate::ops::impl_generic::neighborhood::geometry::{group_length, neighborhood_size, window_start};
use crate::ops::impl_generic::neighborhood::tile::{TileConfig, TileGeometry};
use crate::ops::impl_generic::neighborhood::unit::{AvUnit, dot};

/// Block-local scratch for one tile.
struct Scratch<U> {
    query: Vec<U>,
    key: Vec<U>,
}

/// One dilation group of one plane.
#[derive(Clone, Copy)]
struct Group {
    residue_y: usize,
    residue_x: usize,
    len_y: usize,
    len_x: usize,
}

impl Group {
    /// Flat plane index of group position `(gy, gx)`.
    #[inline]
    fn position(&self, gy: usize, gx: usize, width: usize, dilation: usize) -> usize {
        (self.residue_y + gy * dilation) * width + self.residue_x + gx * dilation
    }
}

/// Tiled `d_attn[pos, k] = <d_out[pos, :], value[window(pos, k), :]>`.
///
/// Results match [`av_backward_attn`](super::backward::av_backward_attn) exactly:
/// both reduce through the same [`dot`].
#[allow(clippy::too_many_arguments)]
pub fn av_backward_attn_tiled<U: AvUnit, const KERNEL_SIZE: usize, const DILATION: usize>(
    d_out: &[U],
    value: &[U],
    d_attn: &mut [U::Scalar],
    height: usize,
    width: usize,
    units: usize,
    dilation: usize,
    tile: &TileConfig,
) {
    debug_assert_eq!(tile.kernel_size, KERNEL_SIZE);
    let d = resolve_dilation::<DILATION>(dilation);
    let geo = TileGeometry::new(*tile, units);
    let plane_len = height * width;
    let area = KERNEL_SIZE * KERNEL_SIZE;

    d_attn
        .par_chunks_mut(plane_len * area)
        .enumerate()
        .for_each(|(plane, plane_attn)| {
            trace!(plane, "natten tiled plane");
            let d_out = &d_out[plane * plane_len * units..(plane + 1) * plane_len * units];
            let value = &value[plane * plane_len * units..(plane + 1) * plane_len * units];
            let mut scratch = Scratch {
                query: vec![U::zero(); geo.query_scratch_len()],
                key: vec![U::zero(); geo.key_scratch_len()],
            };

            for residue_y in 0..d {
                for residue_x in 0..d {
                    let group = Group {
                        residue_y,
                        residue_x,
                        len_y: group_length(residue_y, height, d),
                        len_x: group_length(residue_x, width, d),
                    };
                    let (tiles_y, tiles_x) = geo.tiles(group.len_y, group.len_x);
                    for ty in 0..tiles_y {
                        for tx in 0..tiles_x {
                            let origin = (ty * tile.tile_y, tx * tile.tile_x);
                            let key_origin = (
                                geo.key_origin(origin.0, group.len_y),
                                geo.key_origin(origin.1, group.len_x),
                            );
                            load_tile(
                                &geo, &group, origin, key_origin, d_out, value, &mut scratch, width, d,
                            );
                            compute_tile::<U, KERNEL_SIZE>(
                                &geo, &group, origin, key_origin, &scratch, plane_attn, width, d,
                            );
                        }
                    }
                }
            }
        });
}

#[allow(clippy::too_many_arguments)]
fn load_tile<U: AvUnit>(
    geo: &TileGeometry,
    group: &Group,
    origin: (usize, usize),
    key_origin: (usize, usize),
    d_out: &[U],
    value: &[U],
    scratch: &mut Scratch<U>,
    width: usize,
    dilation: usize,
) {
    let units = geo.head_units;
    let tile = &geo.config;

    for qy in 0..tile.tile_y {
        for qx in 0..tile.tile_x {
            let (gy, gx) = (origin.0 + qy, origin.1 + qx);
            if gy < group.len_y && gx < group.len_x {
                let src = group.position(gy, gx, width, dilation) * units;
                let dst = geo.query_slot(qy, qx);
                scratch.query[dst..dst + units].copy_from_slice(&d_out[src..src + units]);
            }
        }
    }

    for ky in 0..tile.key_tile_y {
        for kx in 0..tile.key_tile_x {
            let (gy, gx) = (key_origin.0 + ky, key_origin.1 + kx);
            if gy < group.len_y && gx < group.len_x {
                let src = group.position(gy, gx, width, dilation) * units;
                let dst = geo.key_slot(ky, kx);
                scratch.key[dst..dst + units].copy_from_slice(&value[src..src + units]);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_tile<U: AvUnit, const KERNEL_SIZE: usize>(
    geo: &TileGeometry,
    group: &Group,
    origin: (usize, usize),
    key_origin: (usize, usize),
    scratch: &Scratch<U>,
    plane_attn: &mut [U::Scalar],
    width: usize,
    dilation: usize,
) {
    let nb = neighborhood_size(KERNEL_SIZE);
    let area = KERNEL_SIZE * KERNEL_SIZE;
    let units = geo.head_units;
    let tile = &geo.config;

    for thread in 0..tile.threads() {
        let query = thread / area;
        let offset = thread % area;
        let (qy, qx) = (query / tile.tile_x, query % tile.tile_x);
        let (gy, gx) = (origin.0 + qy, origin.1 + qx);
        if gy >= group.len_y || gx >= group.len_x {
            continue;
        }

        let ky = window_start(gy, group.len_y, KERNEL_SIZE, nb, 1) + offset / KERNEL_SIZE
            - key_origin.0;
        let kx = window_start(gx, group.len_x, KERNEL_SIZE, nb, 1) + offset % KERNEL_SIZE
            - key_origin.1;
        let q = geo.query_slot(qy, qx);
        let k = geo.key_slot(ky, kx);

        let pos = group.position(gy, gx, width, dilation);
        plane_attn[pos * area + offset] =
            dot(&scratch.query[q..q + units], &scratch.key[k..k + units]);
    }
}
