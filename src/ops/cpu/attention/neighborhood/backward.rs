//! Generic AV backward kernels, any head dim.

use rayon::prelude::*;

use super::resolve_dilation;
use crate::ops::impl_generic::neighborhood::geometry::{
    backward_window_range, neighborhood_size, window_offset, window_start,
};
use crate::ops::impl_generic::neighborhood::unit::{AvUnit, dot};

/// `d_attn[pos, k] = <d_out[pos, :], value[window(pos, k), :]>`
///
/// One logical thread per `(position, window offset)`. Half units reduce their two
/// lanes after the dot product.
#[allow(clippy::too_many_arguments)]
pub fn av_backward_attn<U: AvUnit, const KERNEL_SIZE: usize, const DILATION: usize>(
    d_out: &[U],
    value: &[U],
    d_attn: &mut [U::Scalar],
    height: usize,
    width: usize,
    units: usize,
    dilation: usize,
    threads_per_block: usize,
) {
    let nb = neighborhood_size(KERNEL_SIZE);
    let d = resolve_dilation::<DILATION>(dilation);
    let area = KERNEL_SIZE * KERNEL_SIZE;
    let plane_len = height * width;

    d_attn
        .par_chunks_mut(threads_per_block)
        .enumerate()
        .for_each(|(block, chunk)| {
            for (thread, da) in chunk.iter_mut().enumerate() {
                let linear = block * threads_per_block + thread;
                let offset = linear % area;
                let pos = linear / area;
                let j = pos % width;
                let i = (pos / width) % height;
                let plane_base = (pos / plane_len) * plane_len;

                let ki = offset / KERNEL_SIZE;
                let kj = offset % KERNEL_SIZE;
                let vi = window_start(i, height, KERNEL_SIZE, nb, d) + ki * d;
                let vj = window_start(j, width, KERNEL_SIZE, nb, d) + kj * d;
                let vpos = plane_base + vi * width + vj;

                *da = dot(
                    &d_out[pos * units..(pos + 1) * units],
                    &value[vpos * units..(vpos + 1) * units],
                );
            }
        });
}

/// `d_value[pos, u] = sum over x reading pos of attn[x, slot(pos in x)] * d_out[x, u]`
///
/// One logical thread per `(position, unit)`. Each thread gathers from the outputs
/// whose window contains it, so no two threads write the same element.
#[allow(clippy::too_many_arguments)]
pub fn av_backward_value<U: AvUnit, const KERNEL_SIZE: usize, const DILATION: usize>(
    d_out: &[U],
    attn: &[U::Scalar],
    d_value: &mut [U],
    height: usize,
    width: usize,
    units: usize,
    dilation: usize,
    threads_per_block: usize,
) {
    let nb = neighborhood_size(KERNEL_SIZE);
    let d = resolve_dilation::<DILATION>(dilation);
    let area = KERNEL_SIZE * KERNEL_SIZE;
    let plane_len = height * width;

    d_value
        .par_chunks_mut(threads_per_block)
        .enumerate()
        .for_each(|(block, chunk)| {
            for (thread, dv) in chunk.iter_mut().enumerate() {
                let linear = block * threads_per_block + thread;
                let u = linear % units;
                let pos = linear / units;
                let j = pos % width;
                let i = (pos / width) % height;
                let plane_base = (pos / plane_len) * plane_len;

                let mut acc = U::zero();
                for xi in backward_window_range(i, height, KERNEL_SIZE, nb, d) {
                    let ki = window_offset(i, window_start(xi, height, KERNEL_SIZE, nb, d), d);
                    for xj in backward_window_range(j, width, KERNEL_SIZE, nb, d) {
                        let kj = window_offset(j, window_start(xj, width, KERNEL_SIZE, nb, d), d);
                        let opos = plane_base + xi * width + xj;
                        let w = attn[opos * area + ki * KERNEL_SIZE + kj];
                        acc = acc.scale_add(w, d_out[opos * units + u]);
                    }
                }
                *dv = acc;
            }
        });
}
