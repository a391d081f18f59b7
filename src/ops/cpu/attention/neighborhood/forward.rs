//! AV forward kernel.

use rayon::prelude::*;

use super::resolve_dilation;
use crate::ops::impl_generic::neighborhood::AvUnit;
use crate::ops::impl_generic::neighborhood::geometry::{neighborhood_size, window_start};

/// `out[pos, u] = sum_k attn[pos, k] * value[window(pos, k), u]`
///
/// One logical thread per `(position, unit)`; blocks of `threads_per_block`
/// threads run as rayon tasks. `DILATION == 0` reads `dilation` at runtime.
#[allow(clippy::too_many_arguments)]
pub fn av_forward<U: AvUnit, const KERNEL_SIZE: usize, const DILATION: usize>(
    attn: &[U::Scalar],
    value: &[U],
    out: &mut [U],
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

    out.par_chunks_mut(threads_per_block)
        .enumerate()
        .for_each(|(block, chunk)| {
            for (thread, o) in chunk.iter_mut().enumerate() {
                let linear = block * threads_per_block + thread;
                let u = linear % units;
                let pos = linear / units;
                let j = pos % width;
                let i = (pos / width) % height;
                let plane_base = (pos / plane_len) * plane_len;

                let ni = window_start(i, height, KERNEL_SIZE, nb, d);
                let nj = window_start(j, width, KERNEL_SIZE, nb, d);
                let weights = &attn[pos * area..(pos + 1) * area];

                let mut acc = U::zero();
                for ki in 0..KERNEL_SIZE {
                    let row = plane_base + (ni + ki * d) * width + nj;
                    for kj in 0..KERNEL_SIZE {
                        let v = value[(row + kj * d) * units + u];
                        acc = acc.scale_add(weights[ki * KERNEL_SIZE + kj], v);
                    }
                }
                *o = acc;
            }
        });
}
