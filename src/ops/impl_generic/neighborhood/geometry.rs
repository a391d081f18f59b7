//! Window geometry for 2D neighborhood attention
//!
//! Along one axis of length `L`, a query at `index` attends to `K` positions spaced
//! `dilation` apart. Positions split into `dilation` interleaved groups by
//! `index % dilation`. Inside its group a window is centered on the query and shifted
//! inward near either edge, never padded:
//!
//! ```text
//! L = 9, K = 5, dilation = 1
//!
//! index:   0 1 2 3 4 5 6 7 8
//! start:   0 0 0 1 2 3 4 4 4
//! ```
//!
//! The backward helpers invert this map: for an input position they return the
//! half-open range of output positions (stepping by `dilation`) whose window reads it.
//! Every function requires `length >= kernel_size * dilation`.

use std::iter::StepBy;
use std::ops::Range;

/// Window edges with a kernel instantiation.
pub const SUPPORTED_KERNEL_SIZES: [usize; 5] = [5, 7, 9, 11, 13];

/// Whether `kernel_size` has a kernel instantiation.
pub fn is_supported_kernel_size(kernel_size: usize) -> bool {
    SUPPORTED_KERNEL_SIZES.contains(&kernel_size)
}

/// Half-width of a window: `(kernel_size - 1) / 2`.
pub const fn neighborhood_size(kernel_size: usize) -> usize {
    (kernel_size - 1) / 2
}

/// Number of positions sharing `residue` (mod `dilation`) on an axis of `length`.
#[inline]
pub fn group_length(residue: usize, length: usize, dilation: usize) -> usize {
    let dilation = dilation.max(1);
    (length - residue).div_ceil(dilation)
}

/// First position of the window that `index` attends to.
///
/// The returned start has the same residue as `index`; the window covers
/// `start, start + dilation, ..., start + (kernel_size - 1) * dilation`.
#[inline]
pub fn window_start(
    index: usize,
    length: usize,
    kernel_size: usize,
    neighborhood_size: usize,
    dilation: usize,
) -> usize {
    debug_assert!(length >= kernel_size * dilation.max(1));
    if dilation <= 1 {
        return index
            .saturating_sub(neighborhood_size)
            .min(length - kernel_size);
    }
    let residue = index % dilation;
    let group_len = (length - residue).div_ceil(dilation);
    let start = (index / dilation)
        .saturating_sub(neighborhood_size)
        .min(group_len - kernel_size);
    residue + start * dilation
}

/// First output position whose window can contain input position `index`.
#[inline]
pub fn backward_window_start(
    index: usize,
    kernel_size: usize,
    neighborhood_size: usize,
    dilation: usize,
) -> usize {
    let dilation = dilation.max(1);
    if index < kernel_size * dilation {
        index % dilation
    } else {
        index - neighborhood_size * dilation
    }
}

/// One past the last output position whose window can contain input position `index`.
#[inline]
pub fn backward_window_end(
    index: usize,
    length: usize,
    kernel_size: usize,
    neighborhood_size: usize,
    dilation: usize,
) -> usize {
    let dilation = dilation.max(1);
    if index + kernel_size * dilation >= length {
        length
    } else {
        index + (neighborhood_size + 1) * dilation
    }
}

/// Output positions whose window contains input position `index`.
pub fn backward_window_range(
    index: usize,
    length: usize,
    kernel_size: usize,
    neighborhood_size: usize,
    dilation: usize,
) -> StepBy<Range<usize>> {
    let start = backward_window_start(index, kernel_size, neighborhood_size, dilation);
    let end = backward_window_end(index, length, kernel_size, neighborhood_size, dilation);
    (start..end).step_by(dilation.max(1))
}

/// Slot of `index` inside a window starting at `start`.
#[inline]
pub fn window_offset(index: usize, start: usize, dilation: usize) -> usize {
    debug_assert!(index >= start);
    (index - start) / dilation.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Signed transcription of the edge-shifting rule, written against raw offsets.
    fn reference_window_start(index: i64, length: i64, kernel: i64, nb: i64, dilation: i64) -> i64 {
        if dilation <= 1 {
            let shift = if index + nb >= length {
                length - index - nb - 1
            } else {
                0
            };
            return (index - nb).max(0) + shift;
        }
        if index - nb * dilation < 0 {
            return index % dilation;
        }
        if index + nb * dilation >= length {
            let imodd = index % dilation;
            let a = (length / dilation) * dilation;
            let b = length - a;
            if imodd < b {
                return length - b + imodd - 2 * nb * dilation;
            }
            return a + imodd - kernel * dilation;
        }
        index - nb * dilation
    }

    /// Every (length, kernel, dilation) with `length >= kernel * dilation` up to
    /// a few extra groups past the minimum.
    fn geometry_grid() -> Vec<(usize, usize, usize)> {
        let mut grid = Vec::new();
        for &kernel in &SUPPORTED_KERNEL_SIZES {
            for dilation in 1..=4 {
                let min_len = kernel * dilation;
                for length in min_len..=min_len + 3 * dilation + 9 {
                    grid.push((length, kernel, dilation));
                }
            }
        }
        grid
    }

    fn window_contains(x: usize, i: usize, length: usize, kernel: usize, dilation: usize) -> bool {
        let start = window_start(x, length, kernel, neighborhood_size(kernel), dilation);
        i >= start && (i - start) % dilation == 0 && (i - start) / dilation < kernel
    }

    #[test]
    fn test_neighborhood_size() {
        assert_eq!(neighborhood_size(5), 2);
        assert_eq!(neighborhood_size(7), 3);
        assert_eq!(neighborhood_size(13), 6);
        assert!(is_supported_kernel_size(11));
        assert!(!is_supported_kernel_size(3));
        assert!(!is_supported_kernel_size(6));
    }

    #[test]
    fn test_window_start_matches_reference() {
        for (length, kernel, dilation) in geometry_grid() {
            let nb = neighborhood_size(kernel);
            for i in 0..length {
                let got = window_start(i, length, kernel, nb, dilation);
                let want = reference_window_start(
                    i as i64,
                    length as i64,
                    kernel as i64,
                    nb as i64,
                    dilation as i64,
                );
                assert_eq!(
                    got as i64, want,
                    "window_start(i={i}, L={length}, K={kernel}, d={dilation})"
                );
            }
        }
    }

    #[test]
    fn test_window_contains_query_and_fits_axis() {
        for (length, kernel, dilation) in geometry_grid() {
            let nb = neighborhood_size(kernel);
            for i in 0..length {
                let start = window_start(i, length, kernel, nb, dilation);
                assert_eq!(start % dilation, i % dilation);
                assert!(window_contains(i, i, length, kernel, dilation));
                assert!(start + (kernel - 1) * dilation < length);
            }
        }
    }

    #[test]
    fn test_interior_windows_are_centered() {
        for (length, kernel, dilation) in geometry_grid() {
            let nb = neighborhood_size(kernel);
            for i in nb * dilation..length.saturating_sub(nb * dilation) {
                assert_eq!(
                    window_start(i, length, kernel, nb, dilation),
                    i - nb * dilation,
                    "i={i}, L={length}, K={kernel}, d={dilation}"
                );
            }
        }
    }

    #[test]
    fn test_edge_windows_are_shifted() {
        // L=9, K=5: leading queries share the first window, trailing share the last
        let starts: Vec<usize> = (0..9).map(|i| window_start(i, 9, 5, 2, 1)).collect();
        assert_eq!(starts, vec![0, 0, 0, 1, 2, 3, 4, 4, 4]);

        // L=11, K=5, d=2: residue 0 has 6 positions, residue 1 has 5
        let starts: Vec<usize> = (0..11).map(|i| window_start(i, 11, 5, 2, 2)).collect();
        assert_eq!(starts, vec![0, 1, 0, 1, 0, 1, 2, 1, 2, 1, 2]);
    }

    #[test]
    fn test_backward_range_is_exact_inverse() {
        for (length, kernel, dilation) in geometry_grid() {
            let nb = neighborhood_size(kernel);
            for i in 0..length {
                let got: Vec<usize> = backward_window_range(i, length, kernel, nb, dilation).collect();
                let want: Vec<usize> = (0..length)
                    .filter(|&x| window_contains(x, i, length, kernel, dilation))
                    .collect();
                assert_eq!(
                    got, want,
                    "backward range of i={i}, L={length}, K={kernel}, d={dilation}"
                );
            }
        }
    }

    #[test]
    fn test_every_window_slot_round_trips() {
        for (length, kernel, dilation) in geometry_grid() {
            let nb = neighborhood_size(kernel);
            for x in 0..length {
                let start = window_start(x, length, kernel, nb, dilation);
                for k in 0..kernel {
                    let i = start + k * dilation;
                    assert_eq!(window_offset(i, start, dilation), k);
                    assert!(
                        backward_window_range(i, length, kernel, nb, dilation).any(|o| o == x),
                        "x={x} missing from backward range of i={i} (L={length}, K={kernel}, d={dilation})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_group_length() {
        assert_eq!(group_length(0, 11, 2), 6);
        assert_eq!(group_length(1, 11, 2), 5);
        assert_eq!(group_length(0, 7, 1), 7);
        assert_eq!(group_length(2, 12, 3), 4);
    }
}
