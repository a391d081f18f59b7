//! Accumulation units shared by the full- and half-precision AV kernels
//!
//! Full precision works one `f32` channel at a time. Half precision packs two
//! adjacent channels into a [`Half2`] and runs fused multiply-add on both lanes,
//! so a head of `dim` channels is `dim / 2` units. Kernels are written once against
//! [`AvUnit`] and instantiated for both.

use bytemuck::{Pod, Zeroable};
use half::f16;
use numr::dtype::DType;
use std::fmt::Debug;

/// One accumulation unit of the AV kernels.
pub trait AvUnit: Copy + Send + Sync + Default + PartialEq + Debug + 'static {
    /// Attention weights and their gradients.
    type Scalar: Copy + Send + Sync + Default + PartialEq + Debug + 'static;

    /// Channels carried per unit.
    const LANES: usize;

    /// Storage dtype of tensors read and written through this unit.
    const DTYPE: DType;

    /// Precision name used in launch logs.
    const NAME: &'static str;

    fn zero() -> Self {
        Self::default()
    }

    /// `self + w * v` on every lane.
    fn scale_add(self, w: Self::Scalar, v: Self) -> Self;

    /// `self + a * b` lane-wise.
    fn mul_add(self, a: Self, b: Self) -> Self;

    /// Sum of all lanes.
    fn horizontal_sum(self) -> Self::Scalar;

    /// Pack consecutive channels into units. `channels.len()` must be a multiple of `LANES`.
    fn pack(channels: &[f32]) -> Vec<Self>;

    /// Unpack units back into channels.
    fn unpack(units: &[Self]) -> Vec<f32>;

    fn scalar_from_f32(x: f32) -> Self::Scalar;

    fn scalar_to_f32(x: Self::Scalar) -> f32;
}

/// Dot product of two unit rows, reduced to one scalar.
///
/// Accumulates unit-wise and reduces lanes once at the end. Both the generic and the
/// tiled backward-to-attention kernels go through this function, which keeps their
/// F32 results bit-identical.
#[inline]
pub fn dot<U: AvUnit>(a: &[U], b: &[U]) -> U::Scalar {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .fold(U::zero(), |acc, (&x, &y)| acc.mul_add(x, y))
        .horizontal_sum()
}

impl AvUnit for f32 {
    type Scalar = f32;
    const LANES: usize = 1;
    const DTYPE: DType = DType::F32;
    const NAME: &'static str = "fp32";

    #[inline]
    fn scale_add(self, w: f32, v: f32) -> f32 {
        self + w * v
    }

    #[inline]
    fn mul_add(self, a: f32, b: f32) -> f32 {
        self + a * b
    }

    #[inline]
    fn horizontal_sum(self) -> f32 {
        self
    }

    fn pack(channels: &[f32]) -> Vec<f32> {
        channels.to_vec()
    }

    fn unpack(units: &[f32]) -> Vec<f32> {
        units.to_vec()
    }

    #[inline]
    fn scalar_from_f32(x: f32) -> f32 {
        x
    }

    #[inline]
    fn scalar_to_f32(x: f32) -> f32 {
        x
    }
}

/// Two half-precision channels operated on as one unit.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Half2 {
    pub lo: f16,
    pub hi: f16,
}

impl Half2 {
    pub const fn new(lo: f16, hi: f16) -> Self {
        Self { lo, hi }
    }

    pub const fn splat(x: f16) -> Self {
        Self { lo: x, hi: x }
    }
}

/// `a * b + c` rounded once to half precision.
///
/// Products and sums of halves are exact in f64, so the only rounding is the final
/// conversion.
#[inline]
fn hfma(a: f16, b: f16, c: f16) -> f16 {
    f16::from_f64(a.to_f64() * b.to_f64() + c.to_f64())
}

impl AvUnit for Half2 {
    type Scalar = f16;
    const LANES: usize = 2;
    const DTYPE: DType = DType::F16;
    const NAME: &'static str = "fp16x2";

    #[inline]
    fn scale_add(self, w: f16, v: Half2) -> Half2 {
        self.mul_add(Half2::splat(w), v)
    }

    #[inline]
    fn mul_add(self, a: Half2, b: Half2) -> Half2 {
        Half2 {
            lo: hfma(a.lo, b.lo, self.lo),
            hi: hfma(a.hi, b.hi, self.hi),
        }
    }

    #[inline]
    fn horizontal_sum(self) -> f16 {
        f16::from_f32(self.lo.to_f32() + self.hi.to_f32())
    }

    fn pack(channels: &[f32]) -> Vec<Half2> {
        debug_assert_eq!(channels.len() % 2, 0);
        channels
            .chunks_exact(2)
            .map(|pair| Half2::new(f16::from_f32(pair[0]), f16::from_f32(pair[1])))
            .collect()
    }

    fn unpack(units: &[Half2]) -> Vec<f32> {
        bytemuck::cast_slice::<Half2, f16>(units)
            .iter()
            .map(|h| h.to_f32())
            .collect()
    }

    #[inline]
    fn scalar_from_f32(x: f32) -> f16 {
        f16::from_f32(x)
    }

    #[inline]
    fn scalar_to_f32(x: f16) -> f32 {
        x.to_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half2_pack_unpack_keeps_channel_order() {
        let channels = [1.0f32, -2.0, 0.5, 3.25];
        let units = Half2::pack(&channels);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].lo, f16::from_f32(1.0));
        assert_eq!(units[0].hi, f16::from_f32(-2.0));
        assert_eq!(Half2::unpack(&units), channels.to_vec());
    }

    #[test]
    fn test_half2_mul_add_is_lane_wise() {
        let acc = Half2::new(f16::from_f32(1.0), f16::from_f32(2.0));
        let a = Half2::new(f16::from_f32(3.0), f16::from_f32(4.0));
        let b = Half2::new(f16::from_f32(0.5), f16::from_f32(-1.0));
        let r = acc.mul_add(a, b);
        assert_eq!(r.lo.to_f32(), 2.5);
        assert_eq!(r.hi.to_f32(), -2.0);
    }

    #[test]
    fn test_half2_scale_add_broadcasts_weight() {
        let v = Half2::new(f16::from_f32(2.0), f16::from_f32(-6.0));
        let r = Half2::zero().scale_add(f16::from_f32(0.5), v);
        assert_eq!(Half2::unpack(&[r]), vec![1.0, -3.0]);
    }

    #[test]
    fn test_dot_reduces_lanes_once() {
        let a = Half2::pack(&[1.0, 2.0, 3.0, 4.0]);
        let b = Half2::pack(&[1.0, 1.0, 2.0, 0.5]);
        // lo lanes: 1 + 6, hi lanes: 2 + 2
        assert_eq!(dot(&a, &b).to_f32(), 11.0);

        let x = [1.0f32, 2.0, 3.0];
        let y = [4.0f32, 5.0, 6.0];
        assert_eq!(dot(&x, &y), 32.0);
    }

    #[test]
    fn test_hfma_rounds_once() {
        // 2049 is not representable in f16; the fused result rounds to 2048
        let r = hfma(f16::from_f32(2048.0), f16::from_f32(1.0), f16::from_f32(1.0));
        assert_eq!(r.to_f32(), 2048.0);
        let r = hfma(f16::from_f32(0.1), f16::from_f32(10.0), f16::from_f32(0.0));
        assert!((r.to_f32() - 1.0).abs() < 1e-3);
    }
}
