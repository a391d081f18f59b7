//! Shape and precondition checks shared by every backend.

use numr::dtype::DType;
use numr::runtime::{Device, Runtime};
use numr::tensor::Tensor;

use super::geometry::{is_supported_kernel_size, neighborhood_size};
use crate::error::{Error, Result};

/// Validated dimensions of one AV call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvProblem {
    pub batch: usize,
    pub heads: usize,
    pub height: usize,
    pub width: usize,
    pub head_dim: usize,
    pub kernel_size: usize,
    pub dilation: usize,
    pub dtype: DType,
}

impl AvProblem {
    pub fn neighborhood_size(&self) -> usize {
        neighborhood_size(self.kernel_size)
    }

    /// `batch * heads` independent feature maps.
    pub fn planes(&self) -> usize {
        self.batch * self.heads
    }

    /// Spatial positions over all planes.
    pub fn positions(&self) -> usize {
        self.planes() * self.height * self.width
    }

    /// Window offsets per position.
    pub fn window_area(&self) -> usize {
        self.kernel_size * self.kernel_size
    }

    pub fn value_shape(&self) -> [usize; 5] {
        [self.batch, self.heads, self.height, self.width, self.head_dim]
    }

    pub fn attn_shape(&self) -> [usize; 5] {
        [
            self.batch,
            self.heads,
            self.height,
            self.width,
            self.window_area(),
        ]
    }
}

fn check_layout<R: Runtime>(
    name: &'static str,
    t: &Tensor<R>,
    value: &Tensor<R>,
) -> Result<()> {
    if t.device().id() != value.device().id() {
        return Err(Error::DeviceMismatch { tensor: name });
    }
    if !t.is_contiguous() {
        return Err(Error::NotContiguous { tensor: name });
    }
    if t.dtype() != value.dtype() {
        return Err(Error::DTypeMismatch {
            tensor: name,
            expected: value.dtype(),
            got: t.dtype(),
        });
    }
    if t.shape().len() != 5 {
        return Err(Error::InvalidArgument {
            arg: name,
            reason: format!("expected rank 5, got shape {:?}", t.shape()),
        });
    }
    Ok(())
}

/// Kernel edge from the flattened window length, e.g. 49 → 7.
fn kernel_size_from_area(area: usize) -> Result<usize> {
    let k = (area as f64).sqrt().round() as usize;
    if k * k != area {
        return Err(Error::InvalidArgument {
            arg: "attn",
            reason: format!("last dim {area} is not a square kernel area"),
        });
    }
    if !is_supported_kernel_size(k) {
        return Err(Error::UnsupportedKernelSize { kernel_size: k });
    }
    Ok(k)
}

/// Check `attn`, `value` and optionally `d_out` before any launch.
///
/// - `value`: `[B, heads, H, W, dim]`, F32 or F16
/// - `attn`: `[B, heads, H, W, K*K]`, same dtype as value
/// - `d_out`: same shape and dtype as value
pub fn validate_av_inputs<R: Runtime>(
    attn: &Tensor<R>,
    value: &Tensor<R>,
    d_out: Option<&Tensor<R>>,
    dilation: usize,
) -> Result<AvProblem> {
    let dtype = value.dtype();
    if !matches!(dtype, DType::F32 | DType::F16) {
        return Err(Error::UnsupportedDType {
            tensor: "value",
            dtype,
        });
    }
    if !value.is_contiguous() {
        return Err(Error::NotContiguous { tensor: "value" });
    }
    let v_shape = value.shape();
    if v_shape.len() != 5 {
        return Err(Error::InvalidArgument {
            arg: "value",
            reason: format!("expected rank 5 [B, heads, H, W, dim], got shape {v_shape:?}"),
        });
    }
    check_layout("attn", attn, value)?;
    if let Some(d_out) = d_out {
        check_layout("d_out", d_out, value)?;
        if d_out.shape() != v_shape {
            return Err(Error::ShapeMismatch {
                tensor: "d_out",
                expected: v_shape.to_vec(),
                got: d_out.shape().to_vec(),
            });
        }
    }

    if dilation == 0 {
        return Err(Error::InvalidArgument {
            arg: "dilation",
            reason: "must be >= 1".into(),
        });
    }

    let a_shape = attn.shape();
    if a_shape[..4] != v_shape[..4] {
        let mut expected = v_shape[..4].to_vec();
        expected.push(a_shape[4]);
        return Err(Error::ShapeMismatch {
            tensor: "attn",
            expected,
            got: a_shape.to_vec(),
        });
    }
    let kernel_size = kernel_size_from_area(a_shape[4])?;

    let problem = AvProblem {
        batch: v_shape[0],
        heads: v_shape[1],
        height: v_shape[2],
        width: v_shape[3],
        head_dim: v_shape[4],
        kernel_size,
        dilation,
        dtype,
    };

    let Some(window_span) = kernel_size.checked_mul(dilation) else {
        return Err(Error::InvalidArgument {
            arg: "dilation",
            reason: format!("kernel_size * dilation overflows ({kernel_size} * {dilation})"),
        });
    };
    for (axis, length) in [("height", problem.height), ("width", problem.width)] {
        if length < window_span {
            return Err(Error::WindowTooLarge {
                axis,
                length,
                kernel_size,
                dilation,
            });
        }
    }
    if dtype == DType::F16 && problem.head_dim % 2 != 0 {
        return Err(Error::OddHeadDim {
            head_dim: problem.head_dim,
        });
    }

    Ok(problem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cpu_setup;
    use numr::runtime::cpu::CpuRuntime;

    fn zeros(shape: &[usize]) -> Tensor<CpuRuntime> {
        let (_client, device) = cpu_setup();
        let n: usize = shape.iter().product();
        Tensor::<CpuRuntime>::from_slice(&vec![0.0f32; n], shape, &device)
    }

    #[test]
    fn test_valid_problem() {
        let attn = zeros(&[2, 3, 9, 10, 25]);
        let value = zeros(&[2, 3, 9, 10, 8]);
        let p = validate_av_inputs(&attn, &value, None, 1).unwrap();
        assert_eq!(p.kernel_size, 5);
        assert_eq!(p.neighborhood_size(), 2);
        assert_eq!(p.planes(), 6);
        assert_eq!(p.positions(), 6 * 90);
        assert_eq!(p.attn_shape(), [2, 3, 9, 10, 25]);
        assert_eq!(p.value_shape(), [2, 3, 9, 10, 8]);
    }

    #[test]
    fn test_rejects_unsupported_kernel_size() {
        let attn = zeros(&[1, 1, 9, 9, 9]);
        let value = zeros(&[1, 1, 9, 9, 4]);
        let err = validate_av_inputs(&attn, &value, None, 1).unwrap_err();
        assert!(matches!(err, Error::UnsupportedKernelSize { kernel_size: 3 }));
        assert!(err.to_string().contains("supported sizes are 5, 7, 9, 11, 13"));

        let attn = zeros(&[1, 1, 9, 9, 24]);
        let err = validate_av_inputs(&attn, &value, None, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "attn", .. }));
    }

    #[test]
    fn test_rejects_small_feature_map() {
        let attn = zeros(&[1, 1, 9, 12, 25]);
        let value = zeros(&[1, 1, 9, 12, 4]);
        let err = validate_av_inputs(&attn, &value, None, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::WindowTooLarge {
                axis: "height",
                length: 9,
                ..
            }
        ));
        assert!(validate_av_inputs(&attn, &value, None, 1).is_ok());
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let attn = zeros(&[1, 2, 7, 7, 25]);
        let value = zeros(&[1, 1, 7, 7, 4]);
        let err = validate_av_inputs(&attn, &value, None, 1).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { tensor: "attn", .. }));

        let attn = zeros(&[1, 1, 7, 7, 25]);
        let d_out = zeros(&[1, 1, 7, 7, 6]);
        let err = validate_av_inputs(&attn, &value, Some(&d_out), 1).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { tensor: "d_out", .. }));

        let rank4 = zeros(&[1, 7, 7, 4]);
        let err = validate_av_inputs(&attn, &rank4, None, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "value", .. }));
    }

    #[test]
    fn test_rejects_zero_dilation() {
        let attn = zeros(&[1, 1, 7, 7, 25]);
        let value = zeros(&[1, 1, 7, 7, 4]);
        let err = validate_av_inputs(&attn, &value, None, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "dilation", .. }));
    }

    #[test]
    fn test_rejects_overflowing_dilation() {
        let attn = zeros(&[1, 1, 7, 7, 25]);
        let value = zeros(&[1, 1, 7, 7, 2]);
        // 5 * dilation wraps to 4 in usize arithmetic
        let dilation = usize::MAX / 5 + 1;
        let err = validate_av_inputs(&attn, &value, None, dilation).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "dilation", .. }));

        let err = validate_av_inputs(&attn, &value, None, usize::MAX).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "dilation", .. }));
    }

    #[test]
    fn test_rejects_dtype_mismatch() {
        let (_client, device) = cpu_setup();
        let attn = Tensor::<CpuRuntime>::from_slice(&vec![0i32; 49 * 25], &[1, 1, 7, 7, 25], &device);
        let value = zeros(&[1, 1, 7, 7, 4]);
        let err = validate_av_inputs(&attn, &value, None, 1).unwrap_err();
        assert!(matches!(err, Error::DTypeMismatch { tensor: "attn", .. }));

        let err = validate_av_inputs(&value, &attn, None, 1).unwrap_err();
        assert!(matches!(err, Error::UnsupportedDType { tensor: "value", .. }));
    }
}
