//! natten error types

use numr::dtype::DType;

/// natten result type
pub type Result<T> = std::result::Result<T, Error>;

/// natten errors
///
/// Every variant is a call-aborting failure. Nothing in this crate retries or
/// falls back to a different precision.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from numr operations
    #[error("numr error: {0}")]
    Numr(#[from] numr::error::Error),

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Tensor shape does not match what the operation expects
    #[error("{tensor}: shape mismatch, expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Offending tensor
        tensor: &'static str,
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Tensor dtype differs from the value tensor's dtype
    #[error("{tensor}: dtype mismatch, expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        /// Offending tensor
        tensor: &'static str,
        /// Expected dtype
        expected: DType,
        /// Actual dtype
        got: DType,
    },

    /// Dtype has no kernel
    #[error("{tensor}: unsupported dtype {dtype:?} (supported: F32, F16)")]
    UnsupportedDType {
        /// Offending tensor
        tensor: &'static str,
        /// Actual dtype
        dtype: DType,
    },

    /// Tensor is not laid out contiguously
    #[error("{tensor} must be contiguous")]
    NotContiguous {
        /// Offending tensor
        tensor: &'static str,
    },

    /// Tensor lives on a different device than the value tensor
    #[error("{tensor} must be on the same device as value")]
    DeviceMismatch {
        /// Offending tensor
        tensor: &'static str,
    },

    /// Window edge has no kernel instantiation
    #[error("unsupported kernel size {kernel_size}: supported sizes are 5, 7, 9, 11, 13")]
    UnsupportedKernelSize {
        /// Requested window edge
        kernel_size: usize,
    },

    /// Half precision packs channel pairs, so the head dim must be even
    #[error("head dim {head_dim} must be even for half precision")]
    OddHeadDim {
        /// Channel count per head
        head_dim: usize,
    },

    /// Feature map axis cannot hold one full dilated window
    #[error(
        "{axis} ({length}) must be at least kernel_size * dilation ({kernel_size} * {dilation})"
    )]
    WindowTooLarge {
        /// Axis name
        axis: &'static str,
        /// Axis length
        length: usize,
        /// Window edge
        kernel_size: usize,
        /// Dilation factor
        dilation: usize,
    },

    /// Invalid configuration
    #[error("config error: {reason}")]
    Config {
        /// Description of what went wrong
        reason: String,
    },
}
