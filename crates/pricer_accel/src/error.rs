//! Error taxonomy for the accelerator host layer.
//!
//! Errors are split by when they can occur:
//! - [`ResourceError`]: session creation and device claiming
//! - [`ValidationError`]: caller contract violations, detected before any
//!   device interaction
//! - [`ComputeError`]: a single asset's accelerator invocation failed; these
//!   are recorded per asset and never abort a batch
//! - [`AccelError`]: the error returned by the public pricing entry points

use std::fmt;
use thiserror::Error;

/// Status code reported by an accelerator binding.
///
/// Zero is never used for a failure; bindings map their native status
/// codes into this type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingStatus(pub i32);

impl BindingStatus {
    /// Generic failure with no more specific code.
    pub const FAILED: Self = Self(-1);
    /// Handle does not refer to a live object.
    pub const INVALID_HANDLE: Self = Self(-36);
    /// Offset or length lies outside the buffer.
    pub const OUT_OF_RANGE: Self = Self(-30);
    /// Program image could not be found or loaded.
    pub const IMAGE_NOT_FOUND: Self = Self(-44);
    /// Device memory allocation failed.
    pub const OUT_OF_RESOURCES: Self = Self(-5);

    /// Returns the raw status code.
    #[inline]
    pub fn code(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for BindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accelerator status {}", self.0)
    }
}

impl std::error::Error for BindingStatus {}

/// Step of session creation at which a failure occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InitStage {
    /// Loading or building the program image.
    LoadImage,
    /// Instantiating the kernel for a slot.
    CreateKernel {
        /// Slot index.
        slot: usize,
    },
    /// Allocating a slot's output buffer.
    CreateOutputBuffer {
        /// Slot index.
        slot: usize,
    },
    /// Allocating the shared seed buffer.
    CreateSeedBuffer,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStage::LoadImage => write!(f, "program image load"),
            InitStage::CreateKernel { slot } => write!(f, "kernel creation for slot {}", slot),
            InitStage::CreateOutputBuffer { slot } => {
                write!(f, "output buffer allocation for slot {}", slot)
            }
            InitStage::CreateSeedBuffer => write!(f, "seed buffer allocation"),
        }
    }
}

/// Errors raised while acquiring accelerator resources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// Image load, kernel creation or buffer allocation failed. Everything
    /// acquired before the failing step has already been released.
    #[error("session initialisation failed during {stage}: {status}")]
    InitializationFailed {
        /// Step that failed.
        stage: InitStage,
        /// Status reported by the binding.
        status: BindingStatus,
    },

    /// No program image is known for the device.
    #[error("no program image for device '{0}'")]
    UnsupportedDevice(String),

    /// The engine already owns a live session.
    #[error("a session is already active on device '{0}'")]
    SessionActive(String),
}

/// Caller contract violations, rejected before touching the accelerator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// More assets than the session's maximum batch width.
    #[error("batch of {requested} assets exceeds the maximum width of {max}")]
    BatchSizeExceeded {
        /// Number of assets submitted.
        requested: usize,
        /// Configured maximum batch width.
        max: usize,
    },

    /// A per-field input array does not have `num_assets` entries.
    #[error("field '{field}' has {actual} entries, expected {expected}")]
    ArrayLengthMismatch {
        /// Name of the offending field.
        field: &'static str,
        /// Declared number of assets.
        expected: usize,
        /// Actual length of the array.
        actual: usize,
    },

    /// A convergence criterion the kernel cannot honour.
    #[error("asset {asset}: invalid convergence criterion ({reason})")]
    InvalidCriterion {
        /// Index of the asset within the batch.
        asset: usize,
        /// Description of the problem.
        reason: String,
    },
}

/// Failure of one asset's accelerator invocation.
///
/// Recorded in that asset's [`RunResult`](crate::types::RunResult); the
/// remaining assets of the batch are still priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ComputeError {
    /// Kernel enqueue failed.
    #[error("kernel failed for asset {asset}: {status}")]
    KernelFailed {
        /// Index of the asset within the batch.
        asset: usize,
        /// Status reported by the binding.
        status: BindingStatus,
    },

    /// Host/device data movement failed.
    #[error("transfer failed for asset {asset}: {status}")]
    TransferFailed {
        /// Index of the asset within the batch.
        asset: usize,
        /// Status reported by the binding.
        status: BindingStatus,
    },
}

impl ComputeError {
    /// Index of the asset the error belongs to.
    pub fn asset(&self) -> usize {
        match self {
            ComputeError::KernelFailed { asset, .. } | ComputeError::TransferFailed { asset, .. } => {
                *asset
            }
        }
    }
}

/// Error returned by the public pricing API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccelError {
    /// Session could not be created.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Input rejected before dispatch.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Single-asset run whose only asset failed.
    #[error(transparent)]
    Compute(#[from] ComputeError),

    /// A run was requested with no live session.
    #[error("no accelerator session; call create_session first")]
    NoSession,

    /// The round barrier failed; the device is considered lost.
    #[error("synchronisation failed in round {round}: {status}")]
    SynchronizeFailed {
        /// Dispatch round that was waiting.
        round: usize,
        /// Status reported by the binding.
        status: BindingStatus,
    },
}
