//! Error type shared by every layer of the kernel pipeline.

use crate::binding::Program;
use crate::grid::GridDims;

/// Failure raised while resolving kernels, managing grid buffers or
/// submitting work to a compute backend.
///
/// None of these are retried. A failed dispatch or submission ends the
/// simulation that issued it.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// No adapter could be acquired.
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    /// The adapter refused to create a device.
    #[cfg(feature = "gpu")]
    #[error("failed to create GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// A WGSL program failed to parse.
    #[error("failed to parse {program} program:\n{message}")]
    ShaderParse {
        /// Program whose source was rejected.
        program: Program,
        /// Diagnostic emitted by the parser.
        message: String,
    },

    /// A required kernel entry point is missing from its program.
    #[error("kernel `{kernel}` not found in {program} program")]
    KernelNotFound {
        /// Program that was searched.
        program: Program,
        /// Entry point that was expected.
        kernel: &'static str,
    },

    /// A program declares no compute entry points at all.
    #[error("{program} program has no compute kernels")]
    EmptyProgram {
        /// Offending program.
        program: Program,
    },

    /// Two kernels of one program use different workgroup geometry.
    #[error("kernel `{kernel}` uses thread group {found:?}, {program} program expects {expected:?}")]
    ThreadGroupMismatch {
        /// Program holding both kernels.
        program: Program,
        /// Kernel with the divergent geometry.
        kernel: String,
        /// Geometry of the first kernel in the program.
        expected: [u32; 3],
        /// Geometry of `kernel`.
        found: [u32; 3],
    },

    /// Grid extents do not tile evenly into a program's thread groups.
    #[error("grid {dims} is not a multiple of the {program} thread group {group:?}")]
    GridNotDivisible {
        /// Program whose thread group does not fit.
        program: Program,
        /// Realized grid extents.
        dims: GridDims,
        /// Thread-group size of `program`.
        group: [u32; 3],
    },

    /// One grid buffer would exceed the device's binding limit.
    #[error("grid buffer of {bytes} bytes exceeds the device limit of {limit} bytes")]
    GridTooLarge {
        /// Requested size of one buffer.
        bytes: u64,
        /// Largest storage binding the device accepts.
        limit: u64,
    },

    /// Buffer allocation failed on the device.
    #[error("failed to allocate buffer `{label}`: {message}")]
    Allocation {
        /// Label of the buffer being created.
        label: String,
        /// Backend diagnostic.
        message: String,
    },

    /// Compute pipeline creation failed for a kernel.
    #[error("failed to build pipeline for kernel `{kernel}`: {message}")]
    Pipeline {
        /// Entry point of the kernel.
        kernel: &'static str,
        /// Backend diagnostic.
        message: String,
    },

    /// Recorded work was rejected at dispatch or submission time.
    #[error("GPU submission failed: {0}")]
    Submission(String),

    /// Mapping a readback buffer failed.
    #[cfg(feature = "gpu")]
    #[error("failed to map readback buffer: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    /// A buffer was used after it had been released.
    #[error("buffer `{0}` used after release")]
    BufferReleased(String),

    /// Parameters passed to the pipeline are unusable.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}
