//! The compute backend seam.
//!
//! Everything that touches a device goes through [`ComputeBackend`]. The
//! stages and the driver only describe *which* kernel runs over *which*
//! buffers; the backend decides how that is recorded and submitted.
//!
//! Implementations:
//! - `gpu::WgpuBackend` -- wgpu compute pipelines (feature `gpu`).
//! - [`RecordingBackend`](crate::recording::RecordingBackend) -- device-less,
//!   records the dispatch schedule and keeps buffer contents on the host.

use crate::binding::{ComputeProgram, KernelId};
use crate::error::KernelError;
use crate::grid::GridDims;
use crate::uniforms::FrameUniforms;

/// Read-only storage slots a kernel may bind, in binding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Binding 2.
    Velocity,
    /// Binding 3.
    Atmosphere,
    /// Binding 4.
    Obstacles,
    /// Binding 5.
    Vorticity,
    /// Binding 6.
    Divergence,
    /// Binding 7.
    Pressure,
}

impl Slot {
    /// Every read slot, in binding order.
    pub const ALL: [Slot; 6] = [
        Slot::Velocity,
        Slot::Atmosphere,
        Slot::Obstacles,
        Slot::Vorticity,
        Slot::Divergence,
        Slot::Pressure,
    ];

    /// Binding index in group 0.
    pub fn binding(self) -> u32 {
        2 + self as u32
    }
}

/// Buffers bound to one dispatch.
///
/// Exactly one field half is written (binding 1). Read slots left empty are
/// filled by the backend with a placeholder so every kernel can share one
/// layout. Binding 8 is the debug scratch buffer.
#[derive(Debug)]
pub struct Bindings<'a, B> {
    output: &'a B,
    reads: [Option<&'a B>; 6],
    scratch: Option<&'a B>,
}

impl<'a, B> Bindings<'a, B> {
    /// Start a binding set that writes into `output`.
    pub fn writing(output: &'a B) -> Self {
        Self {
            output,
            reads: [None; 6],
            scratch: None,
        }
    }

    /// Bind `buffer` to a read slot.
    pub fn read(mut self, slot: Slot, buffer: &'a B) -> Self {
        self.reads[slot as usize] = Some(buffer);
        self
    }

    /// Bind the debug scratch buffer.
    pub fn scratch(mut self, buffer: &'a B) -> Self {
        self.scratch = Some(buffer);
        self
    }

    /// Buffer written by the dispatch.
    pub fn output(&self) -> &'a B {
        self.output
    }

    /// Buffer bound to `slot`, if any.
    pub fn get(&self, slot: Slot) -> Option<&'a B> {
        self.reads[slot as usize]
    }

    /// Bound read slots, in binding order.
    pub fn reads(&self) -> impl Iterator<Item = (Slot, &'a B)> + '_ {
        Slot::ALL
            .into_iter()
            .filter_map(|slot| self.get(slot).map(|buffer| (slot, buffer)))
    }

    /// Bound scratch buffer, if any.
    pub fn scratch_buffer(&self) -> Option<&'a B> {
        self.scratch
    }
}

/// A device able to run the simulation's compute kernels.
///
/// Dispatches are recorded in call order and executed in that order once
/// [`submit`](ComputeBackend::submit) is called. Readback and upload flush
/// pending work first, so they always observe every previously recorded
/// dispatch.
pub trait ComputeBackend {
    /// Device buffer handle.
    type Buffer;
    /// Loaded kernel handle.
    type Kernel;

    /// Short name for logs, e.g. the adapter name.
    fn name(&self) -> String;

    /// Allocate a zeroed buffer holding one `vec4<f32>` per cell of `dims`.
    fn create_field_buffer(&mut self, label: &str, dims: GridDims)
        -> Result<Self::Buffer, KernelError>;

    /// Allocate a zeroed buffer of `len` floats.
    fn create_scratch_buffer(&mut self, label: &str, len: usize)
        -> Result<Self::Buffer, KernelError>;

    /// Free a buffer. Consumes the handle.
    fn release_buffer(&mut self, buffer: Self::Buffer);

    /// Load `kernel` from an already validated `program`.
    fn load_kernel(
        &mut self,
        program: &ComputeProgram,
        kernel: KernelId,
    ) -> Result<Self::Kernel, KernelError>;

    /// Record one dispatch of `groups` workgroups.
    fn dispatch(
        &mut self,
        handle: &Self::Kernel,
        kernel: KernelId,
        uniforms: &FrameUniforms,
        bindings: &Bindings<'_, Self::Buffer>,
        groups: [u32; 3],
    ) -> Result<(), KernelError>;

    /// Submit everything recorded since the last submit, in order.
    fn submit(&mut self) -> Result<(), KernelError>;

    /// Copy a field buffer back to the host.
    fn read_field(&mut self, buffer: &Self::Buffer) -> Result<Vec<[f32; 4]>, KernelError>;

    /// Overwrite a field buffer from the host.
    fn write_field(&mut self, buffer: &Self::Buffer, data: &[[f32; 4]]) -> Result<(), KernelError>;

    /// Copy a scratch buffer back to the host.
    fn read_scratch(&mut self, buffer: &Self::Buffer) -> Result<Vec<f32>, KernelError>;
}
