//! Device-less backend that records the dispatch schedule.
//!
//! No kernel code runs: a dispatch only appends a [`DispatchRecord`]. Buffer
//! contents live on the host, so uploads and readbacks round-trip, and the
//! recorded schedule can be checked for ordering and buffer hazards without
//! an adapter. Used by tests and by the `--plan` dry run.

use crate::backend::{Bindings, ComputeBackend, Slot};
use crate::binding::{ComputeProgram, KernelId};
use crate::error::KernelError;
use crate::grid::GridDims;
use crate::uniforms::FrameUniforms;

/// Handle to a recorded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u32);

/// One recorded dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    /// Kernel dispatched.
    pub kernel: KernelId,
    /// Workgroup counts.
    pub groups: [u32; 3],
    /// Buffer written.
    pub output: BufferId,
    /// Buffers bound to read slots.
    pub reads: Vec<(Slot, BufferId)>,
    /// Scratch buffer, if bound.
    pub scratch: Option<BufferId>,
    /// Uniforms bound to the dispatch.
    pub uniforms: FrameUniforms,
    /// Index of the submission this dispatch belongs to.
    pub submission: usize,
}

#[derive(Debug)]
struct RecordedBuffer {
    label: String,
    len: usize,
    // None until first written; reads of an unwritten buffer see zeros.
    data: Option<Vec<f32>>,
    released: bool,
}

/// Backend that records instead of executing.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    buffers: Vec<RecordedBuffer>,
    dispatches: Vec<DispatchRecord>,
    loaded: Vec<KernelId>,
    submissions: usize,
    pending: usize,
    released: usize,
    buffer_limit: Option<usize>,
    fail_dispatch_at: Option<usize>,
}

impl RecordingBackend {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail buffer creation once `limit` buffers have been created.
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = Some(limit);
        self
    }

    /// Fail the dispatch with this zero-based index.
    pub fn with_dispatch_failure(mut self, index: usize) -> Self {
        self.fail_dispatch_at = Some(index);
        self
    }

    /// Every dispatch recorded so far, in order.
    pub fn dispatches(&self) -> &[DispatchRecord] {
        &self.dispatches
    }

    /// Kernel ids of every dispatch, in order.
    pub fn kernel_sequence(&self) -> Vec<KernelId> {
        self.dispatches.iter().map(|d| d.kernel).collect()
    }

    /// Forget recorded dispatches (buffers are kept).
    pub fn clear_dispatches(&mut self) {
        self.dispatches.clear();
    }

    /// Kernels loaded, in load order.
    pub fn loaded_kernels(&self) -> &[KernelId] {
        &self.loaded
    }

    /// Number of completed submissions.
    pub fn submissions(&self) -> usize {
        self.submissions
    }

    /// Dispatches recorded but not yet submitted.
    pub fn pending_dispatches(&self) -> usize {
        self.pending
    }

    /// Buffers created and not yet released.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.iter().filter(|b| !b.released).count()
    }

    /// Total number of release calls.
    pub fn released_count(&self) -> usize {
        self.released
    }

    /// Label a buffer was created with.
    pub fn label(&self, id: BufferId) -> Option<&str> {
        self.buffers.get(id.0 as usize).map(|b| b.label.as_str())
    }

    fn create(&mut self, label: &str, len: usize) -> Result<BufferId, KernelError> {
        if let Some(limit) = self.buffer_limit {
            if self.buffers.len() >= limit {
                return Err(KernelError::Allocation {
                    label: label.to_string(),
                    message: format!("recording limit of {limit} buffers reached"),
                });
            }
        }
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(RecordedBuffer {
            label: label.to_string(),
            len,
            data: None,
            released: false,
        });
        Ok(id)
    }

    fn live(&self, id: BufferId) -> Result<&RecordedBuffer, KernelError> {
        match self.buffers.get(id.0 as usize) {
            Some(buffer) if !buffer.released => Ok(buffer),
            Some(buffer) => Err(KernelError::BufferReleased(buffer.label.clone())),
            None => Err(KernelError::InvalidParams(format!("unknown buffer {id:?}"))),
        }
    }

    fn read(&mut self, id: BufferId) -> Result<Vec<f32>, KernelError> {
        self.submit()?;
        let buffer = self.live(id)?;
        Ok(match &buffer.data {
            Some(data) => data.clone(),
            None => vec![0.0; buffer.len],
        })
    }
}

impl ComputeBackend for RecordingBackend {
    type Buffer = BufferId;
    type Kernel = KernelId;

    fn name(&self) -> String {
        "recording".to_string()
    }

    fn create_field_buffer(&mut self, label: &str, dims: GridDims) -> Result<BufferId, KernelError> {
        self.create(label, dims.cell_count() * 4)
    }

    fn create_scratch_buffer(&mut self, label: &str, len: usize) -> Result<BufferId, KernelError> {
        self.create(label, len)
    }

    fn release_buffer(&mut self, id: BufferId) {
        self.released += 1;
        match self.buffers.get_mut(id.0 as usize) {
            Some(buffer) if buffer.released => {
                tracing::warn!("buffer `{}` released twice", buffer.label);
            }
            Some(buffer) => {
                buffer.released = true;
                buffer.data = None;
            }
            None => tracing::warn!("release of unknown buffer {:?}", id),
        }
    }

    fn load_kernel(&mut self, _program: &ComputeProgram, kernel: KernelId) -> Result<KernelId, KernelError> {
        self.loaded.push(kernel);
        Ok(kernel)
    }

    fn dispatch(
        &mut self,
        handle: &KernelId,
        kernel: KernelId,
        uniforms: &FrameUniforms,
        bindings: &Bindings<'_, BufferId>,
        groups: [u32; 3],
    ) -> Result<(), KernelError> {
        if self.fail_dispatch_at == Some(self.dispatches.len()) {
            return Err(KernelError::Submission(format!(
                "injected failure at dispatch of `{kernel}`"
            )));
        }
        if *handle != kernel {
            return Err(KernelError::InvalidParams(format!(
                "handle for `{handle}` used to dispatch `{kernel}`"
            )));
        }

        let output = *bindings.output();
        self.live(output)?;
        let reads: Vec<(Slot, BufferId)> = bindings.reads().map(|(slot, id)| (slot, *id)).collect();
        for &(slot, id) in &reads {
            self.live(id)?;
            if id == output {
                return Err(KernelError::Submission(format!(
                    "`{kernel}` binds buffer `{}` for {slot:?} read and for write",
                    self.buffers[id.0 as usize].label
                )));
            }
        }
        let scratch = bindings.scratch_buffer().copied();
        if let Some(id) = scratch {
            self.live(id)?;
        }

        self.dispatches.push(DispatchRecord {
            kernel,
            groups,
            output,
            reads,
            scratch,
            uniforms: *uniforms,
            submission: self.submissions,
        });
        self.pending += 1;
        Ok(())
    }

    fn submit(&mut self) -> Result<(), KernelError> {
        if self.pending > 0 {
            tracing::trace!("recording submission {} ({} dispatches)", self.submissions, self.pending);
            self.pending = 0;
            self.submissions += 1;
        }
        Ok(())
    }

    fn read_field(&mut self, id: &BufferId) -> Result<Vec<[f32; 4]>, KernelError> {
        let flat = self.read(*id)?;
        Ok(flat
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect())
    }

    fn write_field(&mut self, id: &BufferId, data: &[[f32; 4]]) -> Result<(), KernelError> {
        self.submit()?;
        let len = self.live(*id)?.len;
        if data.len() * 4 != len {
            return Err(KernelError::InvalidParams(format!(
                "write of {} cells into a buffer of {} cells",
                data.len(),
                len / 4
            )));
        }
        let flat: Vec<f32> = data.iter().flatten().copied().collect();
        self.buffers[id.0 as usize].data = Some(flat);
        Ok(())
    }

    fn read_scratch(&mut self, id: &BufferId) -> Result<Vec<f32>, KernelError> {
        self.read(*id)
    }
}
