//! GPU (Metal/Vulkan/DX12 via wgpu) implementation of [`ComputeBackend`].
//!
//! # Recording model
//! Dispatches are recorded into one pending command encoder, one compute
//! pass each, and submitted together by `submit()`. Queue order is therefore
//! program order. A validation error scope is pushed when the encoder is
//! opened and popped at submit, so binding or dispatch errors come back as
//! [`KernelError::Submission`] instead of reaching the uncaptured handler.
//!
//! # Bind group layout
//! Every kernel shares one layout (group 0):
//!
//! - 0: frame uniforms
//! - 1: output field (read_write)
//! - 2..=7: velocity, atmosphere, obstacles, vorticity, divergence, pressure
//!   (read)
//! - 8: debug scratch (read_write)
//!
//! That is eight storage buffers per stage, the wgpu default limit. Read
//! slots a dispatch leaves empty are bound to a placeholder, which never
//! aliases a field buffer.
//!
//! # Uniforms
//! Binding 0 uses a dynamic offset. Dispatch `k` of a submission writes its
//! uniforms to slot `k` of a set of uniform pages that persist across ticks,
//! so steady-state ticks allocate no uniform buffers. A page is only added
//! when a submission records more dispatches than every earlier one.

pub mod buffers;

use std::collections::HashMap;
use std::num::NonZeroU64;

use crate::backend::{Bindings, ComputeBackend, Slot};
use crate::binding::{ComputeProgram, KernelId, Program};
use crate::error::KernelError;
use crate::grid::GridDims;
use crate::uniforms::FrameUniforms;

/// Uniform slots per page.
const UNIFORM_PAGE_SLOTS: u64 = 64;

/// Check whether a GPU adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

/// wgpu-backed compute backend.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,

    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    shader_modules: HashMap<Program, wgpu::ShaderModule>,

    // Bound to unused read slots and to an unused scratch slot.
    placeholder_read: wgpu::Buffer,
    placeholder_scratch: wgpu::Buffer,

    // Slot k of a submission lives in page k / UNIFORM_PAGE_SLOTS.
    uniform_pages: Vec<wgpu::Buffer>,
    uniform_stride: u64,

    encoder: Option<wgpu::CommandEncoder>,
    pending_dispatches: u32,

    max_field_bytes: u64,
}

impl WgpuBackend {
    /// Acquire an adapter and device.
    ///
    /// Returns `Err(KernelError::NoAdapter)` when no adapter is present, so
    /// callers can skip GPU work.
    pub fn new() -> Result<Self, KernelError> {
        // --- Device initialization ---
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(KernelError::NoAdapter)?;

        let adapter_name = adapter.get_info().name;
        tracing::info!("GPU adapter: {:?}", adapter_name);

        // Field halves grow with the cube of the grid extent. Ask for the
        // adapter's real binding and buffer limits instead of the defaults.
        let adapter_limits = adapter.limits();
        let mut required_limits = wgpu::Limits::default();
        required_limits.max_storage_buffer_binding_size =
            adapter_limits.max_storage_buffer_binding_size;
        required_limits.max_buffer_size = adapter_limits.max_buffer_size;

        tracing::info!(
            "Requesting max_storage_buffer_binding_size = {} bytes",
            required_limits.max_storage_buffer_binding_size
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("atmosphere_device"),
                required_features: wgpu::Features::empty(),
                required_limits: required_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))?;

        // --- Shared bind group layout ---
        let mut entries = vec![bgl_uniform(0), bgl_storage_rw(1)];
        entries.extend(Slot::ALL.iter().map(|slot| bgl_storage_ro(slot.binding())));
        entries.push(bgl_storage_rw(8));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kernel_bgl"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("kernel_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let placeholder_read = buffers::create_placeholder_buffer(&device, "placeholder_read");
        let placeholder_scratch = buffers::create_placeholder_buffer(&device, "placeholder_scratch");

        let max_field_bytes = u64::from(required_limits.max_storage_buffer_binding_size)
            .min(required_limits.max_buffer_size);

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment).max(1);
        let uniform_stride = FrameUniforms::SIZE.div_ceil(alignment) * alignment;

        Ok(Self {
            device,
            queue,
            adapter_name,
            bind_group_layout,
            pipeline_layout,
            shader_modules: HashMap::new(),
            placeholder_read,
            placeholder_scratch,
            uniform_pages: Vec::new(),
            uniform_stride,
            encoder: None,
            pending_dispatches: 0,
            max_field_bytes,
        })
    }

    /// Device, for collaborators (e.g. a renderer) sharing the field buffers.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Queue the simulation submits to.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Largest field buffer the device accepts, in bytes.
    pub fn max_field_bytes(&self) -> u64 {
        self.max_field_bytes
    }

    /// Number of uniform pages allocated so far.
    pub fn uniform_page_count(&self) -> usize {
        self.uniform_pages.len()
    }

    /// Write `uniforms` into the slot of dispatch `index` and return the
    /// page holding it with the dynamic offset into that page.
    fn stage_uniforms(&mut self, index: u64, uniforms: &FrameUniforms) -> (usize, u32) {
        let page = (index / UNIFORM_PAGE_SLOTS) as usize;
        while self.uniform_pages.len() <= page {
            let label = format!("frame_uniforms_{}", self.uniform_pages.len());
            self.uniform_pages.push(buffers::create_uniform_buffer(
                &self.device,
                &label,
                self.uniform_stride * UNIFORM_PAGE_SLOTS,
            ));
        }
        let offset = (index % UNIFORM_PAGE_SLOTS) * self.uniform_stride;
        self.queue
            .write_buffer(&self.uniform_pages[page], offset, uniforms.as_bytes());
        (page, offset as u32)
    }

    fn begin_recording(&mut self) -> &mut wgpu::CommandEncoder {
        if self.encoder.is_none() {
            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        }
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tick_encoder"),
            })
        })
    }

    fn ensure_module(&mut self, program: &ComputeProgram) {
        let device = &self.device;
        self.shader_modules
            .entry(program.program())
            .or_insert_with(|| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(program.program().name()),
                    source: wgpu::ShaderSource::Wgsl(program.source().into()),
                })
            });
    }
}

impl ComputeBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type Kernel = wgpu::ComputePipeline;

    fn name(&self) -> String {
        self.adapter_name.clone()
    }

    fn create_field_buffer(&mut self, label: &str, dims: GridDims) -> Result<wgpu::Buffer, KernelError> {
        let bytes = dims.buffer_bytes();
        if bytes > self.max_field_bytes {
            return Err(KernelError::GridTooLarge {
                bytes,
                limit: self.max_field_bytes,
            });
        }
        buffers::create_storage_buffer(&self.device, label, bytes)
    }

    fn create_scratch_buffer(&mut self, label: &str, len: usize) -> Result<wgpu::Buffer, KernelError> {
        let bytes = (len * std::mem::size_of::<f32>()) as u64;
        buffers::create_storage_buffer(&self.device, label, bytes)
    }

    fn release_buffer(&mut self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }

    fn load_kernel(
        &mut self,
        program: &ComputeProgram,
        kernel: KernelId,
    ) -> Result<wgpu::ComputePipeline, KernelError> {
        self.ensure_module(program);
        let module = &self.shader_modules[&program.program()];

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel.entry_point()),
            layout: Some(&self.pipeline_layout),
            module,
            entry_point: Some(kernel.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(KernelError::Pipeline {
                kernel: kernel.entry_point(),
                message: err.to_string(),
            }),
            None => Ok(pipeline),
        }
    }

    fn dispatch(
        &mut self,
        handle: &wgpu::ComputePipeline,
        kernel: KernelId,
        uniforms: &FrameUniforms,
        bindings: &Bindings<'_, wgpu::Buffer>,
        groups: [u32; 3],
    ) -> Result<(), KernelError> {
        self.begin_recording();

        // Queue writes all land before the encoder runs, so every dispatch
        // of a submission needs its own slot.
        let (page, offset) = self.stage_uniforms(u64::from(self.pending_dispatches), uniforms);

        let bind_group = {
            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.uniform_pages[page],
                        offset: 0,
                        size: NonZeroU64::new(FrameUniforms::SIZE),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bindings.output().as_entire_binding(),
                },
            ];
            for slot in Slot::ALL {
                let buffer = bindings.get(slot).unwrap_or(&self.placeholder_read);
                entries.push(wgpu::BindGroupEntry {
                    binding: slot.binding(),
                    resource: buffer.as_entire_binding(),
                });
            }
            entries.push(wgpu::BindGroupEntry {
                binding: 8,
                resource: bindings
                    .scratch_buffer()
                    .unwrap_or(&self.placeholder_scratch)
                    .as_entire_binding(),
            });
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(kernel.entry_point()),
                layout: &self.bind_group_layout,
                entries: &entries,
            })
        };

        let encoder = self.begin_recording();
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.entry_point()),
                timestamp_writes: None,
            });
            pass.set_pipeline(handle);
            pass.set_bind_group(0, &bind_group, &[offset]);
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }
        self.pending_dispatches += 1;
        Ok(())
    }

    fn submit(&mut self) -> Result<(), KernelError> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        let dispatches = std::mem::take(&mut self.pending_dispatches);
        self.queue.submit(std::iter::once(encoder.finish()));

        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(KernelError::Submission(err.to_string())),
            None => {
                tracing::trace!("Submitted {} dispatches", dispatches);
                Ok(())
            }
        }
    }

    fn read_field(&mut self, buffer: &wgpu::Buffer) -> Result<Vec<[f32; 4]>, KernelError> {
        self.submit()?;
        buffers::read_buffer(&self.device, &self.queue, buffer)
    }

    fn write_field(&mut self, buffer: &wgpu::Buffer, data: &[[f32; 4]]) -> Result<(), KernelError> {
        self.submit()?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as u64 != buffer.size() {
            return Err(KernelError::InvalidParams(format!(
                "write of {} bytes into a buffer of {} bytes",
                bytes.len(),
                buffer.size()
            )));
        }
        self.queue.write_buffer(buffer, 0, bytes);
        Ok(())
    }

    fn read_scratch(&mut self, buffer: &wgpu::Buffer) -> Result<Vec<f32>, KernelError> {
        self.submit()?;
        buffers::read_buffer(&self.device, &self.queue, buffer)
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        if let Err(e) = self.submit() {
            tracing::warn!("Dropping backend with failed pending work: {e}");
        }
    }
}

// ---- Bind group layout entry helpers ----

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: NonZeroU64::new(FrameUniforms::SIZE),
        },
        count: None,
    }
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    bgl_storage(binding, true)
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    bgl_storage(binding, false)
}

fn bgl_storage(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
