//! GPU buffer helpers for grid fields.
//!
//! Creates storage, uniform, placeholder and staging buffers and performs blocking
//! GPU->CPU readback.

use wgpu::util::DeviceExt;

use crate::error::KernelError;

/// Minimum buffer size (wgpu requires non-zero buffers). One `vec4<f32>` so
/// a placeholder satisfies the minimum binding size of a runtime array.
pub(crate) const MIN_BUF_SIZE: u64 = 16;

const STORAGE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Create a zeroed storage buffer of `size` bytes.
///
/// Allocation failures surface through an out-of-memory error scope instead
/// of the device's uncaptured error handler.
pub(crate) fn create_storage_buffer(
    device: &wgpu::Device,
    label: &str,
    size: u64,
) -> Result<wgpu::Buffer, KernelError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_BUF_SIZE),
        usage: STORAGE_USAGE,
        mapped_at_creation: false,
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => {
            buffer.destroy();
            Err(KernelError::Allocation {
                label: label.to_string(),
                message: err.to_string(),
            })
        }
        None => Ok(buffer),
    }
}

/// Create a small storage buffer bound to slots a kernel does not use.
pub(crate) fn create_placeholder_buffer(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: &[0u8; MIN_BUF_SIZE as usize],
        usage: STORAGE_USAGE,
    })
}

/// Create a uniform buffer of `size` bytes, filled through queue writes.
pub(crate) fn create_uniform_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_BUF_SIZE),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Create a staging (MAP_READ) buffer for readback.
fn create_staging_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_BUF_SIZE),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Copy `source` into a staging buffer and block until it can be read.
pub(crate) fn read_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
) -> Result<Vec<T>, KernelError> {
    let size = source.size();
    let staging = create_staging_buffer(device, "readback_staging", size);

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..size);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        // The receiver only goes away if this function already returned.
        let _ = tx.send(result);
    });
    let _ = device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| KernelError::Submission("readback callback dropped".into()))??;

    let data = slice.get_mapped_range();
    let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    staging.destroy();
    Ok(result)
}
