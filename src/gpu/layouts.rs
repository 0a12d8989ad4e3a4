//! Bind group layouts for layer programs.
//!
//! Every program uses the same two-set shape: set 0 carries the shared frame
//! uniforms, set 1 (present only when the program maps resources) carries the
//! resource textures in binding order followed by the shared sampler. Keeping
//! the layouts explicit means a pipeline layout is always a superset of what
//! the assembled GLSL declares, whatever subset the artist code actually
//! touches.

use wgpu::{BindGroupLayout, BindGroupLayoutEntry, Device, ShaderStages};

/// Builder for bind group layouts.
pub struct BindGroupLayoutBuilder {
    label: &'static str,
    entries: Vec<BindGroupLayoutEntry>,
}

impl BindGroupLayoutBuilder {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Vec::new(),
        }
    }

    /// Add a uniform buffer entry.
    pub fn uniform(mut self, binding: u32, visibility: ShaderStages) -> Self {
        self.entries.push(BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        self
    }

    /// Add a filterable 2-D texture entry.
    pub fn texture_2d(mut self, binding: u32, visibility: ShaderStages) -> Self {
        self.entries.push(BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        self
    }

    /// Add a filtering sampler entry.
    pub fn sampler(mut self, binding: u32, visibility: ShaderStages) -> Self {
        self.entries.push(BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
        self
    }

    pub fn build(self, device: &Device) -> BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(self.label),
            entries: &self.entries,
        })
    }
}

/// Set 0: the shared `FrameUniforms` block, visible to both stages.
pub fn frame_uniforms_layout(device: &Device) -> BindGroupLayout {
    BindGroupLayoutBuilder::new("frame_uniforms_layout")
        .uniform(0, ShaderStages::VERTEX | ShaderStages::FRAGMENT)
        .build(device)
}

/// Set 1: `texture_count` mapped textures at bindings `0..n`, the shared
/// sampler at binding `n`. Matches the assembler's declaration order exactly.
pub fn resource_layout(device: &Device, texture_count: u32) -> BindGroupLayout {
    let mut builder = BindGroupLayoutBuilder::new("resource_layout");
    for binding in 0..texture_count {
        builder = builder.texture_2d(binding, ShaderStages::FRAGMENT);
    }
    builder
        .sampler(texture_count, ShaderStages::FRAGMENT)
        .build(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuContext;

    #[tokio::test]
    async fn test_layouts_build() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return, // Skip if no GPU
        };

        let _frame = frame_uniforms_layout(&ctx.device);
        let _resources = resource_layout(&ctx.device, 3);
    }
}
