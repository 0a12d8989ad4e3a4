//! Compiled layer programs.
//!
//! A [`LayerProgram`] owns everything one visual layer needs on the GPU: the
//! render pipeline compiled from assembled GLSL, the shared frame uniforms,
//! the vertex (and index) buffers its geometry constructor fills, and the
//! bound resources: uploaded image textures, scratch targets and nested
//! sub-programs rendered offscreen and sampled by the parent.
//!
//! Binding is idempotent: a rebind drops every previously allocated handle
//! before creating replacements, so repeated rebinds never grow the live
//! handle count. All GPU work happens on the thread that owns the context.

use super::context::GpuContext;
use super::layouts::{frame_uniforms_layout, resource_layout};
use super::targets::{RenderTarget, TARGET_FORMAT};
use crate::geometry::{
    FrameGeometry, FullScreenConstructor, GeometryConstructor, Topology, VertexLayout,
    FULLSCREEN_VERTEX_BODY,
};
use crate::score::PlaybackClock;
use crate::shader::assembler::{AssembleError, AssembledProgram, ShaderAssembler, StageSources};
use crate::shader::io::IoDeclError;
use crate::shader::resources::{ResolvedKind, ResolvedResource};
use crate::shader::IoRegistry;

/// Errors raised while building or binding a program.
#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    /// GPU driver / naga diagnostics, surfaced verbatim.
    #[error("{stage} shader failed to compile: {message}")]
    ShaderCompile { stage: String, message: String },
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error(transparent)]
    IoDecl(#[from] IoDeclError),
}

/// Always-available uniforms injected by the shared header, std140-shaped.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniforms {
    resolution: [f32; 2],
    elapsed_time: f32,
    frame_index: u32,
}

/// A resource bound to a program for its whole lifetime.
enum BoundResource {
    /// Decoded image uploaded to a texture.
    Texture {
        _texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
    /// Nested program rendered into its own target every frame.
    SubShader {
        program: Box<LayerProgram>,
        constructor: FullScreenConstructor,
        target: RenderTarget,
    },
    /// Offscreen scratch target with no producer.
    Scratch { target: RenderTarget },
}

impl BoundResource {
    fn view(&self) -> &wgpu::TextureView {
        match self {
            Self::Texture { view, .. } => view,
            Self::SubShader { target, .. } | Self::Scratch { target } => target.view(),
        }
    }
}

/// Reject assembled programs the wgpu backend cannot express.
///
/// The naga GLSL frontend has no geometry stage; quad expansion happens in
/// the constructors instead, so a present geometry source is a build error,
/// not something to silently drop.
pub(crate) fn validate_backend_support(assembled: &AssembledProgram) -> Result<(), ProgramError> {
    if assembled.geometry_src.is_some() {
        return Err(ProgramError::ShaderCompile {
            stage: "geometry".to_string(),
            message: "geometry shaders are not supported by the wgpu backend".to_string(),
        });
    }
    Ok(())
}

/// One visual layer compiled and bound on the GPU.
pub struct LayerProgram {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    resource_layout: Option<wgpu::BindGroupLayout>,
    resource_bind_group: Option<wgpu::BindGroup>,
    sampler: wgpu::Sampler,
    bound: Vec<BoundResource>,
    vertex_buffer: wgpu::Buffer,
    index_buffer: Option<wgpu::Buffer>,
    topology: Topology,
    layout: VertexLayout,
    declared_attributes: usize,
    max_vertices: u32,
    vertex_count: u32,
    resolution: (u32, u32),
    assembled: AssembledProgram,
}

impl LayerProgram {
    /// Compile `assembled` and bind its resources.
    ///
    /// `resolution` is the size of the target this program renders into; it
    /// feeds the shared `resolution` uniform and sizes nested targets that
    /// did not declare their own.
    pub fn new(
        ctx: &GpuContext,
        assembled: AssembledProgram,
        topology: Topology,
        max_vertices: u32,
        resolution: (u32, u32),
    ) -> Result<Self, ProgramError> {
        validate_backend_support(&assembled)?;

        let device = &ctx.device;
        let vertex_module = compile_glsl(
            device,
            "vertex",
            &assembled.vertex_src,
            wgpu::naga::ShaderStage::Vertex,
        )?;
        let fragment_module = compile_glsl(
            device,
            "fragment",
            &assembled.fragment_src,
            wgpu::naga::ShaderStage::Fragment,
        )?;

        let frame_layout = frame_uniforms_layout(device);
        let res_layout = (!assembled.resources.is_empty())
            .then(|| resource_layout(device, assembled.resources.len() as u32));

        let mut bind_group_layouts = vec![&frame_layout];
        if let Some(layout) = &res_layout {
            bind_group_layouts.push(layout);
        }
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("layer_pipeline_layout"),
            bind_group_layouts: &bind_group_layouts,
            immediate_size: 0,
        });

        let attributes = assembled.vertex_layout.wgpu_attributes();
        let primitive_topology = match topology {
            Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
            Topology::QuadList => wgpu::PrimitiveTopology::TriangleList,
        };

        let error_scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("layer_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: assembled.vertex_layout.stride(),
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: primitive_topology,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(error_scope.pop()) {
            return Err(ProgramError::ShaderCompile {
                stage: "pipeline".to_string(),
                message: err.to_string(),
            });
        }

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame_uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame_bind_group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("layer_vertices"),
            size: assembled.vertex_layout.stride() * max_vertices.max(1) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let index_buffer = match topology {
            Topology::QuadList => Some(quad_index_buffer(device, max_vertices / 4)),
            Topology::TriangleStrip => None,
        };

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("map_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let declared_attributes = assembled.io.vertex_attribute_count();
        let mut program = Self {
            pipeline,
            uniform_buffer,
            frame_bind_group,
            resource_layout: res_layout,
            resource_bind_group: None,
            sampler,
            bound: Vec::new(),
            vertex_buffer,
            index_buffer,
            topology,
            layout: assembled.vertex_layout.clone(),
            declared_attributes,
            max_vertices,
            vertex_count: 0,
            resolution,
            assembled,
        };
        program.rebind(ctx)?;
        Ok(program)
    }

    /// Release all bound resources and bind the table again.
    ///
    /// Old handles are dropped before any replacement is created; rebinding
    /// the same table twice leaves the live handle count unchanged.
    pub fn rebind(&mut self, ctx: &GpuContext) -> Result<(), ProgramError> {
        self.resource_bind_group = None;
        self.bound.clear();

        let entries: Vec<ResolvedResource> = self.assembled.resources.entries().to_vec();
        let mut bound = Vec::with_capacity(entries.len());
        for entry in &entries {
            bound.push(self.bind_one(ctx, entry)?);
        }
        self.bound = bound;

        if let Some(layout) = &self.resource_layout {
            let mut group_entries: Vec<wgpu::BindGroupEntry> = self
                .bound
                .iter()
                .enumerate()
                .map(|(i, resource)| wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: wgpu::BindingResource::TextureView(resource.view()),
                })
                .collect();
            group_entries.push(wgpu::BindGroupEntry {
                binding: self.bound.len() as u32,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
            self.resource_bind_group =
                Some(ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("resource_bind_group"),
                    layout,
                    entries: &group_entries,
                }));
        }
        Ok(())
    }

    fn bind_one(
        &self,
        ctx: &GpuContext,
        entry: &ResolvedResource,
    ) -> Result<BoundResource, ProgramError> {
        match &entry.payload {
            ResolvedKind::Image { pixels } => {
                let (width, height) = (pixels.width(), pixels.height());
                let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&entry.uniform_name),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: TARGET_FORMAT,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                });
                ctx.queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    pixels.as_raw(),
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(width * 4),
                        rows_per_image: Some(height),
                    },
                    wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                );
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                Ok(BoundResource::Texture {
                    _texture: texture,
                    view,
                })
            }
            ResolvedKind::SubShader { shader } => {
                let (width, height) = entry.declared_resolution.unwrap_or(self.resolution);
                let constructor = FullScreenConstructor::new();

                let mut io = IoRegistry::new();
                io.declare_all(constructor.io_contract())?;
                let assembled = ShaderAssembler::new().assemble(
                    StageSources::new(FULLSCREEN_VERTEX_BODY, shader.cleaned_source.clone()),
                    io,
                    shader.table.clone(),
                    constructor.vertex_layout().clone(),
                )?;

                let program = LayerProgram::new(
                    ctx,
                    assembled,
                    constructor.topology(),
                    constructor.max_vertices(),
                    (width, height),
                )?;
                let target =
                    RenderTarget::sampled(&ctx.device, &entry.uniform_name, width, height);
                Ok(BoundResource::SubShader {
                    program: Box::new(program),
                    constructor,
                    target,
                })
            }
            ResolvedKind::RenderTarget => {
                let (width, height) = entry.declared_resolution.unwrap_or(self.resolution);
                Ok(BoundResource::Scratch {
                    target: RenderTarget::sampled(&ctx.device, &entry.uniform_name, width, height),
                })
            }
        }
    }

    /// Count of live GPU texture handles owned by this program, nested
    /// programs included.
    pub fn live_texture_handles(&self) -> usize {
        self.bound
            .iter()
            .map(|resource| match resource {
                BoundResource::Texture { .. } | BoundResource::Scratch { .. } => 1,
                BoundResource::SubShader { program, .. } => 1 + program.live_texture_handles(),
            })
            .sum()
    }

    /// Upload this frame's geometry, if it changed.
    pub fn upload_geometry(&mut self, queue: &wgpu::Queue, frame: &FrameGeometry<'_>) {
        let vertex_count = frame.vertex_count();
        assert!(
            vertex_count <= self.max_vertices,
            "constructor produced {vertex_count} vertices for a buffer of {}",
            self.max_vertices
        );
        if let FrameGeometry::Updated { data, .. } = frame {
            assert_eq!(
                data.len() as u64,
                vertex_count as u64 * self.layout.stride(),
                "vertex bytes do not match layout `{}`",
                self.layout.spec_string()
            );
            if !data.is_empty() {
                queue.write_buffer(&self.vertex_buffer, 0, data);
            }
        }
        self.vertex_count = vertex_count;
    }

    /// Write the shared uniforms for the frame at `clock` and advance every
    /// nested sub-program (time-varying resources re-render before the
    /// parent samples them).
    pub fn prepare_frame(&mut self, ctx: &GpuContext, clock: &PlaybackClock) {
        let uniforms = FrameUniforms {
            resolution: [self.resolution.0 as f32, self.resolution.1 as f32],
            elapsed_time: clock.time() as f32,
            frame_index: clock.frame_index() as u32,
        };
        ctx.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        for resource in &mut self.bound {
            if let BoundResource::SubShader {
                program,
                constructor,
                ..
            } = resource
            {
                // Fullscreen geometry can't overflow its fixed quad.
                let frame = constructor
                    .next_frame_buffer(clock)
                    .expect("fullscreen constructor is infallible");
                program.upload_geometry(&ctx.queue, &frame);
                program.prepare_frame(ctx, clock);
            }
        }
    }

    /// Record this layer's draws: nested targets first, then the layer pass
    /// into `view`.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        load: wgpu::LoadOp<wgpu::Color>,
    ) {
        for resource in &self.bound {
            if let BoundResource::SubShader {
                program, target, ..
            } = resource
            {
                program.encode(encoder, target.view(), wgpu::LoadOp::Clear(wgpu::Color::BLACK));
            }
        }

        // The cross-component seam: layout shape must still match what the
        // shader declared.
        assert_eq!(
            self.layout.attribute_count(),
            self.declared_attributes,
            "vertex layout cardinality diverged from the shader's declarations"
        );

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("layer_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        if self.vertex_count == 0 {
            return;
        }

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &self.frame_bind_group, &[]);
        if let Some(resources) = &self.resource_bind_group {
            render_pass.set_bind_group(1, resources, &[]);
        }
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        match (self.topology, &self.index_buffer) {
            (Topology::QuadList, Some(indices)) => {
                render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                let index_count = self.vertex_count / 4 * 6;
                render_pass.draw_indexed(0..index_count, 0, 0..1);
            }
            _ => {
                render_pass.draw(0..self.vertex_count, 0..1);
            }
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn assembled(&self) -> &AssembledProgram {
        &self.assembled
    }
}

/// Compile one GLSL stage through the naga frontend, surfacing diagnostics.
fn compile_glsl(
    device: &wgpu::Device,
    stage_name: &str,
    source: &str,
    stage: wgpu::naga::ShaderStage,
) -> Result<wgpu::ShaderModule, ProgramError> {
    let error_scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(stage_name),
        source: wgpu::ShaderSource::Glsl {
            shader: source.into(),
            stage,
            defines: Default::default(),
        },
    });
    if let Some(err) = pollster::block_on(error_scope.pop()) {
        return Err(ProgramError::ShaderCompile {
            stage: stage_name.to_string(),
            message: err.to_string(),
        });
    }
    Ok(module)
}

/// Static index pattern turning quads of 4 vertices into two triangles each.
fn quad_index_buffer(device: &wgpu::Device, quad_count: u32) -> wgpu::Buffer {
    let mut indices = Vec::with_capacity(quad_count as usize * 6);
    for quad in 0..quad_count {
        let base = quad * 4;
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 1, base + 3]);
    }
    let bytes: &[u8] = bytemuck::cast_slice(&indices);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("quad_indices"),
        size: bytes.len().max(4) as u64,
        usage: wgpu::BufferUsages::INDEX,
        mapped_at_creation: true,
    });
    buffer.slice(..).get_mapped_range_mut()[..bytes.len()].copy_from_slice(bytes);
    buffer.unmap();
    buffer
}
