//! GPU backend - runs kernels as full-screen render passes.

use std::collections::HashMap;

use log::{debug, info, trace};

use super::target::{RenderTarget, TARGET_FORMAT, create_bind_group_layout, extent};
use super::{GpuContext, GpuError, validate_wgsl};
use crate::compute::{
    ExecutionBackend, FRAGMENT_ENTRY, Grid, KernelSource, RuleBlock, Shape, TextureShape,
    VERTEX_ENTRY,
};

/// Clip-space corners of a triangle covering the whole viewport.
const FULLSCREEN_TRIANGLE: [f32; 6] = [-1.0, -1.0, 4.0, -1.0, -1.0, 4.0];

/// Uniform buffer struct for the frame index.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniforms {
    index: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
}

/// Per-shape GPU resources.
struct Resources {
    texture: TextureShape,
    front: RenderTarget,
    back: RenderTarget,
    triangle_buffer: wgpu::Buffer,
    frame_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    padded_row_bytes: u32,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<KernelSource, wgpu::RenderPipeline>,
    frame: u64,
}

/// Execution backend rendering into two ping-pong RGBA8 textures.
pub struct GpuBackend {
    context: Option<GpuContext>,
    resources: Option<Resources>,
}

impl GpuBackend {
    pub fn new(context: GpuContext) -> Self {
        Self {
            context: Some(context),
            resources: None,
        }
    }

    /// Create a backend on a freshly requested headless device.
    pub async fn headless() -> Result<Self, GpuError> {
        Ok(Self::new(GpuContext::headless().await?))
    }

    fn context(&self) -> Result<&GpuContext, GpuError> {
        self.context.as_ref().ok_or(GpuError::BackendReleased)
    }

    /// Number of distinct pipelines built since the last `configure`.
    pub fn cached_pipelines(&self) -> usize {
        self.resources.as_ref().map_or(0, |r| r.pipelines.len())
    }
}

fn padded_row_bytes(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Turn an error captured while allocating targets and buffers into a
/// typed allocation failure.
fn allocation_result(texture: TextureShape, captured: Option<wgpu::Error>) -> Result<(), GpuError> {
    match captured {
        None => Ok(()),
        Some(error) => Err(GpuError::ResourceAllocation {
            width: texture.width,
            height: texture.height,
            reason: error.to_string(),
        }),
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    kernel: &KernelSource,
) -> Result<wgpu::RenderPipeline, GpuError> {
    validate_wgsl(&kernel.vertex)?;
    validate_wgsl(&kernel.fragment)?;

    let vertex_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Kernel Vertex Shader"),
        source: wgpu::ShaderSource::Wgsl(kernel.vertex.as_str().into()),
    });
    let fragment_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Kernel Fragment Shader"),
        source: wgpu::ShaderSource::Wgsl(kernel.fragment.as_str().into()),
    });

    let attributes = [wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: 0,
        shader_location: 0,
    }];

    Ok(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Kernel Pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &vertex_shader,
            entry_point: Some(VERTEX_ENTRY),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: (2 * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &fragment_shader,
            entry_point: Some(FRAGMENT_ENTRY),
            targets: &[Some(wgpu::ColorTargetState {
                format: TARGET_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    }))
}

impl ExecutionBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn configure(&mut self, shape: Shape) -> Result<(), GpuError> {
        let context = self.context()?;
        let device = context.device();
        let texture = shape.texture_shape();

        let max = device.limits().max_texture_dimension_2d;
        if shape.is_empty() || texture.width > max || texture.height > max {
            return Err(GpuError::ResourceAllocation {
                width: texture.width,
                height: texture.height,
                reason: format!("exceeds the device limit of {max}"),
            });
        }

        let scope = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = create_bind_group_layout(device);
        let front = RenderTarget::new(device, texture, &bind_group_layout, &frame_buffer, "Front Target");
        let back = RenderTarget::new(device, texture, &bind_group_layout, &frame_buffer, "Back Target");

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Kernel Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            ..Default::default()
        });

        let triangle_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Fullscreen Triangle"),
            size: std::mem::size_of_val(&FULLSCREEN_TRIANGLE) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        context
            .queue()
            .write_buffer(&triangle_buffer, 0, bytemuck::cast_slice(&FULLSCREEN_TRIANGLE));

        let padded_row_bytes = padded_row_bytes(texture.width);
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: padded_row_bytes as u64 * texture.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        allocation_result(texture, pollster::block_on(scope.pop()))?;

        info!(
            "Configured GPU backend for {:?} ({}x{} texture)",
            shape, texture.width, texture.height
        );

        self.resources = Some(Resources {
            texture,
            front,
            back,
            triangle_buffer,
            frame_buffer,
            staging_buffer,
            padded_row_bytes,
            pipeline_layout,
            pipelines: HashMap::new(),
            frame: 0,
        });
        Ok(())
    }

    fn texture_shape(&self) -> Option<TextureShape> {
        self.resources.as_ref().map(|r| r.texture)
    }

    fn upload(&mut self, grid: &Grid) -> Result<(), GpuError> {
        let context = self.context.as_ref().ok_or(GpuError::BackendReleased)?;
        let resources = self.resources.as_ref().ok_or(GpuError::NotConfigured)?;
        let texture = resources.texture;

        context.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &resources.front.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &grid.to_rgba(texture),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(texture.width * 4),
                rows_per_image: Some(texture.height),
            },
            extent(texture),
        );
        Ok(())
    }

    fn execute(&mut self, block: &RuleBlock) -> Result<(), GpuError> {
        let context = self.context.as_ref().ok_or(GpuError::BackendReleased)?;
        let resources = self.resources.as_mut().ok_or(GpuError::NotConfigured)?;
        let device = context.device();
        let queue = context.queue();
        let kernel = block.kernel();

        if !resources.pipelines.contains_key(kernel) {
            debug!("Pipeline cache miss for kernel {:016x}", kernel.cache_key());
            let pipeline = create_pipeline(device, &resources.pipeline_layout, kernel)?;
            resources.pipelines.insert(kernel.clone(), pipeline);
        }
        let pipeline = &resources.pipelines[kernel];

        for _ in 0..block.iterations() {
            std::mem::swap(&mut resources.front, &mut resources.back);
            resources.frame += 1;

            let uniforms = FrameUniforms {
                index: resources.frame as f32,
                _pad0: 0.0,
                _pad1: 0.0,
                _pad2: 0.0,
            };
            queue.write_buffer(&resources.frame_buffer, 0, bytemuck::bytes_of(&uniforms));

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Kernel Step Encoder"),
            });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Kernel Step"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &resources.front.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &resources.back.bind_group, &[]);
                pass.set_vertex_buffer(0, resources.triangle_buffer.slice(..));
                pass.draw(0..3, 0..1);
            }
            queue.submit(std::iter::once(encoder.finish()));
        }

        trace!(
            "Executed '{}' for {} iterations (frame {})",
            block.descriptor().rule_string,
            block.iterations(),
            resources.frame
        );
        Ok(())
    }

    fn download(&mut self, grid: &mut Grid) -> Result<(), GpuError> {
        let context = self.context.as_ref().ok_or(GpuError::BackendReleased)?;
        let resources = self.resources.as_ref().ok_or(GpuError::NotConfigured)?;
        let device = context.device();
        let texture = resources.texture;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &resources.front.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &resources.staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(resources.padded_row_bytes),
                    rows_per_image: Some(texture.height),
                },
            },
            extent(texture),
        );
        context.queue().submit(std::iter::once(encoder.finish()));

        let buffer_slice = resources.staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver only disappears if download already bailed out.
            let _ = tx.send(result);
        });

        device.poll(wgpu::PollType::wait_indefinitely()).ok();
        rx.recv().map_err(|_| GpuError::ReadbackInterrupted)??;

        {
            let data = buffer_slice.get_mapped_range();
            grid.read_rgba_rows(&data, texture, resources.padded_row_bytes as usize);
        }
        resources.staging_buffer.unmap();
        Ok(())
    }

    fn release(&mut self) -> Result<(), GpuError> {
        if self.context.is_none() {
            return Err(GpuError::BackendReleased);
        }
        self.resources = None;
        self.context = None;
        info!("Released GPU backend");
        Ok(())
    }
}
