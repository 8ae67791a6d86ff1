//! wgpu-accelerated backend.
//!
//! Layer buffers stay on the CPU as the single source of truth (the store
//! owns them); the GPU holds per-layer texture mirrors refreshed from the
//! dirty rects, composites with one fullscreen blend pass per visible layer
//! into ping-pong targets, and reads the result back through a mapped
//! buffer. The GPU path always recomposites the full frame; the shipped
//! diff is still the merged dirty set, so callers see identical semantics
//! from both backends.

use std::collections::HashMap;

use compositor::{MergedRects, draw_selection_outline};
use protocol::{LayerId, Rect};
use wgpu::util::DeviceExt;

use crate::{BackendKind, CommandExecutor, RenderError, RendererBackend};

const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug)]
pub enum AcceleratedInitError {
    AdapterUnavailable { message: String },
    DeviceUnavailable { message: String },
    SurfaceTooLarge { limit: u32, requested: u32 },
}

impl std::fmt::Display for AcceleratedInitError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcceleratedInitError::AdapterUnavailable { message } => {
                write!(formatter, "no suitable adapter: {message}")
            }
            AcceleratedInitError::DeviceUnavailable { message } => {
                write!(formatter, "device request failed: {message}")
            }
            AcceleratedInitError::SurfaceTooLarge { limit, requested } => {
                write!(
                    formatter,
                    "surface dimension {requested} exceeds adapter limit {limit}"
                )
            }
        }
    }
}

struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuResources {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    target_a: RenderTarget,
    target_b: RenderTarget,
    layer_textures: HashMap<LayerId, wgpu::Texture>,
}

pub struct AcceleratedBackend {
    executor: CommandExecutor,
    gpu: Option<GpuResources>,
}

impl AcceleratedBackend {
    pub fn new(width: u32, height: u32) -> Result<Self, AcceleratedInitError> {
        let (device, queue) = pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|error| AcceleratedInitError::AdapterUnavailable {
                    message: error.to_string(),
                })?;

            // Capability probe before committing to the device.
            let limits = adapter.limits();
            let largest_dimension = width.max(height);
            if largest_dimension > limits.max_texture_dimension_2d {
                return Err(AcceleratedInitError::SurfaceTooLarge {
                    limit: limits.max_texture_dimension_2d,
                    requested: largest_dimension,
                });
            }

            adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("backend.accelerated"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .map_err(|error| AcceleratedInitError::DeviceUnavailable {
                    message: error.to_string(),
                })
        })?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("backend.blend"),
            source: wgpu::ShaderSource::Wgsl(include_str!("blend.wgsl").into()),
        });

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("backend.blend_layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("backend.blend_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("backend.blend_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: FRAME_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let target_a = create_render_target(&device, width, height, "backend.target_a");
        let target_b = create_render_target(&device, width, height, "backend.target_b");

        Ok(Self {
            executor: CommandExecutor::new(width, height),
            gpu: Some(GpuResources {
                device,
                queue,
                pipeline,
                bind_group_layout,
                target_a,
                target_b,
                layer_textures: HashMap::new(),
            }),
        })
    }

    fn refresh_layer_textures(&mut self, full_refresh: bool) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        let width = self.executor.surface_width();
        let height = self.executor.surface_height();

        if full_refresh {
            // Structural change: drop textures of removed layers, then
            // mirror every live layer in full.
            let live_ids: std::collections::HashSet<&LayerId> = self
                .executor
                .store()
                .ordered_layers()
                .iter()
                .map(|layer| layer.id())
                .collect();
            gpu.layer_textures
                .retain(|layer_id, _| live_ids.contains(layer_id));
            for layer in self.executor.store().ordered_layers() {
                let texture = gpu
                    .layer_textures
                    .entry(layer.id().clone())
                    .or_insert_with(|| {
                        create_layer_texture(&gpu.device, width, height, layer.id().as_str())
                    });
                upload_layer_rect(
                    &gpu.queue,
                    texture,
                    layer.pixels(),
                    width,
                    Rect::new(0, 0, width, height),
                );
            }
            return;
        }

        for region in self.executor.dirty().regions() {
            let Some(layer_id) = &region.layer_id else {
                continue;
            };
            let Ok(layer) = self.executor.store().layer(layer_id) else {
                continue;
            };
            let texture = gpu.layer_textures.entry(layer_id.clone()).or_insert_with(|| {
                create_layer_texture(&gpu.device, width, height, layer_id.as_str())
            });
            upload_layer_rect(&gpu.queue, texture, layer.pixels(), width, region.rect);
        }
    }

    fn composite_on_gpu(&mut self) -> Result<Vec<u8>, RenderError> {
        let gpu = self.gpu.as_mut().ok_or(RenderError::Disposed)?;
        let width = self.executor.surface_width();
        let height = self.executor.surface_height();

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("backend.composite"),
            });

        clear_target(&mut encoder, &gpu.target_a.view);

        for layer in self.executor.store().ordered_layers() {
            if !layer.visible || layer.opacity <= 0.0 {
                continue;
            }
            let Some(layer_texture) = gpu.layer_textures.get(layer.id()) else {
                continue;
            };
            let layer_view = layer_texture.create_view(&wgpu::TextureViewDescriptor::default());
            let params = BlendParamsGpu {
                mode: blend_mode_index(layer.blend_mode),
                opacity: layer.opacity,
                _pad0: 0,
                _pad1: 0,
            };
            let uniform_buffer =
                gpu.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("backend.blend_params"),
                        contents: bytemuck::bytes_of(&params),
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
            let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("backend.blend_bind_group"),
                layout: &gpu.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&gpu.target_a.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&layer_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                ],
            });

            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("backend.blend_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &gpu.target_b.view,
                        resolve_target: None,
                        depth_slice: None,
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
                pass.set_pipeline(&gpu.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }

            std::mem::swap(&mut gpu.target_a, &mut gpu.target_b);
        }

        // Readback rows must be 256-byte aligned.
        let unpadded_bytes_per_row = width * 4;
        let padded_bytes_per_row =
            unpadded_bytes_per_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("backend.readback"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.target_a.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(Some(encoder.finish()));

        let slice = readback_buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        gpu.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|error| RenderError::Gpu {
                message: format!("device poll failed: {error}"),
            })?;
        receiver
            .recv()
            .map_err(|_| RenderError::Gpu {
                message: "readback mapping callback dropped".to_string(),
            })?
            .map_err(|error| RenderError::Gpu {
                message: format!("readback mapping failed: {error:?}"),
            })?;

        let mapped = slice.get_mapped_range();
        let mut frame = vec![0u8; (width * height * 4) as usize];
        for row in 0..height as usize {
            let source_offset = row * padded_bytes_per_row as usize;
            let target_offset = row * unpadded_bytes_per_row as usize;
            frame[target_offset..target_offset + unpadded_bytes_per_row as usize]
                .copy_from_slice(
                    &mapped[source_offset..source_offset + unpadded_bytes_per_row as usize],
                );
        }
        drop(mapped);
        readback_buffer.unmap();
        Ok(frame)
    }
}

impl RendererBackend for AcceleratedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Accelerated
    }

    fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn executor_mut(&mut self) -> &mut CommandExecutor {
        &mut self.executor
    }

    fn commit_frame(&mut self, target: &mut [u8]) -> Result<MergedRects, RenderError> {
        if self.gpu.is_none() {
            return Err(RenderError::Disposed);
        }
        let full_surface = self.executor.dirty().is_full_surface_dirty();
        if self.executor.dirty().is_empty() {
            return Ok(MergedRects::new());
        }
        self.refresh_layer_textures(full_surface);
        let shipped = self.executor.dirty_mut().take_merged();

        let frame = self.composite_on_gpu()?;
        target.copy_from_slice(&frame);

        if let Some(selection) = self.executor.selection() {
            let width = self.executor.surface_width();
            let height = self.executor.surface_height();
            draw_selection_outline(
                selection.rect,
                width,
                height,
                Rect::new(0, 0, width, height),
                target,
            );
        }
        Ok(shipped)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let Some(gpu) = self.gpu.as_mut() else {
            return Err(RenderError::Disposed);
        };
        self.executor.resize(width, height);
        gpu.target_a = create_render_target(&gpu.device, width, height, "backend.target_a");
        gpu.target_b = create_render_target(&gpu.device, width, height, "backend.target_b");
        // Texture mirrors are stale at the old size; the pending full-surface
        // dirt re-uploads every layer on the next commit.
        gpu.layer_textures.clear();
        Ok(())
    }

    fn dispose(&mut self) {
        self.gpu = None;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct BlendParamsGpu {
    mode: u32,
    opacity: f32,
    _pad0: u32,
    _pad1: u32,
}

fn blend_mode_index(mode: protocol::BlendMode) -> u32 {
    match mode {
        protocol::BlendMode::Normal => 0,
        protocol::BlendMode::Multiply => 1,
        protocol::BlendMode::Screen => 2,
        protocol::BlendMode::Overlay => 3,
    }
}

fn create_render_target(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    label: &str,
) -> RenderTarget {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FRAME_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    RenderTarget { texture, view }
}

fn create_layer_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    label: &str,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FRAME_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

/// Upload one rect of a layer's CPU buffer into its texture mirror. The
/// source rows keep the layer's full stride; `write_texture` reads them in
/// place, so nothing is repacked.
fn upload_layer_rect(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    pixels: &[u8],
    layer_width: u32,
    rect: Rect,
) {
    if rect.is_empty() {
        return;
    }
    let stride = layer_width * 4;
    let start_offset = ((rect.y * layer_width + rect.x) * 4) as usize;
    let needed_bytes = ((rect.height - 1) * stride + rect.width * 4) as usize;
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d {
                x: rect.x,
                y: rect.y,
                z: 0,
            },
            aspect: wgpu::TextureAspect::All,
        },
        &pixels[start_offset..start_offset + needed_bytes],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(stride),
            rows_per_image: Some(rect.height),
        },
        wgpu::Extent3d {
            width: rect.width,
            height: rect.height,
            depth_or_array_layers: 1,
        },
    );
}

fn clear_target(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
    let _clear_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("backend.clear"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            depth_slice: None,
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
}

#[cfg(test)]
mod tests {
    use protocol::{BrushShape, Color, DrawCommand, LayerId, PathPoint};

    use super::*;
    use crate::RendererBackend;

    const WIDTH: u32 = 32;
    const HEIGHT: u32 = 32;

    fn acquire_backend() -> Option<AcceleratedBackend> {
        match AcceleratedBackend::new(WIDTH, HEIGHT) {
            Ok(backend) => Some(backend),
            Err(error) => {
                eprintln!("skipping accelerated test: {error}");
                None
            }
        }
    }

    #[test]
    fn accelerated_commit_paints_an_opaque_stroke() {
        let Some(mut backend) = acquire_backend() else {
            return;
        };
        let mut frame = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
        backend
            .execute(&DrawCommand::AddLayer {
                layer_id: LayerId::new("L1"),
                index: 0,
            })
            .expect("add layer");
        backend
            .execute(&DrawCommand::DrawPath {
                layer_id: LayerId::new("L1"),
                points: vec![
                    PathPoint::new(4.0, 16.0, 1.0),
                    PathPoint::new(28.0, 16.0, 1.0),
                ],
                color: Color::new(1.0, 0.0, 0.0, 1.0),
                width: 4.0,
                shape: BrushShape::Round,
            })
            .expect("draw path");
        let shipped = backend.commit_frame(&mut frame).expect("commit");
        assert!(!shipped.is_empty());

        let offset = ((16 * WIDTH + 16) * 4) as usize;
        assert_eq!(frame[offset], 255, "stroke center is red");
        assert_eq!(frame[offset + 3], 255);
    }

    #[test]
    fn accelerated_and_software_agree_on_an_opaque_composite() {
        let Some(mut accelerated) = acquire_backend() else {
            return;
        };
        let mut software = crate::SoftwareBackend::new(WIDTH, HEIGHT);

        let commands = [
            DrawCommand::AddLayer {
                layer_id: LayerId::new("L1"),
                index: 0,
            },
            DrawCommand::UpdateRasterArea {
                layer_id: LayerId::new("L1"),
                rect: Rect::new(8, 8, 4, 4),
                pixels: vec![255; 4 * 4 * 4],
            },
        ];

        let mut accelerated_frame = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
        let mut software_frame = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
        for command in &commands {
            accelerated.execute(command).expect("accelerated execute");
            software.execute(command).expect("software execute");
        }
        accelerated
            .commit_frame(&mut accelerated_frame)
            .expect("accelerated commit");
        software
            .commit_frame(&mut software_frame)
            .expect("software commit");

        // Opaque content avoids rounding differences between the CPU and
        // GPU blend paths.
        assert_eq!(accelerated_frame, software_frame);
    }

    #[test]
    fn disposed_accelerated_backend_rejects_commits() {
        let Some(mut backend) = acquire_backend() else {
            return;
        };
        backend.dispose();
        let mut frame = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
        assert!(matches!(
            backend.commit_frame(&mut frame),
            Err(RenderError::Disposed)
        ));
    }
}
