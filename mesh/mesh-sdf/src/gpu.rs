//! Accelerated nearest-triangle search with WGPU compute shaders.
//!
//! The device only answers "which triangle is nearest", in single precision.
//! The engine recomputes distance, closest point and sign for that triangle
//! on the host in double precision, so accelerated results match the CPU
//! policies within floating-point tolerance.
//!
//! # Memory Layout
//!
//! - [`GpuBvhNode`]: 48 bytes (2 x vec4 + 4 x u32)
//! - [`GpuTriangle`]: 48 bytes (3 x vec4)
//! - queries: 16 bytes each (xyz + finite flag)

use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use mesh_types::{Aabb, Point3, Triangle};
use tracing::{debug, info};
use wgpu::util::DeviceExt;
use wgpu::{BindGroupLayout, Buffer, BufferUsages, ComputePipeline, Device, Queue};

use crate::bvh::{Bvh, BvhNode};
use crate::error::{SdfError, SdfResult};

const NEAREST_SHADER: &str = include_str!("shaders/nearest.wgsl");

/// Must match `@workgroup_size` in the shader.
const WORKGROUP_SIZE: u32 = 64;

/// Queries per dispatch, bounded by the 65535 workgroup limit.
const MAX_QUERIES_PER_DISPATCH: usize = 65_535 * WORKGROUP_SIZE as usize;

const NONE: u32 = u32::MAX;

/// GPU-friendly BVH node.
///
/// Total size: 48 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct GpuBvhNode {
    min: [f32; 4],
    max: [f32; 4],
    /// Internal: left child. Leaf: first index slot.
    a: u32,
    /// Internal: right child. Leaf: slot count.
    b: u32,
    leaf: u32,
    _padding: u32,
}

impl GpuBvhNode {
    fn from_node(node: &BvhNode) -> Self {
        let (min, max) = widened(node.bbox());
        let (a, b, leaf) = match *node {
            BvhNode::Internal { left, right, .. } => (left, right, 0),
            BvhNode::Leaf { start, count, .. } => (start, count, 1),
        };
        Self {
            min,
            max,
            a,
            b,
            leaf,
            _padding: 0,
        }
    }
}

/// GPU-friendly triangle; the fourth component of each vertex is unused.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct GpuTriangle {
    v0: [f32; 4],
    v1: [f32; 4],
    v2: [f32; 4],
}

impl GpuTriangle {
    #[allow(clippy::cast_possible_truncation)]
    fn from_triangle(tri: &Triangle) -> Self {
        let v = |p: &Point3<f64>| [p.x as f32, p.y as f32, p.z as f32, 0.0];
        Self {
            v0: v(&tri.v0),
            v1: v(&tri.v1),
            v2: v(&tri.v2),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct GpuParams {
    query_count: u32,
    node_count: u32,
    root: u32,
    _padding: u32,
}

/// Largest `f32` not above `x`.
#[allow(clippy::cast_possible_truncation)]
fn round_down(x: f64) -> f32 {
    let y = x as f32;
    if f64::from(y) > x {
        y - y.abs() * f32::EPSILON - f32::MIN_POSITIVE
    } else {
        y
    }
}

/// Smallest `f32` not below `x`.
fn round_up(x: f64) -> f32 {
    -round_down(-x)
}

/// Box corners rounded outward so single-precision pruning stays conservative.
fn widened(bbox: &Aabb) -> ([f32; 4], [f32; 4]) {
    (
        [round_down(bbox.min.x), round_down(bbox.min.y), round_down(bbox.min.z), 0.0],
        [round_up(bbox.max.x), round_up(bbox.max.y), round_up(bbox.max.z), 0.0],
    )
}

/// Empty storage buffers cannot be bound, so pad with one zeroed element.
fn non_empty<T: Zeroable>(mut v: Vec<T>) -> Vec<T> {
    if v.is_empty() {
        v.push(T::zeroed());
    }
    v
}

/// Upper bound of the device bytes [`Accelerator::prepare`] uploads for
/// `triangles` primitives.
pub(crate) const fn max_scene_bytes(triangles: usize) -> usize {
    let n = if triangles == 0 { 1 } else { triangles };
    (2 * n - 1) * std::mem::size_of::<GpuBvhNode>()
        + n * std::mem::size_of::<GpuTriangle>()
        + n * std::mem::size_of::<u32>()
}

/// Device-resident copy of one BVH and its triangles.
#[derive(Debug)]
pub(crate) struct GpuScene {
    nodes: Buffer,
    triangles: Buffer,
    indices: Buffer,
    node_count: u32,
    root: u32,
    bytes: usize,
}

impl GpuScene {
    /// Device bytes held by the scene buffers.
    pub(crate) const fn memory_bytes(&self) -> usize {
        self.bytes
    }
}

/// Adapter details, for logging and diagnostics.
#[derive(Debug, Clone)]
pub(crate) struct GpuAdapterInfo {
    pub(crate) name: String,
    pub(crate) backend: String,
}

impl From<wgpu::AdapterInfo> for GpuAdapterInfo {
    fn from(info: wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name,
            backend: format!("{:?}", info.backend),
        }
    }
}

/// Device, queue and compiled pipeline owned by one engine.
pub(crate) struct Accelerator {
    device: Device,
    queue: Queue,
    adapter_info: GpuAdapterInfo,
    limits: wgpu::Limits,
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
}

impl std::fmt::Debug for Accelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accelerator")
            .field("adapter_info", &self.adapter_info)
            .field("max_buffer_size", &self.limits.max_buffer_size)
            .finish_non_exhaustive()
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
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

impl Accelerator {
    /// Acquire an adapter and compile the nearest-triangle pipeline.
    ///
    /// # Errors
    ///
    /// [`SdfError::AcceleratorUnavailable`] if no adapter is found,
    /// [`SdfError::Gpu`] if the device request fails.
    pub(crate) fn new() -> SdfResult<Self> {
        pollster::block_on(Self::try_init())
    }

    async fn try_init() -> SdfResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| SdfError::AcceleratorUnavailable("no compatible GPU adapter".into()))?;

        let adapter_info = GpuAdapterInfo::from(adapter.get_info());
        debug!(
            name = %adapter_info.name,
            backend = %adapter_info.backend,
            "GPU adapter found"
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("mesh-sdf"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| SdfError::Gpu {
                details: format!("device request failed: {e}"),
            })?;
        let limits = device.limits();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sdf_nearest"),
            source: wgpu::ShaderSource::Wgsl(NEAREST_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sdf_nearest_bind_group_layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(5, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sdf_nearest_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("sdf_nearest_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("nearest_triangle"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        info!(
            adapter = %adapter_info.name,
            backend = %adapter_info.backend,
            "GPU context initialized"
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            limits,
            pipeline,
            bind_group_layout,
        })
    }

    /// Name of the adapter in use.
    pub(crate) fn adapter_name(&self) -> &str {
        &self.adapter_info.name
    }

    /// Upload a BVH and its triangles.
    ///
    /// # Errors
    ///
    /// [`SdfError::Gpu`] if an array exceeds the device's storage binding size.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn prepare(&self, bvh: &Bvh, triangles: &[Triangle]) -> SdfResult<GpuScene> {
        let nodes: Vec<GpuBvhNode> = bvh.nodes().iter().map(GpuBvhNode::from_node).collect();
        let tris: Vec<GpuTriangle> = triangles.iter().map(GpuTriangle::from_triangle).collect();
        let node_count = nodes.len() as u32;

        let max_binding = self.limits.max_storage_buffer_binding_size as usize;
        let largest = std::mem::size_of_val(nodes.as_slice())
            .max(std::mem::size_of_val(tris.as_slice()));
        if largest > max_binding {
            return Err(SdfError::Gpu {
                details: format!(
                    "scene array of {largest} bytes exceeds storage binding limit of {max_binding}"
                ),
            });
        }

        let nodes = non_empty(nodes);
        let tris = non_empty(tris);
        let indices = non_empty(bvh.indices().to_vec());
        let bytes = std::mem::size_of_val(nodes.as_slice())
            + std::mem::size_of_val(tris.as_slice())
            + std::mem::size_of_val(indices.as_slice());

        let upload = |label: &str, contents: &[u8]| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: BufferUsages::STORAGE,
                })
        };

        debug!(nodes = node_count, triangles = triangles.len(), bytes, "Uploaded BVH to GPU");

        Ok(GpuScene {
            nodes: upload("sdf_bvh_nodes", bytemuck::cast_slice(&nodes)),
            triangles: upload("sdf_triangles", bytemuck::cast_slice(&tris)),
            indices: upload("sdf_bvh_indices", bytemuck::cast_slice(&indices)),
            node_count,
            root: bvh.root(),
            bytes,
        })
    }

    /// Nearest triangle per query; `None` where the device could not answer.
    ///
    /// # Errors
    ///
    /// [`SdfError::Gpu`] if reading results back fails.
    pub(crate) fn nearest(
        &self,
        scene: &GpuScene,
        queries: &[Point3<f64>],
    ) -> SdfResult<Vec<Option<u32>>> {
        let start = Instant::now();
        let mut out = Vec::with_capacity(queries.len());
        for chunk in queries.chunks(MAX_QUERIES_PER_DISPATCH) {
            out.extend(self.dispatch(scene, chunk)?);
        }
        debug!(
            queries = queries.len(),
            time_ms = start.elapsed().as_secs_f64() * 1000.0,
            "GPU nearest-triangle pass complete"
        );
        Ok(out)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn dispatch(&self, scene: &GpuScene, queries: &[Point3<f64>]) -> SdfResult<Vec<Option<u32>>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let count = queries.len() as u32;

        let packed: Vec<[f32; 4]> = queries
            .iter()
            .map(|p| {
                if p.coords.iter().all(|c| c.is_finite()) {
                    [p.x as f32, p.y as f32, p.z as f32, 1.0]
                } else {
                    [0.0; 4]
                }
            })
            .collect();
        let params = GpuParams {
            query_count: count,
            node_count: scene.node_count,
            root: scene.root,
            _padding: 0,
        };

        let query_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("sdf_queries"),
                contents: bytemuck::cast_slice(&packed),
                usage: BufferUsages::STORAGE,
            });
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("sdf_nearest_params"),
                contents: bytemuck::bytes_of(&params),
                usage: BufferUsages::UNIFORM,
            });
        let output_size = u64::from(count) * std::mem::size_of::<u32>() as u64;
        let output = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sdf_nearest_output"),
            size: output_size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sdf_nearest_staging"),
            size: output_size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sdf_nearest_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: scene.nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: scene.triangles.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: scene.indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: query_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: output.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sdf_nearest_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("sdf_nearest_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(count.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        encoder.copy_buffer_to_buffer(&output, 0, &staging, 0, output_size);
        self.queue.submit([encoder.finish()]);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| SdfError::Gpu {
                details: "readback channel closed".into(),
            })?
            .map_err(|e| SdfError::Gpu {
                details: format!("buffer mapping failed: {e:?}"),
            })?;

        let data = slice.get_mapped_range();
        let ids: Vec<Option<u32>> = bytemuck::cast_slice::<u8, u32>(&data)
            .iter()
            .map(|&id| (id != NONE).then_some(id))
            .collect();
        drop(data);
        staging.unmap();

        Ok(ids)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use mesh_types::unit_cube;

    #[test]
    fn layouts() {
        assert_eq!(std::mem::size_of::<GpuBvhNode>(), 48);
        assert_eq!(std::mem::size_of::<GpuTriangle>(), 48);
        assert_eq!(std::mem::size_of::<GpuParams>(), 16);
    }

    #[test]
    fn rounding_is_outward() {
        let x = 0.1_f64;
        assert!(f64::from(round_down(x)) <= x);
        assert!(f64::from(round_up(x)) >= x);
        assert_eq!(round_down(1.0), 1.0);
        assert_eq!(round_up(-2.0), -2.0);
    }

    #[test]
    fn nodes_convert() {
        let triangles: Vec<Triangle> = unit_cube().triangles().collect();
        let bvh = Bvh::build(&triangles, 4);
        let gpu: Vec<GpuBvhNode> = bvh.nodes().iter().map(GpuBvhNode::from_node).collect();
        assert_eq!(gpu.len(), bvh.nodes().len());
        for (g, n) in gpu.iter().zip(bvh.nodes()) {
            assert_eq!(g.leaf == 1, n.is_leaf());
            assert!(f64::from(g.min[0]) <= n.bbox().min.x);
            assert!(f64::from(g.max[2]) >= n.bbox().max.z);
        }
    }

    #[test]
    fn non_empty_pads() {
        assert_eq!(non_empty(Vec::<u32>::new()), vec![0]);
        assert_eq!(non_empty(vec![3u32, 4]), vec![3, 4]);
    }
}
