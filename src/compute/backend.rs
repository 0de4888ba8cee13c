//! Execution backends and the compiled rule blocks they run.

use std::sync::Arc;

use super::gpu::GpuError;
use super::grid::{Grid, Shape, TextureShape};
use super::kernel::{CompileError, KernelSource, compile_kernel};
use super::neighbourhood::{Offset, normalize_offsets};
use crate::schema::{BoundaryPolicy, RuleDescriptor};

/// A rule compiled for one grid shape and boundary policy, plus the number of
/// iterations to run with it.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleBlock {
    descriptor: Arc<RuleDescriptor>,
    boundary: BoundaryPolicy,
    offsets: Vec<Offset>,
    seed: f32,
    kernel: KernelSource,
    iterations: u64,
}

impl RuleBlock {
    /// Compile `descriptor` into a block with no iterations yet.
    pub fn compile(
        descriptor: Arc<RuleDescriptor>,
        offsets: Vec<Offset>,
        shape: Shape,
        boundary: BoundaryPolicy,
        seed: f32,
    ) -> Result<Self, CompileError> {
        let kernel = compile_kernel(&descriptor, &offsets, shape, boundary, seed)?;
        Ok(Self {
            descriptor,
            boundary,
            offsets: normalize_offsets(offsets),
            seed,
            kernel,
            iterations: 0,
        })
    }

    pub fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    pub(crate) fn shared_descriptor(&self) -> Arc<RuleDescriptor> {
        Arc::clone(&self.descriptor)
    }

    pub fn boundary(&self) -> BoundaryPolicy {
        self.boundary
    }

    /// Sorted, deduplicated neighbour offsets the kernel was built with.
    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }

    pub fn seed(&self) -> f32 {
        self.seed
    }

    pub fn kernel(&self) -> &KernelSource {
        &self.kernel
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub(crate) fn add_iterations(&mut self, count: u64) {
        self.iterations += count;
    }

    pub(crate) fn reset_iterations(&mut self) {
        self.iterations = 0;
    }
}

/// Something that can hold a grid and step it with compiled rule blocks.
///
/// The automaton drives a backend with one `upload`, any number of
/// `execute` calls and one `download` per flush.
pub trait ExecutionBackend {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Allocate storage for a grid of `shape`, dropping any previous storage.
    fn configure(&mut self, shape: Shape) -> Result<(), GpuError>;

    /// Texture layout of the configured grid.
    fn texture_shape(&self) -> Option<TextureShape>;

    fn upload(&mut self, grid: &Grid) -> Result<(), GpuError>;

    /// Run `block.iterations()` steps of the block's rule.
    fn execute(&mut self, block: &RuleBlock) -> Result<(), GpuError>;

    fn download(&mut self, grid: &mut Grid) -> Result<(), GpuError>;

    /// Drop every resource. Later calls fail with [`GpuError::BackendReleased`].
    fn release(&mut self) -> Result<(), GpuError>;
}
