//! The automaton: grid ownership, rule sequencing and batched flushes.
//!
//! Rules and iteration counts are queued as [`RuleBlock`]s and only run when
//! [`CellularAutomaton::finalize`] is called, so a chain of rules costs one
//! upload and one download regardless of its length.

use std::sync::Arc;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::backend::{ExecutionBackend, RuleBlock};
use super::gpu::{GpuBackend, GpuContext, GpuError};
use super::grid::{Grid, Shape, ShapeError};
use super::kernel::CompileError;
use super::neighbourhood::{NeighbourhoodGenerator, StandardNeighbourhoods};
use crate::schema::{BoundaryPolicy, Distribution, RuleDescriptor, RuleParser, RuleStringParser};

/// Errors surfaced by [`CellularAutomaton`].
#[derive(Debug, thiserror::Error)]
pub enum AutomatonError {
    #[error("Invalid rule string '{0}'")]
    InvalidRuleString(String),

    #[error("No rule has been set")]
    NoRule,

    #[error("Unsupported dimensionality {0} (expected 2 or 3)")]
    UnsupportedDimension(usize),

    #[error("Invalid grid shape: {0}")]
    InvalidShape(ShapeError),

    #[error("Kernel compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Backend error: {0}")]
    Backend(#[from] GpuError),
}

impl From<ShapeError> for AutomatonError {
    fn from(error: ShapeError) -> Self {
        match error {
            ShapeError::UnsupportedDimension(n) => AutomatonError::UnsupportedDimension(n),
            other => AutomatonError::InvalidShape(other),
        }
    }
}

/// The current rule: parsed only, or compiled and accumulating iterations.
#[derive(Debug)]
enum RuleSlot {
    Uncompiled(Arc<RuleDescriptor>),
    Compiled(RuleBlock),
}

/// A grid plus the rules queued against it.
///
/// Mutating calls return `&mut Self` so they chain with `?`:
///
/// ```no_run
/// # use automata_gpu::compute::CellularAutomaton;
/// # fn main() -> Result<(), automata_gpu::compute::AutomatonError> {
/// let mut automaton = CellularAutomaton::new(&[64, 64], 0)?;
/// automaton
///     .fill_with_distribution(&[(Some(0), 80.0), (Some(1), 20.0)])
///     .set_rule("23/3")?
///     .iterate(10)?
///     .finalize()?;
/// # Ok(())
/// # }
/// ```
pub struct CellularAutomaton<B: ExecutionBackend = GpuBackend> {
    grid: Grid,
    backend: B,
    boundary: BoundaryPolicy,
    current: Option<RuleSlot>,
    pending: Vec<RuleBlock>,
    parser: Box<dyn RuleParser>,
    neighbourhoods: Box<dyn NeighbourhoodGenerator>,
    rng: StdRng,
}

impl CellularAutomaton<GpuBackend> {
    /// Create an automaton on a headless GPU device.
    pub fn new(shape: &[usize], default_value: u8) -> Result<Self, AutomatonError> {
        let context = GpuContext::headless_blocking()?;
        Self::with_backend(GpuBackend::new(context), shape, default_value)
    }
}

impl<B: ExecutionBackend> CellularAutomaton<B> {
    /// Create an automaton stepping on `backend`.
    pub fn with_backend(mut backend: B, shape: &[usize], default_value: u8) -> Result<Self, AutomatonError> {
        let shape = Shape::new(shape)?;
        backend.configure(shape)?;
        debug!("Created {:?} automaton on the {} backend", shape, backend.name());

        Ok(Self {
            grid: Grid::new(shape, default_value),
            backend,
            boundary: BoundaryPolicy::default(),
            current: None,
            pending: Vec::new(),
            parser: Box::new(RuleStringParser),
            neighbourhoods: Box::new(StandardNeighbourhoods),
            rng: StdRng::from_entropy(),
        })
    }

    /// Replace the rule-string parser.
    pub fn with_parser(mut self, parser: impl RuleParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Replace the neighbourhood generator.
    pub fn with_neighbourhoods(mut self, generator: impl NeighbourhoodGenerator + 'static) -> Self {
        self.neighbourhoods = Box::new(generator);
        self
    }

    /// Seed the generator used for fills and stochastic kernels.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Direct access to the cells. Writes are picked up by the next flush.
    pub fn grid_mut(&mut self) -> &mut Grid {
        &mut self.grid
    }

    pub fn shape(&self) -> Shape {
        self.grid.shape()
    }

    pub fn boundary(&self) -> BoundaryPolicy {
        self.boundary
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Blocks waiting for the next flush.
    pub fn pending_blocks(&self) -> &[RuleBlock] {
        &self.pending
    }

    /// Iterations recorded on the current rule since it was last flushed.
    pub fn current_iterations(&self) -> u64 {
        match &self.current {
            Some(RuleSlot::Compiled(block)) => block.iterations(),
            _ => 0,
        }
    }

    /// Fill the grid with weighted random values.
    pub fn fill_with_distribution(&mut self, entries: &[(Option<u8>, f64)]) -> &mut Self {
        let distribution = Distribution::from(entries);
        distribution.fill(self.grid.as_mut_slice(), &mut self.rng);
        self
    }

    /// Fill the grid with weighted random values drawn from `rng`.
    pub fn fill_with_distribution_using<R: Rng + ?Sized>(
        &mut self,
        entries: &[(Option<u8>, f64)],
        rng: &mut R,
    ) -> &mut Self {
        Distribution::from(entries).fill(self.grid.as_mut_slice(), rng);
        self
    }

    /// Change how out-of-range neighbours are read.
    ///
    /// A rule that has already been iterated keeps its policy; the remaining
    /// iterations use a fresh block compiled with the new one.
    pub fn set_out_of_bound_policy(&mut self, policy: BoundaryPolicy) -> &mut Self {
        self.boundary = policy;
        if let Some(RuleSlot::Compiled(block)) = self.current.take() {
            let descriptor = block.shared_descriptor();
            self.queue(block);
            self.current = Some(RuleSlot::Uncompiled(descriptor));
        }
        self
    }

    /// Parse `rule` and make it the current rule.
    pub fn set_rule(&mut self, rule: &str) -> Result<&mut Self, AutomatonError> {
        let descriptor = self
            .parser
            .parse(rule)
            .ok_or_else(|| AutomatonError::InvalidRuleString(rule.to_string()))?;
        self.set_descriptor(descriptor);
        Ok(self)
    }

    /// Make an already-parsed descriptor the current rule.
    pub fn set_descriptor(&mut self, descriptor: RuleDescriptor) -> &mut Self {
        if let Some(RuleSlot::Compiled(block)) = self.current.take() {
            self.queue(block);
        }
        self.current = Some(RuleSlot::Uncompiled(Arc::new(descriptor)));
        self
    }

    /// Record `count` more iterations of the current rule.
    pub fn iterate(&mut self, count: u64) -> Result<&mut Self, AutomatonError> {
        let slot = self.current.take().ok_or(AutomatonError::NoRule)?;
        let mut block = match slot {
            RuleSlot::Compiled(block) => block,
            RuleSlot::Uncompiled(descriptor) => match self.compile(Arc::clone(&descriptor)) {
                Ok(block) => block,
                Err(error) => {
                    self.current = Some(RuleSlot::Uncompiled(descriptor));
                    return Err(error);
                }
            },
        };
        block.add_iterations(count);
        self.current = Some(RuleSlot::Compiled(block));
        Ok(self)
    }

    /// One iteration of the current rule.
    pub fn step(&mut self) -> Result<&mut Self, AutomatonError> {
        self.iterate(1)
    }

    /// `set_rule(rule)` followed by `iterate(count)`.
    pub fn apply(&mut self, rule: &str, count: u64) -> Result<&mut Self, AutomatonError> {
        self.set_rule(rule)?.iterate(count)
    }

    /// Run every queued iteration and bring the result back into the grid.
    pub fn finalize(&mut self) -> Result<&mut Self, AutomatonError> {
        let current_iterations = self.current_iterations();
        if self.pending.is_empty() && current_iterations == 0 {
            return Ok(self);
        }

        self.backend.upload(&self.grid)?;
        for block in &self.pending {
            trace!("Flushing '{}' x{}", block.descriptor().rule_string, block.iterations());
            self.backend.execute(block)?;
        }
        if let Some(RuleSlot::Compiled(block)) = &self.current
            && block.iterations() > 0
        {
            trace!("Flushing '{}' x{}", block.descriptor().rule_string, block.iterations());
            self.backend.execute(block)?;
        }
        self.backend.download(&mut self.grid)?;

        // The grid only reflects the work once it is read back; until then a
        // failed flush can be retried from the unchanged grid.
        if let Some(RuleSlot::Compiled(block)) = &mut self.current {
            block.reset_iterations();
        }

        debug!(
            "Flushed {} queued blocks and {} current iterations",
            self.pending.len(),
            current_iterations
        );
        self.pending.clear();
        Ok(self)
    }

    /// Release the backend. Unflushed iterations are discarded.
    pub fn destroy(mut self) -> Result<(), AutomatonError> {
        self.backend.release()?;
        Ok(())
    }

    fn queue(&mut self, block: RuleBlock) {
        if block.iterations() > 0 {
            self.pending.push(block);
        }
    }

    fn compile(&mut self, descriptor: Arc<RuleDescriptor>) -> Result<RuleBlock, AutomatonError> {
        let shape = self.grid.shape();
        let offsets = self.neighbourhoods.offsets(
            descriptor.neighbourhood.kind,
            descriptor.neighbourhood.range,
            shape.dimension(),
        );
        let seed: f32 = self.rng.r#gen();
        Ok(RuleBlock::compile(descriptor, offsets, shape, self.boundary, seed)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{CpuBackend, TextureShape};
    use crate::schema::NeighbourhoodType;

    fn cpu(shape: &[usize]) -> CellularAutomaton<CpuBackend> {
        CellularAutomaton::with_backend(CpuBackend::new(), shape, 0)
            .unwrap()
            .with_seed(7)
    }

    /// Wraps the CPU backend and counts the calls the automaton makes.
    #[derive(Default)]
    struct Counting {
        inner: CpuBackend,
        uploads: usize,
        executes: usize,
        downloads: usize,
        /// Number of upcoming downloads that fail.
        failing_downloads: usize,
    }

    impl ExecutionBackend for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn configure(&mut self, shape: Shape) -> Result<(), GpuError> {
            self.inner.configure(shape)
        }
        fn texture_shape(&self) -> Option<TextureShape> {
            self.inner.texture_shape()
        }
        fn upload(&mut self, grid: &Grid) -> Result<(), GpuError> {
            self.uploads += 1;
            self.inner.upload(grid)
        }
        fn execute(&mut self, block: &RuleBlock) -> Result<(), GpuError> {
            self.executes += 1;
            self.inner.execute(block)
        }
        fn download(&mut self, grid: &mut Grid) -> Result<(), GpuError> {
            self.downloads += 1;
            if self.failing_downloads > 0 {
                self.failing_downloads -= 1;
                return Err(GpuError::ReadbackInterrupted);
            }
            self.inner.download(grid)
        }
        fn release(&mut self) -> Result<(), GpuError> {
            self.inner.release()
        }
    }

    #[test]
    fn test_seed_example_2d() {
        let mut automaton = cpu(&[3, 3]);
        automaton.grid_mut().set(&[1, 1], 1);
        automaton.apply("S/B12V", 1).unwrap().finalize().unwrap();
        assert_eq!(automaton.grid().as_slice(), &[0, 1, 0, 1, 0, 1, 0, 1, 0]);

        automaton.iterate(1).unwrap().finalize().unwrap();
        assert_eq!(automaton.grid().as_slice(), &[1, 0, 1, 0, 0, 0, 1, 0, 1]);
    }

    #[test]
    fn test_seed_example_toroidal() {
        let mut automaton = cpu(&[3, 3]);
        automaton.grid_mut().set(&[1, 1], 1);
        automaton.set_out_of_bound_policy(BoundaryPolicy::Wrap);
        automaton.apply("S/B12V", 1).unwrap().finalize().unwrap();
        assert_eq!(automaton.grid().as_slice(), &[0, 1, 0, 1, 0, 1, 0, 1, 0]);

        automaton.iterate(1).unwrap().finalize().unwrap();
        assert_eq!(automaton.grid().as_slice(), &[1, 0, 1, 0, 0, 0, 1, 0, 1]);
    }

    #[test]
    fn test_failed_readback_keeps_work_for_retry() {
        let mut automaton = CellularAutomaton::with_backend(Counting::default(), &[3, 3], 0).unwrap();
        automaton.grid_mut().set(&[1, 1], 1);
        automaton
            .apply("S/B12V", 1)
            .unwrap()
            .set_out_of_bound_policy(BoundaryPolicy::Fixed(0))
            .iterate(1)
            .unwrap();
        assert_eq!(automaton.pending_blocks().len(), 1);

        automaton.backend.failing_downloads = 1;
        assert!(matches!(
            automaton.finalize(),
            Err(AutomatonError::Backend(GpuError::ReadbackInterrupted))
        ));
        assert_eq!(automaton.pending_blocks().len(), 1);
        assert_eq!(automaton.current_iterations(), 1);
        assert_eq!(automaton.grid().population(), 1);

        automaton.finalize().unwrap();
        assert_eq!(automaton.grid().as_slice(), &[1, 0, 1, 0, 0, 0, 1, 0, 1]);
        assert!(automaton.pending_blocks().is_empty());
        assert_eq!(automaton.current_iterations(), 0);
    }

    #[test]
    fn test_oversized_rule_parameters_fail_to_compile() {
        let mut automaton = cpu(&[4, 4]);
        automaton.grid_mut().set(&[1, 1], 1);
        for rule in ["NLUKY 2000000000 3 3 2 3", "23/3/4000000000", "R1/T3/C1000/NM"] {
            assert!(
                matches!(
                    automaton.apply(rule, 1),
                    Err(AutomatonError::Compile(CompileError::InvalidParameter(_)))
                ),
                "'{rule}' should not compile"
            );
        }
        // Nothing was queued, so flushing leaves the grid alone.
        automaton.finalize().unwrap();
        assert_eq!(automaton.grid().population(), 1);
    }

    #[test]
    fn test_stochastic_certainties_2d_and_3d() {
        for shape in [&[3usize, 3][..], &[2, 2, 2][..]] {
            let mut automaton = cpu(shape);
            automaton.apply("E / 0..24:1.0", 1).unwrap().finalize().unwrap();
            assert!(automaton.grid().as_slice().iter().all(|&c| c == 1));
            automaton.apply("E 0:0.0 /", 1).unwrap().finalize().unwrap();
            assert!(automaton.grid().as_slice().iter().all(|&c| c == 0));
        }
    }

    #[test]
    fn test_zero_weight_fill() {
        let mut automaton = cpu(&[4, 4]);
        automaton.fill_with_distribution(&[(Some(0), 0.0), (Some(1), 100.0)]);
        assert!(automaton.grid().as_slice().iter().all(|&c| c == 1));
    }

    #[test]
    fn test_apply_matches_set_rule_then_iterate() {
        let mut a = cpu(&[8, 8]);
        let mut b = cpu(&[8, 8]);
        a.fill_with_distribution(&[(Some(0), 1.0), (Some(1), 1.0)]);
        b.grid_mut().as_mut_slice().copy_from_slice(a.grid().as_slice());

        a.apply("23/3", 3).unwrap().finalize().unwrap();
        b.set_rule("23/3").unwrap().iterate(3).unwrap().finalize().unwrap();
        assert_eq!(a.grid(), b.grid());
    }

    #[test]
    fn test_one_upload_and_download_per_flush() {
        let mut automaton = CellularAutomaton::with_backend(Counting::default(), &[6, 6], 0).unwrap();
        automaton
            .apply("23/3", 2)
            .unwrap()
            .apply("S/B12V", 1)
            .unwrap()
            .set_out_of_bound_policy(BoundaryPolicy::Wrap)
            .iterate(4)
            .unwrap();
        assert_eq!(automaton.pending_blocks().len(), 2);

        automaton.finalize().unwrap();
        assert_eq!(automaton.backend().uploads, 1);
        assert_eq!(automaton.backend().executes, 3);
        assert_eq!(automaton.backend().downloads, 1);
        assert!(automaton.pending_blocks().is_empty());
        assert_eq!(automaton.current_iterations(), 0);

        // Nothing queued: no GPU traffic.
        automaton.finalize().unwrap();
        assert_eq!(automaton.backend().uploads, 1);
    }

    #[test]
    fn test_rule_without_iterations_is_not_queued() {
        let mut automaton = cpu(&[4, 4]);
        automaton.set_rule("23/3").unwrap().set_rule("S/B12V").unwrap();
        assert!(automaton.pending_blocks().is_empty());

        automaton.iterate(0).unwrap().set_rule("23/3").unwrap();
        assert!(automaton.pending_blocks().is_empty());
    }

    #[test]
    fn test_policy_change_splits_blocks() {
        let mut automaton = cpu(&[4, 4]);
        automaton.set_rule("S/B12V").unwrap().iterate(2).unwrap();
        automaton.set_out_of_bound_policy(BoundaryPolicy::Wrap);
        automaton.iterate(1).unwrap();

        let pending = automaton.pending_blocks();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].iterations(), 2);
        assert_eq!(pending[0].boundary(), BoundaryPolicy::Fixed(0));
        assert_eq!(automaton.current_iterations(), 1);
    }

    #[test]
    fn test_policy_change_before_iterating_is_picked_up() {
        let mut automaton = cpu(&[4, 4]);
        automaton.grid_mut().set(&[0, 0], 1);
        automaton
            .set_rule("S/B12V")
            .unwrap()
            .set_out_of_bound_policy(BoundaryPolicy::Wrap)
            .iterate(1)
            .unwrap()
            .finalize()
            .unwrap();
        assert!(automaton.pending_blocks().is_empty());
        assert_eq!(automaton.grid().population(), 4);
    }

    #[test]
    fn test_iterate_without_rule_fails() {
        let mut automaton = cpu(&[4, 4]);
        assert!(matches!(automaton.iterate(1), Err(AutomatonError::NoRule)));
    }

    #[test]
    fn test_invalid_rule_string() {
        let mut automaton = cpu(&[4, 4]);
        match automaton.set_rule("nonsense") {
            Err(AutomatonError::InvalidRuleString(rule)) => assert_eq!(rule, "nonsense"),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("rule should not parse"),
        }
    }

    #[test]
    fn test_compile_failure_keeps_rule_uncompiled() {
        let mut automaton = cpu(&[4, 4]);
        automaton.set_rule("23/3/1").unwrap();
        assert!(matches!(
            automaton.iterate(1),
            Err(AutomatonError::Compile(CompileError::InvalidParameter(_)))
        ));
        assert!(matches!(
            automaton.iterate(1),
            Err(AutomatonError::Compile(_))
        ));
    }

    #[test]
    fn test_bad_shapes() {
        assert!(matches!(
            CellularAutomaton::with_backend(CpuBackend::new(), &[4], 0),
            Err(AutomatonError::UnsupportedDimension(1))
        ));
        assert!(matches!(
            CellularAutomaton::with_backend(CpuBackend::new(), &[4, 0], 0),
            Err(AutomatonError::InvalidShape(ShapeError::EmptyExtent))
        ));
    }

    #[test]
    fn test_custom_neighbourhood_generator() {
        struct Left;
        impl NeighbourhoodGenerator for Left {
            fn offsets(&self, _: NeighbourhoodType, _: u32, dimension: usize) -> Vec<Vec<i32>> {
                let mut offset = vec![0; dimension];
                offset[0] = -1;
                vec![offset]
            }
        }

        let mut automaton = cpu(&[4, 1]).with_neighbourhoods(Left);
        automaton.grid_mut().set(&[0, 0], 1);
        // Birth on one live left neighbour, no survival: the cell shifts right.
        automaton.apply("/1", 2).unwrap().finalize().unwrap();
        assert_eq!(automaton.grid().as_slice(), &[0, 0, 1, 0]);
    }

    #[test]
    fn test_destroy_releases_backend() {
        let automaton = cpu(&[2, 2]);
        automaton.destroy().unwrap();
    }

    #[test]
    fn test_gpu_seed_example() {
        let mut automaton = match CellularAutomaton::new(&[3, 3], 0) {
            Ok(a) => a,
            Err(AutomatonError::Backend(GpuError::NoAdapter)) => {
                eprintln!("Skipping GPU test: no adapter available");
                return;
            }
            Err(e) => panic!("Failed to create GPU automaton: {:?}", e),
        };
        automaton.grid_mut().set(&[1, 1], 1);
        automaton.apply("S/B12V", 2).unwrap().finalize().unwrap();
        assert_eq!(automaton.grid().as_slice(), &[1, 0, 1, 0, 0, 0, 1, 0, 1]);

        automaton.grid_mut().fill(0);
        automaton.grid_mut().set(&[1, 1], 1);
        automaton.set_out_of_bound_policy(BoundaryPolicy::Wrap);
        automaton.iterate(1).unwrap().finalize().unwrap();
        assert_eq!(automaton.grid().as_slice(), &[0, 1, 0, 1, 0, 1, 0, 1, 0]);
        automaton.iterate(1).unwrap().finalize().unwrap();
        assert_eq!(automaton.grid().as_slice(), &[1, 0, 1, 0, 0, 0, 1, 0, 1]);
        automaton.destroy().unwrap();
    }
}
