//! CPU reference backend.
//!
//! Evaluates the same transitions as the generated kernels, cell by cell, with
//! rayon. Used where no adapter is available and to cross-check the GPU.

use log::{info, trace};
use rayon::prelude::*;

use super::backend::{ExecutionBackend, RuleBlock};
use super::codegen::{ProbabilityCheck, ValueSet};
use super::gpu::GpuError;
use super::grid::{Grid, Shape, TextureShape};
use super::neighbourhood::Offset;
use crate::schema::{BoundaryPolicy, RuleKind};

/// Double-buffered grid state.
struct CpuState {
    shape: Shape,
    texture: TextureShape,
    front: Vec<u8>,
    back: Vec<u8>,
    frame: u64,
}

/// Execution backend stepping the grid on the CPU.
#[derive(Default)]
pub struct CpuBackend {
    state: Option<CpuState>,
    released: bool,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_mut(&mut self) -> Result<&mut CpuState, GpuError> {
        if self.released {
            return Err(GpuError::BackendReleased);
        }
        self.state.as_mut().ok_or(GpuError::NotConfigured)
    }
}

/// Transition parameters with value sets already compacted.
enum Transition {
    Life {
        birth: ValueSet,
        survival: ValueSet,
    },
    Stochastic {
        birth: ProbabilityCheck,
        survival: ProbabilityCheck,
    },
    Generations {
        state_count: i32,
        birth: ValueSet,
        survival: ValueSet,
    },
    Vote {
        votes: ValueSet,
    },
    Nluky {
        cycle: i32,
        birth: ValueSet,
        survival: ValueSet,
    },
    Cyclic {
        state_count: i32,
        threshold: i32,
        greenberg_hastings: bool,
    },
    Debug,
}

/// Compiled blocks only carry parameters that fit in an `i32`; anything
/// larger saturates instead of wrapping.
fn literal(value: impl TryInto<i32>) -> i32 {
    value.try_into().unwrap_or(i32::MAX)
}

impl Transition {
    fn new(kind: &RuleKind) -> Self {
        match kind {
            RuleKind::Life { survival, birth } | RuleKind::ExtendedLife { survival, birth } => {
                Transition::Life {
                    birth: ValueSet::compact(birth),
                    survival: ValueSet::compact(survival),
                }
            }
            RuleKind::ExtendedStochastic { survival, birth } => Transition::Stochastic {
                birth: ProbabilityCheck::compact(birth),
                survival: ProbabilityCheck::compact(survival),
            },
            RuleKind::Generations {
                state_count,
                survival,
                birth,
            }
            | RuleKind::ExtendedGenerations {
                state_count,
                survival,
                birth,
            } => Transition::Generations {
                state_count: literal(*state_count),
                birth: ValueSet::compact(birth),
                survival: ValueSet::compact(survival),
            },
            RuleKind::Vote { votes } => Transition::Vote {
                votes: ValueSet::compact(votes),
            },
            RuleKind::Luky {
                low_survival,
                high_survival,
                low_birth,
                high_birth,
            } => Transition::Life {
                birth: ValueSet::from_range(*low_birth, *high_birth),
                survival: ValueSet::from_range(*low_survival, *high_survival),
            },
            RuleKind::Nluky {
                state_count,
                low_survival,
                high_survival,
                low_birth,
                high_birth,
            } => Transition::Nluky {
                cycle: literal(2 + 2 * u64::from(*state_count)),
                birth: ValueSet::from_range(*low_birth, *high_birth),
                survival: ValueSet::from_range(*low_survival, *high_survival),
            },
            RuleKind::Cyclic {
                state_count,
                threshold,
                greenberg_hastings,
            } => Transition::Cyclic {
                state_count: literal(*state_count),
                threshold: literal(*threshold),
                greenberg_hastings: *greenberg_hastings,
            },
            RuleKind::Debug => Transition::Debug,
        }
    }

    fn next(&self, current: i32, cell: Cell<'_>) -> i32 {
        match self {
            Transition::Life { birth, survival } => {
                let sum = cell.sum();
                let alive = if current == 0 {
                    birth.contains(sum)
                } else {
                    survival.contains(sum)
                };
                i32::from(alive)
            }
            Transition::Stochastic { birth, survival } => {
                let sum = cell.sum();
                let p = if current == 0 {
                    birth.probability(sum)
                } else {
                    survival.probability(sum)
                };
                let alive = p >= 1.0 || (p > 0.0 && (cell.random() as f64) < p);
                i32::from(alive)
            }
            Transition::Generations {
                state_count,
                birth,
                survival,
            } => {
                let sum = cell.count(1);
                if current == 0 && birth.contains(sum) || current == 1 && survival.contains(sum) {
                    1
                } else if current > 0 {
                    (current + 1) % state_count
                } else {
                    0
                }
            }
            Transition::Vote { votes } => {
                let sum = cell.sum() + i32::from(current > 0);
                i32::from(votes.contains(sum))
            }
            Transition::Nluky {
                cycle,
                birth,
                survival,
            } => {
                let sum = cell.count(1);
                if current == 0 && birth.contains(sum) || current == 1 && survival.contains(sum) {
                    1
                } else if current == 1 {
                    2 % cycle
                } else if current >= 2 {
                    (current + 2) % cycle
                } else {
                    0
                }
            }
            Transition::Cyclic {
                state_count,
                threshold,
                greenberg_hastings,
            } => {
                let next = (current + 1) % state_count;
                if cell.count(next) >= *threshold || (*greenberg_hastings && current > 0) {
                    next
                } else {
                    current
                }
            }
            Transition::Debug => {
                let [x, y, z] = cell.position;
                ((x + 8 * y + 64 * z) % 256) as i32
            }
        }
    }
}

/// Read-only view of the previous generation.
struct Sampler<'a> {
    cells: &'a [u8],
    extents: [usize; 3],
    dimension: usize,
    boundary: BoundaryPolicy,
    offsets: &'a [Offset],
    seed: f32,
    frame: f32,
}

impl Sampler<'_> {
    fn get(&self, position: [usize; 3], offset: &[i32]) -> i32 {
        let mut resolved = [0usize; 3];
        for axis in 0..self.dimension {
            let extent = self.extents[axis] as i64;
            let p = position[axis] as i64 + offset[axis] as i64;
            let inside = match self.boundary {
                BoundaryPolicy::Fixed(value) if p < 0 || p >= extent => return value,
                BoundaryPolicy::Fixed(_) => p,
                BoundaryPolicy::Clamp => p.clamp(0, extent - 1),
                BoundaryPolicy::Wrap => p.rem_euclid(extent),
            };
            resolved[axis] = inside as usize;
        }
        let [x, y, _] = self.extents;
        self.cells[resolved[0] + resolved[1] * x + resolved[2] * x * y] as i32
    }
}

/// One cell being updated.
#[derive(Clone, Copy)]
struct Cell<'a> {
    sampler: &'a Sampler<'a>,
    position: [usize; 3],
    texel: [usize; 2],
}

impl Cell<'_> {
    fn sum(&self) -> i32 {
        self.values().filter(|&v| v > 0).count() as i32
    }

    fn count(&self, desired: i32) -> i32 {
        self.values().filter(|&v| v == desired).count() as i32
    }

    fn values(&self) -> impl Iterator<Item = i32> + '_ {
        self.sampler
            .offsets
            .iter()
            .map(|offset| self.sampler.get(self.position, offset))
    }

    fn random(&self) -> f32 {
        rand(self.texel, self.sampler.seed, self.sampler.frame)
    }
}

/// Host copy of the kernels' per-texel noise.
fn rand(texel: [usize; 2], seed: f32, frame: f32) -> f32 {
    let (a, b, c) = (12.9898f32, 78.233f32, 43758.5453f32);
    let dt = (texel[0] as f32 + seed) * a + texel[1] as f32 * b;
    let x = dt + frame / a;
    let sn = x - 3.14 * (x / 3.14).floor();
    let v = sn.sin() * c;
    v - v.floor()
}

impl ExecutionBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn configure(&mut self, shape: Shape) -> Result<(), GpuError> {
        if self.released {
            return Err(GpuError::BackendReleased);
        }
        self.state = Some(CpuState {
            shape,
            texture: shape.texture_shape(),
            front: vec![0; shape.len()],
            back: vec![0; shape.len()],
            frame: 0,
        });
        info!("Configured CPU backend for {:?}", shape);
        Ok(())
    }

    fn texture_shape(&self) -> Option<TextureShape> {
        self.state.as_ref().map(|s| s.texture)
    }

    fn upload(&mut self, grid: &Grid) -> Result<(), GpuError> {
        let state = self.state_mut()?;
        state.front.copy_from_slice(grid.as_slice());
        Ok(())
    }

    fn execute(&mut self, block: &RuleBlock) -> Result<(), GpuError> {
        let state = self.state_mut()?;
        let transition = Transition::new(&block.descriptor().kind);
        let shape = state.shape;
        let texture = state.texture;

        for _ in 0..block.iterations() {
            std::mem::swap(&mut state.front, &mut state.back);
            state.frame += 1;

            let sampler = Sampler {
                cells: &state.back,
                extents: shape.extents3(),
                dimension: shape.dimension(),
                boundary: block.boundary(),
                offsets: block.offsets(),
                seed: block.seed(),
                frame: state.frame as f32,
            };
            state.front.par_iter_mut().enumerate().for_each(|(i, out)| {
                let cell = Cell {
                    sampler: &sampler,
                    position: shape.coords(i),
                    texel: texture.texel(i),
                };
                let current = sampler.cells[i] as i32;
                *out = transition.next(current, cell).clamp(0, 255) as u8;
            });
        }

        trace!(
            "Executed '{}' for {} iterations on CPU",
            block.descriptor().rule_string,
            block.iterations()
        );
        Ok(())
    }

    fn download(&mut self, grid: &mut Grid) -> Result<(), GpuError> {
        let state = self.state_mut()?;
        grid.as_mut_slice().copy_from_slice(&state.front);
        Ok(())
    }

    fn release(&mut self) -> Result<(), GpuError> {
        if self.released {
            return Err(GpuError::BackendReleased);
        }
        self.released = true;
        self.state = None;
        Ok(())
    }
}
