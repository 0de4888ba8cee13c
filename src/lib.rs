//! Automata GPU - cellular automata rule strings compiled to GPU kernels.
//!
//! Each rule string is parsed into a [`schema::RuleDescriptor`], turned into
//! a WGSL fragment shader and run as a full-screen pass over a ping-pong pair
//! of RGBA8 textures. Grids are 2D or 3D; 3D grids are packed into a square
//! 2D texture.
//!
//! # Architecture
//!
//! - `schema`: rule descriptors, rule-string parsing, boundary policies,
//!   random fills and run configuration
//! - `compute`: neighbourhoods, kernel generation, the GPU and CPU
//!   execution backends and the [`compute::CellularAutomaton`] that drives them
//!
//! # Example
//!
//! ```rust,no_run
//! use automata_gpu::{compute::CellularAutomaton, schema::BoundaryPolicy};
//!
//! # fn main() -> Result<(), automata_gpu::compute::AutomatonError> {
//! let mut automaton = CellularAutomaton::new(&[200, 200], 0)?;
//! automaton
//!     .fill_with_distribution(&[(Some(0), 50.0), (Some(1), 50.0)])
//!     .set_out_of_bound_policy(BoundaryPolicy::Wrap)
//!     .apply("B3/S23", 100)?
//!     .apply("S23/B3/C8M2", 20)?
//!     .finalize()?;
//!
//! println!("Live cells: {}", automaton.grid().population());
//! automaton.destroy()?;
//! # Ok(())
//! # }
//! ```

pub mod compute;
pub mod schema;

pub use compute::{AutomatonError, CellularAutomaton, CpuBackend, Grid, Shape};
pub use schema::{AutomatonConfig, BoundaryPolicy, RuleDescriptor};
