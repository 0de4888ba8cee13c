//! Compute module - kernel generation and grid stepping.

mod automaton;
mod backend;
mod codegen;
mod cpu;
mod grid;
mod kernel;
mod neighbourhood;

pub mod gpu;

pub use automaton::*;
pub use backend::*;
pub use codegen::*;
pub use cpu::*;
pub use grid::*;
pub use kernel::*;
pub use neighbourhood::*;
