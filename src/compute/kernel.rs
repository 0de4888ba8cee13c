//! Kernel compiler.
//!
//! Turns a rule descriptor, a neighbour offset list, the grid shape and an
//! out-of-bound policy into a WGSL vertex/fragment pair. The fragment stage
//! runs once per texel, reads the previous generation from `backbuffer` and
//! writes the next value of the cell stored in that texel.
//!
//! Generated source is a pure function of its inputs: offsets are normalized
//! first and the stochastic seed is passed in explicitly, so identical inputs
//! give byte-identical kernels.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use log::debug;

use super::codegen::{ProbabilityCheck, ValueSet, float_literal};
use super::grid::Shape;
use super::neighbourhood::{Offset, normalize_offsets};
use crate::schema::{BoundaryPolicy, RuleDescriptor, RuleKind};

const VERTEX_SHADER: &str = include_str!("shaders/fullscreen.wgsl");
const FRAGMENT_PRELUDE: &str = include_str!("shaders/prelude.wgsl");

/// Entry points of every generated kernel.
pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Errors raised while generating a kernel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Unsupported rule family '{0}'")]
    UnsupportedRuleFamily(String),
    #[error("Unsupported dimensionality {0} (expected 2 or 3)")]
    UnsupportedDimension(usize),
    #[error("Invalid rule parameter: {0}")]
    InvalidParameter(String),
}

/// Generated WGSL for one kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelSource {
    pub vertex: String,
    pub fragment: String,
}

impl KernelSource {
    /// Hash of both stages; equal sources always share a key.
    pub fn cache_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Which neighbourhood aggregate a transition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregate {
    /// Number of neighbours with a non-zero value.
    Sum,
    /// Number of neighbours equal to a requested value.
    Count,
    Unused,
}

/// Generate the kernel for `descriptor` on a grid of `shape`.
pub fn compile_kernel(
    descriptor: &RuleDescriptor,
    offsets: &[Offset],
    shape: Shape,
    boundary: BoundaryPolicy,
    seed: f32,
) -> Result<KernelSource, CompileError> {
    let dimension = shape.dimension();
    if let Some(offset) = offsets.iter().find(|offset| offset.len() != dimension) {
        return Err(CompileError::UnsupportedDimension(offset.len()));
    }
    validate_parameters(&descriptor.kind)?;
    if !seed.is_finite() {
        return Err(CompileError::InvalidParameter(format!("seed {seed} is not finite")));
    }

    let offsets = normalize_offsets(offsets.to_vec());
    let (aggregate, process) = transition(&descriptor.kind, seed, dimension);
    let cell_type = vector_type(dimension);

    let mut fragment = header("Fragment shader", descriptor, shape, boundary);
    fragment.push_str(FRAGMENT_PRELUDE);
    fragment.push('\n');
    fragment.push_str(&layout(shape));
    fragment.push('\n');
    fragment.push_str(&get_pixel(&cell_type, boundary));
    fragment.push('\n');
    match aggregate {
        Aggregate::Sum | Aggregate::Count => {
            fragment.push_str(&neighbour_list(&cell_type, &offsets));
            fragment.push('\n');
            fragment.push_str(&aggregate_fn(aggregate, &offsets));
            fragment.push('\n');
        }
        Aggregate::Unused => {}
    }
    fragment.push_str(&process);

    let mut vertex = header("Vertex shader", descriptor, shape, boundary);
    vertex.push_str(VERTEX_SHADER);

    debug!(
        "Compiled {} kernel for '{}' ({}D, {} neighbours, boundary {})",
        descriptor.family(),
        descriptor.rule_string,
        dimension,
        offsets.len(),
        boundary
    );
    Ok(KernelSource { vertex, fragment })
}

/// Distinct values an 8-bit cell can hold.
const MAX_STATES: u32 = 256;
/// Largest nluky state count whose cycle `2 + 2n` still fits in a cell.
const MAX_NLUKY_STATES: u32 = (MAX_STATES - 2) / 2;

fn validate_parameters(kind: &RuleKind) -> Result<(), CompileError> {
    match kind {
        RuleKind::Generations { state_count, .. }
        | RuleKind::ExtendedGenerations { state_count, .. }
        | RuleKind::Cyclic { state_count, .. }
            if !(2..=MAX_STATES).contains(state_count) =>
        {
            return Err(CompileError::InvalidParameter(format!(
                "{} rule needs between 2 and {MAX_STATES} states, got {state_count}",
                kind.family()
            )));
        }
        RuleKind::Nluky { state_count, .. } if !(1..=MAX_NLUKY_STATES).contains(state_count) => {
            return Err(CompileError::InvalidParameter(format!(
                "nluky rule needs between 1 and {MAX_NLUKY_STATES} states, got {state_count}"
            )));
        }
        RuleKind::ExtendedStochastic { survival, birth } => {
            if let Some((sum, p)) = survival
                .iter()
                .chain(birth)
                .find(|(_, p)| !p.is_finite() || !(0.0..=1.0).contains(*p))
            {
                return Err(CompileError::InvalidParameter(format!(
                    "probability {p} for sum {sum} is outside [0, 1]"
                )));
            }
        }
        _ => {}
    }

    match integer_parameters(kind).into_iter().find(|&v| i32::try_from(v).is_err()) {
        Some(value) => Err(CompileError::InvalidParameter(format!(
            "{} rule parameter {value} does not fit in an i32",
            kind.family()
        ))),
        None => Ok(()),
    }
}

/// Integers that end up as `i32` literals in the kernel.
fn integer_parameters(kind: &RuleKind) -> Vec<u32> {
    match kind {
        RuleKind::Life { survival, birth }
        | RuleKind::ExtendedLife { survival, birth }
        | RuleKind::Generations { survival, birth, .. }
        | RuleKind::ExtendedGenerations { survival, birth, .. } => {
            survival.iter().chain(birth).copied().collect()
        }
        RuleKind::ExtendedStochastic { survival, birth } => {
            survival.keys().chain(birth.keys()).copied().collect()
        }
        RuleKind::Vote { votes } => votes.clone(),
        RuleKind::Luky {
            low_survival,
            high_survival,
            low_birth,
            high_birth,
        }
        | RuleKind::Nluky {
            low_survival,
            high_survival,
            low_birth,
            high_birth,
            ..
        } => vec![*low_survival, *high_survival, *low_birth, *high_birth],
        RuleKind::Cyclic { threshold, .. } => vec![*threshold],
        RuleKind::Debug => Vec::new(),
    }
}

fn vector_type(dimension: usize) -> String {
    format!("vec{dimension}<i32>")
}

fn header(stage: &str, descriptor: &RuleDescriptor, shape: Shape, boundary: BoundaryPolicy) -> String {
    let dims: Vec<String> = shape.dims().iter().map(ToString::to_string).collect();
    format!(
        "// {stage} generated by automata-gpu\n\
         //\n\
         // Rule : {}\n\
         // Dimensions : {}D [{}]\n\
         // Out of bound value : {boundary}\n\n",
        descriptor.rule_string,
        shape.dimension(),
        dims.join(", "),
    )
}

/// Grid constants plus the cell <-> texel mapping.
fn layout(shape: Shape) -> String {
    match shape {
        Shape::D2([x, y]) => format!(
            "const GRID_SIZE: vec2<i32> = vec2<i32>({x}, {y});\n\
             \n\
             fn cell_position(texel: vec2<i32>) -> vec2<i32> {{\n    \
                 return texel;\n\
             }}\n\
             \n\
             fn texel_position(cell: vec2<i32>) -> vec2<i32> {{\n    \
                 return cell;\n\
             }}\n"
        ),
        Shape::D3([x, y, z]) => {
            let width = shape.texture_shape().width;
            format!(
                "const GRID_SIZE: vec3<i32> = vec3<i32>({x}, {y}, {z});\n\
                 const TEXTURE_WIDTH: i32 = {width};\n\
                 const STRIDE_Y: i32 = {stride_y};\n\
                 const STRIDE_Z: i32 = {stride_z};\n\
                 \n\
                 fn cell_position(texel: vec2<i32>) -> vec3<i32> {{\n    \
                     let index = texel.x + texel.y * TEXTURE_WIDTH;\n    \
                     return vec3<i32>(index % GRID_SIZE.x, (index / STRIDE_Y) % GRID_SIZE.y, index / STRIDE_Z);\n\
                 }}\n\
                 \n\
                 fn texel_position(cell: vec3<i32>) -> vec2<i32> {{\n    \
                     let index = cell.x + cell.y * STRIDE_Y + cell.z * STRIDE_Z;\n    \
                     return vec2<i32>(index % TEXTURE_WIDTH, index / TEXTURE_WIDTH);\n\
                 }}\n",
                stride_y = shape.stride_y(),
                stride_z = shape.stride_z(),
            )
        }
    }
}

/// Boundary-aware fetch of the neighbour at `cell + offset`.
fn get_pixel(cell_type: &str, boundary: BoundaryPolicy) -> String {
    let resolve = match boundary {
        BoundaryPolicy::Fixed(value) => format!(
            "let pixel = cell + offset;\n    \
             if (any(pixel < {cell_type}(0)) || any(pixel >= GRID_SIZE)) {{\n        \
                 return {value};\n    \
             }}"
        ),
        BoundaryPolicy::Clamp => {
            format!("let pixel = clamp(cell + offset, {cell_type}(0), GRID_SIZE - {cell_type}(1));")
        }
        BoundaryPolicy::Wrap => {
            "let pixel = ((cell + offset) % GRID_SIZE + GRID_SIZE) % GRID_SIZE;".to_string()
        }
    };
    format!(
        "fn get_pixel(cell: {cell_type}, offset: {cell_type}) -> i32 {{\n    \
             {resolve}\n    \
             return unpack_value(textureLoad(backbuffer, texel_position(pixel), 0).r);\n\
         }}\n"
    )
}

fn neighbour_list(cell_type: &str, offsets: &[Offset]) -> String {
    if offsets.is_empty() {
        return "const NEIGHBOUR_COUNT: i32 = 0;\n".to_string();
    }
    let count = offsets.len();
    let entries: Vec<String> = offsets
        .iter()
        .map(|offset| {
            let components: Vec<String> = offset.iter().map(ToString::to_string).collect();
            format!("    {cell_type}({}),", components.join(", "))
        })
        .collect();
    format!(
        "const NEIGHBOUR_COUNT: i32 = {count};\n\
         var<private> neighbours: array<{cell_type}, {count}> = array<{cell_type}, {count}>(\n\
         {}\n\
         );\n",
        entries.join("\n")
    )
}

fn aggregate_fn(aggregate: Aggregate, offsets: &[Offset]) -> String {
    let (signature, test) = match aggregate {
        Aggregate::Sum => ("neighbour_sum(texel: vec2<i32>)", "> 0"),
        Aggregate::Count => ("neighbour_count(texel: vec2<i32>, desired: i32)", "== desired"),
        Aggregate::Unused => return String::new(),
    };
    if offsets.is_empty() {
        return format!("fn {signature} -> i32 {{\n    return 0;\n}}\n");
    }
    format!(
        "fn {signature} -> i32 {{\n    \
             let cell = cell_position(texel);\n    \
             var total = 0;\n    \
             for (var i = 0; i < NEIGHBOUR_COUNT; i++) {{\n        \
                 if (get_pixel(cell, neighbours[i]) {test}) {{\n            \
                     total += 1;\n        \
                 }}\n    \
             }}\n    \
             return total;\n\
         }}\n"
    )
}

fn process_fn(body: &str) -> String {
    format!("fn process(current: i32, texel: vec2<i32>) -> i32 {{\n{body}}}\n")
}

/// Birth/survival transition shared by the life-like families.
fn life_body(birth: &str, survival: &str) -> String {
    format!(
        "    let sum = neighbour_sum(texel);\n    \
         if (current == 0 && {birth}) {{\n        \
             return 1;\n    \
         }} else if (current > 0 && {survival}) {{\n        \
             return 1;\n    \
         }}\n    \
         return 0;\n"
    )
}

fn transition(kind: &RuleKind, seed: f32, dimension: usize) -> (Aggregate, String) {
    match kind {
        RuleKind::Life { survival, birth } | RuleKind::ExtendedLife { survival, birth } => {
            let birth = ValueSet::compact(birth).condition("sum");
            let survival = ValueSet::compact(survival).condition("sum");
            (Aggregate::Sum, process_fn(&life_body(&birth, &survival)))
        }
        RuleKind::ExtendedStochastic { survival, birth } => {
            let random = format!("rand(vec2<f32>(texel), {})", float_literal(seed as f64));
            let birth = ProbabilityCheck::compact(birth).condition("sum", &random);
            let survival = ProbabilityCheck::compact(survival).condition("sum", &random);
            (Aggregate::Sum, process_fn(&life_body(&birth, &survival)))
        }
        RuleKind::Generations {
            state_count,
            survival,
            birth,
        }
        | RuleKind::ExtendedGenerations {
            state_count,
            survival,
            birth,
        } => {
            let birth = ValueSet::compact(birth).condition("sum");
            let survival = ValueSet::compact(survival).condition("sum");
            let body = format!(
                "    let sum = neighbour_count(texel, 1);\n    \
                 if (current == 0 && {birth}) {{\n        \
                     return 1;\n    \
                 }} else if (current == 1 && {survival}) {{\n        \
                     return 1;\n    \
                 }} else if (current > 0) {{\n        \
                     return (current + 1) % {state_count};\n    \
                 }}\n    \
                 return 0;\n"
            );
            (Aggregate::Count, process_fn(&body))
        }
        RuleKind::Vote { votes } => {
            let votes = ValueSet::compact(votes).condition("sum");
            let body = format!(
                "    let sum = neighbour_sum(texel) + select(0, 1, current > 0);\n    \
                 if ({votes}) {{\n        \
                     return 1;\n    \
                 }}\n    \
                 return 0;\n"
            );
            (Aggregate::Sum, process_fn(&body))
        }
        RuleKind::Luky {
            low_survival,
            high_survival,
            low_birth,
            high_birth,
        } => {
            let birth = format!("sum >= {low_birth} && sum <= {high_birth}");
            let survival = format!("sum >= {low_survival} && sum <= {high_survival}");
            (Aggregate::Sum, process_fn(&life_body(&birth, &survival)))
        }
        RuleKind::Nluky {
            state_count,
            low_survival,
            high_survival,
            low_birth,
            high_birth,
        } => {
            let cycle = 2 + 2 * u64::from(*state_count);
            let dying = 2 % cycle;
            let body = format!(
                "    let sum = neighbour_count(texel, 1);\n    \
                 if (current == 0 && sum >= {low_birth} && sum <= {high_birth}) {{\n        \
                     return 1;\n    \
                 }} else if (current == 1 && sum >= {low_survival} && sum <= {high_survival}) {{\n        \
                     return 1;\n    \
                 }} else if (current == 1) {{\n        \
                     return {dying};\n    \
                 }} else if (current >= 2) {{\n        \
                     return (current + 2) % {cycle};\n    \
                 }}\n    \
                 return 0;\n"
            );
            (Aggregate::Count, process_fn(&body))
        }
        RuleKind::Cyclic {
            state_count,
            threshold,
            greenberg_hastings,
        } => {
            let excited = if *greenberg_hastings { " || current > 0" } else { "" };
            let body = format!(
                "    let next = (current + 1) % {state_count};\n    \
                 let sum = neighbour_count(texel, next);\n    \
                 if (sum >= {threshold}{excited}) {{\n        \
                     return next;\n    \
                 }}\n    \
                 return current;\n"
            );
            (Aggregate::Count, process_fn(&body))
        }
        RuleKind::Debug => {
            let body = "    return debug_value(cell_position(texel));\n";
            (Aggregate::Unused, format!("{}\n{}", debug_value_fn(dimension), process_fn(body)))
        }
    }
}

/// `(x + 8y + 64z) % 256` of the decoded cell coordinate.
fn debug_value_fn(dimension: usize) -> String {
    let (cell_type, expr) = match dimension {
        3 => ("vec3<i32>", "cell.x + cell.y * 8 + cell.z * 64"),
        _ => ("vec2<i32>", "cell.x + cell.y * 8"),
    };
    format!("fn debug_value(cell: {cell_type}) -> i32 {{\n    return ({expr}) % 256;\n}}\n")
}
