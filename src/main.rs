//! Automata GPU CLI - Run rule sequences from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::PathBuf;
use std::time::Instant;

use automata_gpu::{
    compute::{AutomatonError, CellularAutomaton, CpuBackend, ExecutionBackend},
    schema::AutomatonConfig,
};

/// Grids up to this many cells per slice are printed after the run.
const PRINT_LIMIT: usize = 64 * 64;

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [--cpu]", args[0]);
        eprintln!();
        eprintln!("Run cellular automaton rules from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to automaton configuration file");
        eprintln!("  --cpu        Step on the CPU reference backend instead of the GPU");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let use_cpu = args[2..].iter().any(|arg| arg == "--cpu");

    let config = AutomatonConfig::load(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });

    println!("Automata GPU");
    println!("============");
    println!("Grid: {:?}", config.shape);
    println!("Boundary: {}", config.boundary);
    println!(
        "Steps: {} ({} iterations)",
        config.steps.len(),
        config.total_iterations()
    );
    println!("Backend: {}", if use_cpu { "cpu" } else { "gpu" });
    println!();

    let result = if use_cpu {
        CellularAutomaton::with_backend(CpuBackend::new(), &config.shape, config.default_value)
            .and_then(|automaton| run(automaton, &config))
    } else {
        CellularAutomaton::new(&config.shape, config.default_value)
            .and_then(|automaton| run(automaton, &config))
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run<B: ExecutionBackend>(
    automaton: CellularAutomaton<B>,
    config: &AutomatonConfig,
) -> Result<(), AutomatonError> {
    let mut automaton = match config.seed {
        Some(seed) => automaton.with_seed(seed),
        None => automaton,
    };

    if let Some(distribution) = &config.distribution {
        automaton.fill_with_distribution(distribution.entries());
    }
    automaton.set_out_of_bound_policy(config.boundary);

    println!("Initial state:");
    print_stats(automaton.grid());
    println!();

    println!("Running...");
    let start = Instant::now();

    for (i, step) in config.steps.iter().enumerate() {
        if let Some(policy) = step.boundary {
            automaton.set_out_of_bound_policy(policy);
        }
        automaton.apply(&step.rule, step.iterations)?;
        // Flush per step so progress reflects the grid, not the queue.
        automaton.finalize()?;
        println!(
            "  Step {}/{}: '{}' x{} ({}), population={}",
            i + 1,
            config.steps.len(),
            step.rule,
            step.iterations,
            automaton.boundary(),
            automaton.grid().population()
        );
    }

    let elapsed = start.elapsed();

    println!();
    println!("Final state:");
    print_stats(automaton.grid());

    let shape = automaton.shape();
    let [width, height, depth] = shape.extents3();
    if width * height <= PRINT_LIMIT {
        for z in 0..depth {
            println!();
            if depth > 1 {
                println!("z = {}", z);
            }
            print!("{}", automaton.grid().render_slice(z));
        }
    }

    println!();
    println!(
        "Time: {:.2}s ({:.1} iterations/s)",
        elapsed.as_secs_f32(),
        config.total_iterations() as f32 / elapsed.as_secs_f32()
    );

    automaton.destroy()
}

fn print_stats(grid: &automata_gpu::Grid) {
    println!("  Population: {}", grid.population());
    for (value, count) in grid.histogram().iter().enumerate() {
        if *count > 0 {
            println!("  Value {}: {}", value, count);
        }
    }
}

fn print_example_config() {
    let config = AutomatonConfig::default();

    println!("Example configuration (config.json):");
    println!("{}", serde_json::to_string_pretty(&config).unwrap());
}
