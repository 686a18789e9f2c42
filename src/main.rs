//! murmur viewer: a flock of birds simulated on the GPU (or CPU) and drawn
//! as instanced meshes.
//!
//! Controls:
//! - Mouse drag: orbit, mouse wheel: zoom
//! - `1`-`8` select a parameter, `=`/`-` scale it
//! - `[`/`]` halve/double the drawn agents, `Space` pause, `R` reset

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{error, info};

use murmur::flock::{Flock, DEFAULT_GRID_SIDE};
use murmur::sampler::DEFAULT_SAMPLE_BUDGET;
use murmur::window::{self, Backend};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Cpu,
    Gpu,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Cpu => Backend::Cpu,
            BackendArg::Gpu => Backend::Gpu,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(about = "Real-time murmuration of tens of thousands of birds")]
struct Args {
    /// Agent grid width
    #[arg(long, default_value_t = DEFAULT_GRID_SIDE)]
    width: u32,

    /// Agent grid height
    #[arg(long, default_value_t = DEFAULT_GRID_SIDE)]
    height: u32,

    /// Neighbor candidates sampled per agent per tick
    #[arg(long, default_value_t = DEFAULT_SAMPLE_BUDGET)]
    budget: u32,

    /// Seed for the initial layout (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Compute substrate
    #[arg(long, value_enum, default_value = "gpu")]
    backend: BackendArg,

    /// Number of agents drawn (defaults to all)
    #[arg(long)]
    active: Option<u32>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut builder = Flock::builder()
        .with_grid(args.width, args.height)
        .with_sample_budget(args.budget)
        .with_seed(args.seed);
    if let Some(active) = args.active {
        builder = builder.with_active_count(active);
    }

    let flock = match builder.build() {
        Ok(flock) => flock,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match window::run(flock, args.backend.into()) {
        Ok(()) => {
            info!("Goodbye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
