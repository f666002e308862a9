use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hsne_rs::io::read_point_matrix;
use hsne_rs::{
    run, suggested_landmark_threshold, suggested_scale_count, HsneParameters, TracingObserver,
    WalkLength,
};

#[derive(Parser, Debug)]
#[command(name = "hsne_build")]
#[command(
    about = "Build a multi-scale landmark hierarchy from an .fvecs point file",
    long_about = None
)]
struct Cli {
    #[arg(long, help = "Input points in .fvecs format")]
    input: PathBuf,

    #[arg(long, help = "Destination of the hierarchy file")]
    output: PathBuf,

    #[arg(
        long,
        help = "Number of scales including the data scale [default: derived from point count]"
    )]
    num_scales: Option<i64>,

    #[arg(long, help = "Read at most this many points")]
    limit: Option<usize>,

    #[arg(
        long,
        default_value_t = 0,
        allow_negative_numbers = true,
        help = "Random seed, negative for a fresh one"
    )]
    seed: i64,

    #[arg(
        long,
        help = "Visit frequency a landmark must exceed [default: 1.5 / number of points]"
    )]
    landmark_threshold: Option<f32>,

    #[arg(long, default_value_t = 30)]
    num_neighbors: usize,

    #[arg(long, default_value_t = 4)]
    num_trees: usize,

    #[arg(long, default_value_t = 1024)]
    num_checks: usize,

    #[arg(long, default_value_t = 1e-3)]
    transition_matrix_prune_thresh: f32,

    #[arg(long, default_value_t = 10)]
    num_walks: usize,

    #[arg(long, default_value_t = 100)]
    num_walks_per_landmark: usize,

    #[arg(long, default_value_t = 15, help = "Fixed walk length for landmark selection")]
    walk_length: usize,

    #[arg(
        long,
        conflicts_with = "walk_length",
        help = "Draw geometric walk lengths with this mean instead"
    )]
    geometric_walk_mean: Option<f32>,

    #[arg(
        long,
        help = "Select landmarks by weighted sampling instead of the frequency threshold"
    )]
    weighted_sampling: bool,

    #[arg(long, help = "Keep visit counters sparse to bound memory on large inputs")]
    out_of_core: bool,
}

impl Cli {
    fn parameters(&self, num_points: usize) -> HsneParameters {
        let walk_length = match self.geometric_walk_mean {
            Some(mean) => WalkLength::Geometric { mean },
            None => WalkLength::Fixed(self.walk_length),
        };
        HsneParameters {
            seed: self.seed,
            landmark_threshold: self
                .landmark_threshold
                .unwrap_or_else(|| suggested_landmark_threshold(num_points)),
            num_neighbors: self.num_neighbors,
            num_trees: self.num_trees,
            num_checks: self.num_checks,
            transition_matrix_prune_thresh: self.transition_matrix_prune_thresh,
            num_walks: self.num_walks,
            num_walks_per_landmark: self.num_walks_per_landmark,
            walk_length,
            monte_carlo_sampling: !self.weighted_sampling,
            out_of_core_computation: self.out_of_core,
            ..HsneParameters::default()
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let points = match read_point_matrix(&cli.input, cli.limit) {
        Ok(points) => points,
        Err(err) => {
            error!(input = %cli.input.display(), error = %err, "failed to read points");
            process::exit(1);
        }
    };
    let num_scales = cli
        .num_scales
        .unwrap_or_else(|| suggested_scale_count(points.len()) as i64);
    info!(
        points = points.len(),
        dim = points.dim,
        num_scales,
        "building hierarchy"
    );

    let report = run(
        &points.data,
        points.dim,
        &cli.output,
        num_scales,
        cli.parameters(points.len()),
        &TracingObserver,
    );
    if !report.success {
        error!(message = %report.message, "build failed");
        process::exit(1);
    }
    info!(output = %cli.output.display(), "done");
}
