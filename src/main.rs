mod cli;

use cli::{Args, Command};
use frame_upscaler::{Error, JobOutcome, Pipeline, StitchOutcome};

use clap::Parser;
use log::{debug, info};
use std::process;

/// Exit status when the frames were upscaled but no video came out of them.
const EXIT_STITCH_FAILED: i32 = 3;

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn run(args: &Args) -> Result<JobOutcome, Error> {
    let config = args.job_config()?;
    debug!("Job configuration: {:?}", config);
    let pipeline = Pipeline::new(config)?;
    match &args.command {
        Command::Video { file } => pipeline.upscale_video(file),
        Command::Batch { batch_id, dir } => pipeline.upscale_existing_batch(batch_id, dir),
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbosity);
    info!("Frame upscaler {} starting", env!("CARGO_PKG_VERSION"));

    match run(&args) {
        Ok(outcome) => match &outcome.stitch {
            StitchOutcome::Stitched { video, frames } => {
                println!("Upscaled {} frames into {}", outcome.frame_count, video.display());
                if let Some(frames) = frames {
                    println!("Frames kept in {}", frames.display());
                }
                println!("Completed!");
            }
            StitchOutcome::Failed { reason, frames, .. } => {
                eprintln!("Error: {}", reason);
                eprintln!("frames saved, video not produced: {}", frames.display());
                process::exit(EXIT_STITCH_FAILED);
            }
        },
        Err(error) => {
            eprintln!("Error: {}", error);
            process::exit(1);
        }
    }
}
