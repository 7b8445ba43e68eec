use std::path::PathBuf;

use async_shutdown::ShutdownManager;
use clap::{Parser, Subcommand};
use comet::config::Config;
use comet::pattern::{PassthroughDecoder, PassthroughEncoder, PatternSource, TraceSink};
use comet::stream::{ReceiverPipeline, SenderPipeline};
use tracing_subscriber::EnvFilter;

/// Dimensions of the built-in test pattern, sized so one frame fits a single
/// FEC block set under the default chunk size.
const PATTERN_WIDTH: u32 = 48;
const PATTERN_HEIGHT: u32 = 27;

#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
	#[clap(subcommand)]
	role: Role,

	/// Show more log messages.
	#[clap(long, short)]
	#[clap(action = clap::ArgAction::Count, global = true)]
	verbose: u8,

	/// Show less log messages.
	#[clap(long, short)]
	#[clap(action = clap::ArgAction::Count, global = true)]
	quiet: u8,
}

#[derive(Subcommand, Debug)]
enum Role {
	/// Capture, encode and stream frames to the remote peer.
	Send {
		/// Path to configuration file.
		config: PathBuf,
	},
	/// Receive, reconstruct and present frames from the remote peer.
	Recv {
		/// Path to configuration file.
		config: PathBuf,
	},
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), ()> {
	let args = Args::parse();

	let log_level = match i16::from(args.verbose) - i16::from(args.quiet) {
		..=-2 => "error",
		-1 => "warn",
		0 => "info",
		1 => "debug",
		2.. => "trace",
	};

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new(format!("comet={log_level}"))),
		)
		.init();

	// Spawn a task to wait for CTRL+C and trigger a shutdown.
	let shutdown = ShutdownManager::new();
	tokio::spawn({
		let shutdown = shutdown.clone();
		async move {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!("Failed to wait for CTRL+C: {e}");
				std::process::exit(1);
			} else {
				tracing::info!("Received interrupt signal, shutting down...");
				shutdown.trigger_shutdown(()).ok();
			}
		}
	});

	match args.role {
		Role::Send { config } => {
			let config = Config::read_from_file(config).map_err(|_| std::process::exit(1))?;
			tracing::debug!("Using configuration:\n{:#?}", config);

			let source = PatternSource::new(PATTERN_WIDTH, PATTERN_HEIGHT);
			let encoder = PassthroughEncoder::new(config.video.bitrate);
			let pipeline = SenderPipeline::new(config, Box::new(source), Box::new(encoder))
				.await
				.map_err(|_| std::process::exit(1))?;

			pipeline.run(shutdown.clone()).await?;
		},
		Role::Recv { config } => {
			let config = Config::read_from_file(config).map_err(|_| std::process::exit(1))?;
			tracing::debug!("Using configuration:\n{:#?}", config);

			let decoder = PassthroughDecoder::new(PATTERN_WIDTH, PATTERN_HEIGHT);
			let pipeline = ReceiverPipeline::new(
				config,
				Box::new(decoder),
				Box::new(TraceSink::new()),
				shutdown.clone(),
			)
			.await
			.map_err(|_| std::process::exit(1))?;

			pipeline.run(shutdown.clone()).await?;
		},
	}

	// Let the background tasks wind down before exiting.
	shutdown.trigger_shutdown(()).ok();
	shutdown.wait_shutdown_complete().await;

	Ok(())
}
