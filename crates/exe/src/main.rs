//! Standalone remex child executable.
//!
//! Thin wrapper over the child entry point for hosts that do not route
//! their own binary through the marker check. Everything interesting
//! happens in `remex::child`; this binary only sets up logging and owns
//! the process exit.

use remex_proto::{MALFORMED_EXIT_CODE, MARKER};
use tracing::debug;

fn main() {
	setup_tracing();

	let args: Vec<String> = std::env::args().skip(1).collect();
	debug!(argc = args.len(), "remex-exe started");

	match remex::child::try_main(&args) {
		// Exit instead of returning so stray threads spawned by the
		// operation cannot keep the child alive.
		Some(code) => std::process::exit(code),
		None => {
			eprintln!("remex-exe started, but missing marker argument: {MARKER}");
			std::process::exit(MALFORMED_EXIT_CODE);
		}
	}
}

fn setup_tracing() {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_env("REMEX_LOG")
		.or_else(|_| EnvFilter::try_from_default_env())
		.unwrap_or_else(|_| EnvFilter::new("warn"));

	// Logs go to stderr: stdout belongs to the invoked operation.
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}
