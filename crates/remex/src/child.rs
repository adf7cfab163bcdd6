//! Child-process entry point.
//!
//! A single forward pass: route on the marker token, parse the invocation,
//! activate the operation set, invoke the operation, and capture anything
//! that went wrong into the failure artifact before crashing the process on
//! purpose. The artifact and the exit status are independent signals and the
//! parent checks both; this module must keep both intact.

use std::panic::{self, AssertUnwindSafe};

use remex_proto::{InvocationRequest, MALFORMED_EXIT_CODE, Parsed, SUCCESS_EXIT_CODE, usage};
use tracing::{debug, error};

use crate::registry;

/// Routes argv (program name already stripped) into the child entry point.
///
/// Returns `None` when the marker token is absent: the process is running
/// standalone and the caller should proceed with its own `main`. Otherwise
/// returns the exit code the process must terminate with. Pass the code to
/// [`std::process::exit`] rather than returning it from `main`, so stray
/// threads spawned by the operation cannot keep the child alive.
pub fn try_main(args: &[String]) -> Option<i32> {
	match remex_proto::parse_argv(args) {
		Parsed::NotRemote => None,
		Parsed::Malformed => {
			// No operation context exists yet, so this path never writes a
			// failure artifact: the parent sees the exit code alone.
			eprintln!("{}", usage());
			Some(MALFORMED_EXIT_CODE)
		}
		Parsed::Request(request) => Some(run(&request)),
	}
}

/// Executes one parsed invocation and computes the child's exit code.
///
/// Failures from activation, lookup, or the operation itself - error
/// returns and panics alike - are rendered into the failure artifact and
/// then re-raised, so the process still crashes at its own level.
/// Memory-corruption-class faults (segfaults, aborts) do not unwind and
/// bypass the capture entirely.
pub fn run(request: &InvocationRequest) -> i32 {
	let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute(request)));

	// The operation may have chdir'd into a directory the parent wants to
	// delete after the child exits; move off it unconditionally.
	let _ = std::env::set_current_dir(std::env::temp_dir());

	match outcome {
		Ok(Ok(code)) => {
			let code = code.unwrap_or(SUCCESS_EXIT_CODE);
			debug!(key = %request.key, code, "operation completed");
			code
		}
		Ok(Err(err)) => {
			report_failure(request, &format!("{err:?}"));
			panic!("remote operation '{}' failed: {err:#}", request.key);
		}
		Err(payload) => {
			report_failure(request, panic_detail(payload.as_ref()));
			panic::resume_unwind(payload);
		}
	}
}

fn execute(request: &InvocationRequest) -> anyhow::Result<Option<i32>> {
	registry::activate(&request.set_id)?;
	registry::lookup_and_invoke(&request.key, &request.args)
}

/// Renders the failure and replaces the artifact file with it.
fn report_failure(request: &InvocationRequest, detail: &str) {
	let mut report = String::new();
	report.push_str("\nChild failure:\n");
	for line in detail.lines() {
		report.push_str("  ");
		report.push_str(line);
		report.push('\n');
	}
	report.push_str("\nChild operation:\n");
	report.push_str(&format!("  {} {}\n", request.set_id, request.key));
	if !request.args.is_empty() {
		report.push_str("\nChild arguments:\n");
		report.push_str(&format!("  {}\n", request.args.join(", ")));
	}

	// fs::write truncates and closes before returning, so the artifact is
	// complete on disk before the process can exit.
	if let Err(write_err) = std::fs::write(&request.artifact_path, &report) {
		error!(
			path = %request.artifact_path.display(),
			error = %write_err,
			"failed to write failure artifact"
		);
	}
}

/// Extracts the printable detail from a panic payload, unwrapping the one
/// layer of wrapping a panic adds around its message.
fn panic_detail(payload: &(dyn std::any::Any + Send)) -> &str {
	if let Some(s) = payload.downcast_ref::<&str>() {
		s
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s
	} else {
		"panic with non-string payload"
	}
}
