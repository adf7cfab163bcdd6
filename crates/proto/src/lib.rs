//! Wire contract shared by the remex parent and child processes.
//!
//! A remote invocation crosses the process boundary over exactly two
//! channels: the child's command line (parent to child, fixed at spawn time)
//! and the failure artifact plus OS exit code (child to parent, observed at
//! wait time). This crate pins that contract down so both sides agree on the
//! marker token, the reserved exit codes, the positional argument layout,
//! and where artifacts and the child program live.

use std::env;
use std::io;
use std::path::PathBuf;

use uuid::Uuid;

/// Reserved first argument marking a process as a remex child.
///
/// Dual-purpose executables check for this token to decide between "run as a
/// remote-execution child" and "run standalone". The token is opaque; only
/// equality matters.
pub const MARKER: &str = "__remex_child__";

/// Exit code reported when an operation completes without an explicit code.
///
/// Distinctive on purpose: a child that dies before reaching the operation
/// will not produce it by accident.
pub const SUCCESS_EXIT_CODE: i32 = 42;

/// Exit code for invocations that fail before any operation context exists:
/// marker present but too few arguments, or a missing marker in the
/// standalone executable.
///
/// This path never writes a failure artifact; the parent observes the code
/// alone.
pub const MALFORMED_EXIT_CODE: i32 = 255;

/// Environment variable overriding the child program the parent spawns.
pub const CHILD_PROGRAM_ENV: &str = "REMEX_CHILD_PROGRAM";

/// Positional arguments between the marker and the operation's own.
const FIXED_ARGS: usize = 3;

/// One remote invocation, as carried on the child's command line.
///
/// Serialized as `<marker> <set-id> <key> <artifact-path> [arg]*`; there is
/// no out-of-band channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
	/// Operation set to activate in the child before lookup.
	pub set_id: String,
	/// Registry key of the operation to invoke.
	pub key: String,
	/// Where the child writes its failure report, if any.
	pub artifact_path: PathBuf,
	/// String arguments handed to the operation, in order.
	pub args: Vec<String>,
}

impl InvocationRequest {
	/// Renders the request as child argv (marker first, program name
	/// excluded).
	#[must_use]
	pub fn to_argv(&self) -> Vec<String> {
		let mut argv = Vec::with_capacity(1 + FIXED_ARGS + self.args.len());
		argv.push(MARKER.to_string());
		argv.push(self.set_id.clone());
		argv.push(self.key.clone());
		argv.push(self.artifact_path.display().to_string());
		argv.extend(self.args.iter().cloned());
		argv
	}
}

/// Routing decision for a child's argument vector.
#[derive(Debug)]
pub enum Parsed {
	/// Marker absent: not a remote invocation. A routing signal, not an
	/// error.
	NotRemote,
	/// Marker present but too few arguments to name an operation.
	Malformed,
	/// A complete invocation request.
	Request(InvocationRequest),
}

/// Parses child argv (program name already stripped).
#[must_use]
pub fn parse_argv(args: &[String]) -> Parsed {
	if args.first().map(String::as_str) != Some(MARKER) {
		return Parsed::NotRemote;
	}
	if args.len() < 1 + FIXED_ARGS {
		return Parsed::Malformed;
	}
	Parsed::Request(InvocationRequest {
		set_id: args[1].clone(),
		key: args[2].clone(),
		artifact_path: PathBuf::from(&args[3]),
		args: args[1 + FIXED_ARGS..].to_vec(),
	})
}

/// Usage line printed by the child on a malformed invocation.
#[must_use]
pub fn usage() -> String {
	format!("usage: <program> {MARKER} <operation-set> <operation-key> <failure-artifact> [arg]...")
}

/// Returns a fresh, collision-free failure-artifact path in the system temp
/// directory.
///
/// The parent mints one per invocation so concurrent children never share a
/// file.
#[must_use]
pub fn fresh_artifact_path() -> PathBuf {
	env::temp_dir().join(format!("remex-{}.txt", Uuid::new_v4()))
}

/// Resolves the program to spawn as the child.
///
/// # Resolution Order
///
/// 1. [`CHILD_PROGRAM_ENV`] environment variable.
/// 2. The current executable (dual-purpose binaries re-execute themselves).
pub fn child_program() -> io::Result<PathBuf> {
	if let Ok(p) = env::var(CHILD_PROGRAM_ENV) {
		return Ok(PathBuf::from(p));
	}
	env::current_exe()
}
