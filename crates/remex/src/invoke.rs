//! Parent-side controller for remote invocations.
//!
//! [`start`] spawns the child and hands back an [`InvocationHandle`]; the
//! handle is a scoped resource whose release point is
//! [`InvocationHandle::wait_and_validate`] (or the consuming
//! [`InvocationHandle::dispose`]): wait for the child, validate its exit
//! code against the expectation, and surface the failure artifact if the
//! child left one.
//!
//! There is no cooperative cancellation channel into a running child - the
//! command line is one-shot at spawn time - so cancelling a pending wait
//! (dropping the future or the handle) translates into forced termination
//! via `kill_on_drop`.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use remex_proto::{InvocationRequest, SUCCESS_EXIT_CODE};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Tuning for one remote invocation.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
	/// Exit code that counts as success. Defaults to
	/// [`SUCCESS_EXIT_CODE`].
	pub expected_exit_code: i32,
	/// How long the child may run before it is forcibly terminated.
	pub timeout: Duration,
	/// How long to wait for a killed child to be reaped before escalating
	/// to an unconditional kill.
	pub kill_grace: Duration,
	/// Child program override. Defaults to [`remex_proto::child_program`].
	pub program: Option<PathBuf>,
	/// Extra environment for the child.
	pub envs: Vec<(String, String)>,
}

impl Default for InvokeOptions {
	fn default() -> Self {
		Self {
			expected_exit_code: SUCCESS_EXIT_CODE,
			timeout: Duration::from_secs(60),
			kill_grace: Duration::from_secs(2),
			program: None,
			envs: Vec::new(),
		}
	}
}

impl InvokeOptions {
	/// Sets the exit code treated as success.
	#[must_use]
	pub fn with_expected_exit_code(mut self, code: i32) -> Self {
		self.expected_exit_code = code;
		self
	}

	/// Sets how long the child may run.
	#[must_use]
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	/// Overrides the program spawned as the child.
	#[must_use]
	pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
		self.program = Some(program.into());
		self
	}

	/// Adds one environment variable to the child.
	#[must_use]
	pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.envs.push((key.into(), value.into()));
		self
	}
}

/// Parent-side invocation faults.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum InvokeError {
	/// The child program could not be resolved or started.
	#[error("failed to spawn child {program}: {source}")]
	Spawn {
		/// Program that was being spawned.
		program: PathBuf,
		/// Underlying OS error.
		#[source]
		source: io::Error,
	},
	/// Waiting on the child failed at the OS level.
	#[error("failed to wait on child: {source}")]
	Wait {
		/// Underlying OS error.
		#[source]
		source: io::Error,
	},
	/// The child outlived its allowance and was forcibly terminated.
	#[error("remote operation '{key}' timed out after {timeout:?}; child killed")]
	Timeout {
		/// Key of the invoked operation.
		key: String,
		/// The allowance that was exceeded.
		timeout: Duration,
	},
	/// The child reported a failure through its artifact.
	///
	/// The artifact always wins: its presence is a failure even when the
	/// exit code happens to match the expectation.
	#[error(
		"remote operation '{key}' failed (expected exit code {expected}, observed {observed}):\n{report}"
	)]
	Failed {
		/// Key of the invoked operation.
		key: String,
		/// Exit code the caller expected.
		expected: i32,
		/// Observed exit code, or a note that the child died to a signal.
		observed: String,
		/// The child's failure report, verbatim.
		report: String,
	},
	/// The child terminated without reporting: wrong exit code and no
	/// artifact. A crash, a kill, or a failure before the capture point.
	#[error(
		"child for remote operation '{key}' terminated without reporting \
		 (expected exit code {expected}, observed {observed})"
	)]
	Abnormal {
		/// Key of the invoked operation.
		key: String,
		/// Exit code the caller expected.
		expected: i32,
		/// Observed exit code, or a note that the child died to a signal.
		observed: String,
	},
}

/// One outstanding or completed child invocation.
///
/// Scoped resource: acquisition is [`start`], release is
/// [`wait_and_validate`](Self::wait_and_validate) or
/// [`dispose`](Self::dispose). Dropping a handle that was never validated
/// kills the child (best effort, via `kill_on_drop`) and logs a warning; it
/// never validates silently.
#[derive(Debug)]
pub struct InvocationHandle {
	key: String,
	child: Option<Child>,
	pid: Option<u32>,
	artifact_path: PathBuf,
	expected_exit_code: i32,
	timeout: Duration,
	kill_grace: Duration,
	validated: bool,
}

/// Spawns a child that activates `set_id` and invokes `key` with `args`.
///
/// Returns as soon as the child is running; completion is observed through
/// the returned handle. Must be called from within a tokio runtime (child
/// reaping is driven by the runtime).
pub fn start(
	set_id: &str,
	key: &str,
	args: &[&str],
	options: InvokeOptions,
) -> Result<InvocationHandle, InvokeError> {
	let program = match options.program {
		Some(p) => p,
		None => remex_proto::child_program().map_err(|source| InvokeError::Spawn {
			program: PathBuf::from("<current-exe>"),
			source,
		})?,
	};

	let request = InvocationRequest {
		set_id: set_id.to_string(),
		key: key.to_string(),
		artifact_path: remex_proto::fresh_artifact_path(),
		args: args.iter().map(|s| s.to_string()).collect(),
	};

	let mut command = Command::new(&program);
	command.args(request.to_argv()).kill_on_drop(true);
	for (k, v) in &options.envs {
		command.env(k, v);
	}

	let child = command.spawn().map_err(|source| InvokeError::Spawn {
		program: program.clone(),
		source,
	})?;
	let pid = child.id();
	debug!(key = %request.key, set = %set_id, pid, "spawned remote invocation");

	Ok(InvocationHandle {
		key: request.key,
		child: Some(child),
		pid,
		artifact_path: request.artifact_path,
		expected_exit_code: options.expected_exit_code,
		timeout: options.timeout,
		kill_grace: options.kill_grace,
		validated: false,
	})
}

impl InvocationHandle {
	/// OS process id of the child. Observability only.
	#[must_use]
	pub fn process_id(&self) -> Option<u32> {
		self.pid
	}

	/// Waits for the child and validates its outcome.
	///
	/// Blocks until the child exits or the timeout fires; a timed-out child
	/// is forcibly terminated before this returns, so no process outlives
	/// the call. Idempotent: the second and later calls are no-ops.
	pub async fn wait_and_validate(&mut self) -> Result<(), InvokeError> {
		if self.validated {
			return Ok(());
		}
		self.validated = true;

		let Some(mut child) = self.child.take() else {
			return Ok(());
		};

		let status = match tokio::time::timeout(self.timeout, child.wait()).await {
			Ok(Ok(status)) => status,
			Ok(Err(source)) => return Err(InvokeError::Wait { source }),
			Err(_) => {
				warn!(
					key = %self.key,
					pid = ?self.pid,
					timeout = ?self.timeout,
					"remote invocation timed out; killing child"
				);
				let _ = child.start_kill();
				if tokio::time::timeout(self.kill_grace, child.wait()).await.is_err() {
					// Unconditional: blocks until the child is reaped.
					let _ = child.kill().await;
				}
				let _ = tokio::fs::remove_file(&self.artifact_path).await;
				return Err(InvokeError::Timeout {
					key: self.key.clone(),
					timeout: self.timeout,
				});
			}
		};

		let code = status.code();
		debug!(key = %self.key, code = ?code, "remote invocation exited");

		// Single use: whatever the verdict, the artifact is consumed here.
		let report = match tokio::fs::read_to_string(&self.artifact_path).await {
			Ok(text) => {
				let _ = tokio::fs::remove_file(&self.artifact_path).await;
				Some(text)
			}
			Err(_) => None,
		};

		let observed = match code {
			Some(code) => code.to_string(),
			None => "termination by signal".to_string(),
		};

		match (code, report) {
			(Some(code), None) if code == self.expected_exit_code => Ok(()),
			(_, Some(report)) => Err(InvokeError::Failed {
				key: self.key.clone(),
				expected: self.expected_exit_code,
				observed,
				report,
			}),
			(_, None) => Err(InvokeError::Abnormal {
				key: self.key.clone(),
				expected: self.expected_exit_code,
				observed,
			}),
		}
	}

	/// Consumes the handle, waiting and validating first.
	pub async fn dispose(mut self) -> Result<(), InvokeError> {
		self.wait_and_validate().await
	}
}

impl Drop for InvocationHandle {
	fn drop(&mut self) {
		if !self.validated && self.child.is_some() {
			// kill_on_drop reaps the process; a dropped handle cannot
			// validate, so make the leak visible.
			warn!(
				key = %self.key,
				pid = ?self.pid,
				"invocation handle dropped without wait_and_validate; child killed"
			);
		}
	}
}

/// Starts `key` and waits for it in one call.
///
/// Equivalent to [`start`] followed by [`InvocationHandle::dispose`].
pub async fn invoke(
	set_id: &str,
	key: &str,
	args: &[&str],
	options: InvokeOptions,
) -> Result<(), InvokeError> {
	start(set_id, key, args, options)?.dispose().await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_options_expect_the_fixed_success_code() {
		let options = InvokeOptions::default();
		assert_eq!(options.expected_exit_code, SUCCESS_EXIT_CODE);
		assert!(options.program.is_none());
		assert!(options.envs.is_empty());
	}

	#[test]
	fn builder_methods_accumulate() {
		let options = InvokeOptions::default()
			.with_expected_exit_code(7)
			.with_timeout(Duration::from_secs(5))
			.with_program("/bin/echo")
			.with_env("A", "1")
			.with_env("B", "2");
		assert_eq!(options.expected_exit_code, 7);
		assert_eq!(options.timeout, Duration::from_secs(5));
		assert_eq!(options.program.as_deref(), Some(std::path::Path::new("/bin/echo")));
		assert_eq!(options.envs.len(), 2);
	}

	#[tokio::test]
	async fn spawn_failure_names_the_program() {
		let options = InvokeOptions::default().with_program("/nonexistent/remex-child");
		let err = start("set", "key", &[], options).unwrap_err();
		let InvokeError::Spawn { program, .. } = err else {
			panic!("expected Spawn, got {err:?}");
		};
		assert_eq!(program, PathBuf::from("/nonexistent/remex-child"));
	}

	#[tokio::test]
	async fn validation_happens_once() {
		// `true` exits 0, which never matches the expected 42: the first
		// wait reports, the second is a no-op per the disposal contract.
		let options = InvokeOptions::default().with_program("true");
		let mut handle = start("set", "key", &[], options).expect("spawn true");
		assert!(handle.process_id().is_some());

		let err = handle.wait_and_validate().await.unwrap_err();
		assert!(matches!(err, InvokeError::Abnormal { .. }));
		assert!(handle.wait_and_validate().await.is_ok());
	}
}
