//! End-to-end remote invocation scenarios.
//!
//! This test binary doubles as its own child process: spawned with the
//! remex marker it routes into the child entry point before any scenario
//! runs; otherwise it executes the parent-side scenarios below against
//! re-executions of itself. That is the dual-purpose-executable pattern the
//! marker token exists for, so the test needs no separate child binary.

#![allow(unused_crate_dependencies)]

use std::future::Future;
use std::time::{Duration, Instant};

use remex::registry::{self, OperationSet, RegistryError};
use remex::{InvokeError, InvokeOptions};

const SET: &str = "remex-e2e";

fn register_ops() -> Result<(), RegistryError> {
	registry::register("succeed-quietly", 0, |_| Ok(None))?;
	registry::register("ok-with-code-one", 2, |_| Ok(Some(1)))?;
	registry::register("exit-with", 1, |args| Ok(Some(args[0].parse()?)))?;
	registry::register("fail-loudly", 2, |args| {
		anyhow::bail!("boom: {} / {}", args[0], args[1])
	})?;
	registry::register("panic-op", 0, |_| panic!("deliberate panic in child"))?;
	registry::register("echo-env", 0, |_| {
		let value = std::env::var("REMEX_E2E_TOKEN")?;
		Ok(Some(value.parse()?))
	})?;
	registry::register("hang", 0, |_| {
		loop {
			std::thread::sleep(Duration::from_secs(60));
		}
	})?;
	Ok(())
}

inventory::submit! {
	OperationSet {
		id: SET,
		register: register_ops,
	}
}

fn main() {
	// Child path first: a marker on the command line means this process is
	// one of the scenarios' children, not the test driver.
	let args: Vec<String> = std::env::args().skip(1).collect();
	if let Some(code) = remex::child::try_main(&args) {
		std::process::exit(code);
	}

	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.expect("tokio runtime");

	runtime.block_on(async {
		run("round trip with default success code", round_trip_success()).await;
		run("explicit exit code matches expectation", explicit_exit_code_matches()).await;
		run("arity mismatch is surfaced to the parent", arity_mismatch_is_surfaced()).await;
		run("marker alone is malformed", marker_alone_is_malformed()).await;
		run("failure rendering is a superset of the artifact", failure_rendering_superset()).await;
		run("panicking operation is captured", panicking_operation_is_captured()).await;
		run("environment reaches the child", environment_reaches_the_child()).await;
		run("unexpected exit code without artifact", unexpected_code_is_abnormal()).await;
		run("hanging child is killed on timeout", hanging_child_is_killed()).await;
		run("concurrent children are independent", concurrent_children()).await;
	});

	println!("all remote invocation scenarios passed");
}

async fn run(name: &str, scenario: impl Future<Output = ()>) {
	scenario.await;
	eprintln!("ok - {name}");
}

async fn round_trip_success() {
	remex::invoke(SET, "succeed-quietly", &[], InvokeOptions::default())
		.await
		.expect("no explicit code validates against the fixed success value");
}

async fn explicit_exit_code_matches() {
	let options = InvokeOptions::default().with_expected_exit_code(1);
	remex::invoke(SET, "ok-with-code-one", &["a", "b"], options)
		.await
		.expect("operation returned the expected code 1");
}

async fn arity_mismatch_is_surfaced() {
	let options = InvokeOptions::default().with_expected_exit_code(1);
	let err = remex::invoke(SET, "ok-with-code-one", &["a"], options)
		.await
		.expect_err("one argument for a two-argument operation");
	assert!(matches!(err, InvokeError::Failed { .. }), "got {err:?}");
	let rendered = err.to_string();
	assert!(
		rendered.contains("expected 2 arguments but got 1"),
		"rendering must identify the arity mismatch: {rendered}"
	);
}

async fn marker_alone_is_malformed() {
	let exe = std::env::current_exe().expect("current exe");
	let output = tokio::process::Command::new(exe)
		.arg(remex_proto::MARKER)
		.output()
		.await
		.expect("spawn child");
	assert_eq!(output.status.code(), Some(remex_proto::MALFORMED_EXIT_CODE));
	let stderr = String::from_utf8_lossy(&output.stderr);
	assert!(stderr.contains("usage:"), "stderr: {stderr}");
}

async fn failure_rendering_superset() {
	let mut handle = remex::start(SET, "fail-loudly", &["left", "right"], InvokeOptions::default())
		.expect("spawn");
	assert!(handle.process_id().is_some());

	let err = handle.wait_and_validate().await.expect_err("operation fails");
	let InvokeError::Failed { report, .. } = &err else {
		panic!("expected Failed, got {err:?}");
	};
	assert!(report.contains("fail-loudly"), "report: {report}");
	assert!(report.contains("boom: left / right"), "report: {report}");
	assert!(report.contains("left, right"), "args listed verbatim: {report}");
	assert!(
		err.to_string().contains(report.as_str()),
		"parent rendering embeds the child report"
	);
}

async fn panicking_operation_is_captured() {
	let err = remex::invoke(SET, "panic-op", &[], InvokeOptions::default())
		.await
		.expect_err("panic crashes the child");
	assert!(
		matches!(&err, InvokeError::Failed { report, .. } if report.contains("deliberate panic in child")),
		"got {err:?}"
	);
}

async fn environment_reaches_the_child() {
	let options = InvokeOptions::default()
		.with_expected_exit_code(9)
		.with_env("REMEX_E2E_TOKEN", "9");
	remex::invoke(SET, "echo-env", &[], options)
		.await
		.expect("child observed the injected environment");
}

async fn unexpected_code_is_abnormal() {
	let err = remex::invoke(SET, "exit-with", &["7"], InvokeOptions::default())
		.await
		.expect_err("7 does not match the default expectation");
	assert!(
		matches!(&err, InvokeError::Abnormal { observed, .. } if observed == "7"),
		"got {err:?}"
	);
	assert!(err.to_string().contains("terminated without reporting"));
}

async fn hanging_child_is_killed() {
	let started = Instant::now();
	let options = InvokeOptions::default().with_timeout(Duration::from_secs(2));
	let err = remex::invoke(SET, "hang", &[], options)
		.await
		.expect_err("hanging child must time out");
	assert!(matches!(err, InvokeError::Timeout { .. }), "got {err:?}");
	assert!(
		started.elapsed() < Duration::from_secs(30),
		"kill escalation must be bounded"
	);
}

async fn concurrent_children() {
	let a = remex::invoke(
		SET,
		"exit-with",
		&["3"],
		InvokeOptions::default().with_expected_exit_code(3),
	);
	let b = remex::invoke(SET, "succeed-quietly", &[], InvokeOptions::default());
	let c = remex::invoke(
		SET,
		"exit-with",
		&["5"],
		InvokeOptions::default().with_expected_exit_code(5),
	);

	let (a, b, c) = tokio::join!(a, b, c);
	a.expect("first child validates");
	b.expect("second child validates");
	c.expect("third child validates");
}
