//! Run a registered operation inside a freshly spawned child process.
//!
//! Some behavior can only be exercised in a process of its own: mutation of
//! process-wide state, deliberate crashes, environment isolation. remex lets
//! a test start a child that looks up a named operation, runs it, and
//! reports the outcome back over the only channels a process boundary
//! offers: the OS exit code and a one-shot failure artifact on disk.
//!
//! The three pieces:
//!
//! - [`registry`] - process-wide table of invokable operations, populated
//!   by explicitly activated operation sets.
//! - [`child`] - the entry point executed inside the spawned child.
//! - [`invoke`] - the parent-side controller that spawns, waits, validates,
//!   and surfaces child failures.
//!
//! A binary participates as a child by routing its `main` through
//! [`child::try_main`]; the marker token decides whether the process runs
//! remotely or standalone, so the same executable can do both.

pub mod child;
pub mod invoke;
pub mod registry;

pub use invoke::{InvocationHandle, InvokeError, InvokeOptions, invoke, start};
pub use registry::{OperationSet, RegistryError};
pub use remex_proto::{MARKER, SUCCESS_EXIT_CODE};
