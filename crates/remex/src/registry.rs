//! Process-wide operation registry.
//!
//! Maps an opaque string key to an operation: an expected argument count and
//! a callable taking string arguments and returning an optional exit code.
//! Operations arrive in [`OperationSet`]s collected through `inventory`;
//! nothing registers before [`activate`] runs for a set, so there is no
//! before-main magic to reason about.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::debug;

/// Callable form of a registered operation.
///
/// `Ok(None)` means "no explicit exit code, treat as success". Errors are
/// the operation's own failures and pass through the registry unmodified.
pub type OperationFn = dyn Fn(&[String]) -> anyhow::Result<Option<i32>> + Send + Sync;

struct Operation {
	arity: usize,
	invoke: Arc<OperationFn>,
}

static OPERATIONS: LazyLock<Mutex<HashMap<String, Operation>>> =
	LazyLock::new(|| Mutex::new(HashMap::new()));

/// Sets already activated. Held across a set's registration so activation
/// is exactly-once even under racing callers.
static ACTIVATED: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Registry faults: wiring errors, not operation failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
	/// A key was registered twice.
	#[error("operation key already registered: {0}")]
	DuplicateKey(String),
	/// Lookup of a key nothing registered.
	#[error("unknown operation key: {0}")]
	UnknownKey(String),
	/// The argument count does not match the operation's declared arity.
	#[error("for key '{key}', expected {expected} arguments but got {actual}")]
	ArityMismatch {
		/// Key of the looked-up operation.
		key: String,
		/// Declared argument count.
		expected: usize,
		/// Argument count actually supplied.
		actual: usize,
	},
	/// Activation of a set no [`OperationSet`] descriptor names.
	#[error("unknown operation set: {0}")]
	UnknownSet(String),
}

/// One group of operations, registered together.
///
/// Descriptors are submitted via `inventory::submit!` (by hand or by the
/// code-generation layer) and stay inert until [`activate`] is called with
/// their id.
pub struct OperationSet {
	/// Globally unique set identifier.
	pub id: &'static str,
	/// Registers every operation in the set. Must be deterministic.
	pub register: fn() -> Result<(), RegistryError>,
}

inventory::collect!(OperationSet);

/// Registers one operation under `key`.
pub fn register(
	key: impl Into<String>,
	arity: usize,
	invoke: impl Fn(&[String]) -> anyhow::Result<Option<i32>> + Send + Sync + 'static,
) -> Result<(), RegistryError> {
	let key = key.into();
	let mut table = OPERATIONS.lock();
	if table.contains_key(&key) {
		return Err(RegistryError::DuplicateKey(key));
	}
	debug!(key = %key, arity, "registering operation");
	table.insert(
		key,
		Operation {
			arity,
			invoke: Arc::new(invoke),
		},
	);
	Ok(())
}

/// Looks up `key` and invokes it with `args`.
///
/// Unknown keys and arity mismatches fail before the operation body runs.
/// The operation executes outside the table lock; its own error, if any,
/// propagates unmodified.
pub fn lookup_and_invoke(key: &str, args: &[String]) -> anyhow::Result<Option<i32>> {
	let (arity, invoke) = {
		let table = OPERATIONS.lock();
		let op = table
			.get(key)
			.ok_or_else(|| RegistryError::UnknownKey(key.to_string()))?;
		(op.arity, Arc::clone(&op.invoke))
	};

	if args.len() != arity {
		return Err(RegistryError::ArityMismatch {
			key: key.to_string(),
			expected: arity,
			actual: args.len(),
		}
		.into());
	}

	invoke(args)
}

/// Activates the operation set named `set_id`.
///
/// Runs the set's registration function exactly once per process; later
/// calls, racing ones included, are no-ops.
pub fn activate(set_id: &str) -> Result<(), RegistryError> {
	let mut activated = ACTIVATED.lock();
	if activated.contains(set_id) {
		return Ok(());
	}

	let set = inventory::iter::<OperationSet>
		.into_iter()
		.find(|s| s.id == set_id)
		.ok_or_else(|| RegistryError::UnknownSet(set_id.to_string()))?;

	debug!(set = %set.id, "activating operation set");
	(set.register)()?;
	activated.insert(set_id.to_string());
	Ok(())
}
