//! States: the frame chain one logical task resolves against.
//!
//! A state is a swappable pointer to the top of a frame chain. Reads walk
//! the chain from top toward root; writes land in the top frame only.
//! Because frames are append-only and keep their parents alive, pinning a
//! state is a single `Arc` clone of the top frame — that is all a
//! [`Snapshot`] is.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ContextError, DynamicRuleReason, Result};
use crate::frame::Frame;
use crate::key::{self, KeyId, Value};

/// Handle to one logical task's frame chain.
///
/// Cheap to clone; clones share the same swappable top pointer. A state is
/// owned by exactly one logical task at a time — the core does not
/// serialize concurrent use of a single state, it only detects restores
/// into a guard-entered chain (see [`crate::restore`]).
#[derive(Clone)]
pub struct State {
	inner: Arc<StateInner>,
}

struct StateInner {
	top: RwLock<Arc<Frame>>,
}

impl State {
	/// Creates a state with a single fresh root frame, inheriting nothing.
	pub(crate) fn new_root() -> State {
		State {
			inner: Arc::new(StateInner {
				top: RwLock::new(Frame::root()),
			}),
		}
	}

	/// Creates a state resuming the chain pinned by `snapshot`.
	pub(crate) fn from_snapshot(snapshot: &Snapshot) -> State {
		State {
			inner: Arc::new(StateInner {
				top: RwLock::new(Arc::clone(&snapshot.top)),
			}),
		}
	}

	/// Pins the current frame chain.
	pub fn snapshot(&self) -> Snapshot {
		Snapshot {
			top: self.top(),
		}
	}

	/// Number of frames in the chain.
	pub fn depth(&self) -> usize {
		self.top().depth() + 1
	}

	pub(crate) fn top(&self) -> Arc<Frame> {
		Arc::clone(&self.inner.top.read())
	}

	/// Pushes a fresh empty child frame and returns it.
	pub(crate) fn push_child(&self) -> Arc<Frame> {
		let mut top = self.inner.top.write();
		let child = Frame::child(&top);
		*top = Arc::clone(&child);
		tracing::trace!(depth = child.depth(), "frame.push");
		child
	}

	/// Swaps the top frame, returning the previous one.
	pub(crate) fn swap_top(&self, frame: Arc<Frame>) -> Arc<Frame> {
		std::mem::replace(&mut *self.inner.top.write(), frame)
	}

	/// Writes `value` as the input for `key` in the top frame.
	///
	/// Writes never descend into parent frames.
	pub(crate) fn write_input(&self, key: KeyId, value: Value) -> Result<()> {
		self.top().write_input(key, value)
	}

	/// Records a service redirection in the top frame.
	pub(crate) fn install_replacement(&self, from: KeyId, to: KeyId) -> Result<()> {
		self.top().install_replacement(from, to)
	}

	/// Resolves the effective value for `key` along the chain.
	///
	/// The nearest frame with an input for the key hosts the computation;
	/// if no frame has one, the declared default is installed into the
	/// chain's root and computed there. A successful read also marks the
	/// top frame as having observed the key, which closes it to later
	/// replacement installs. The transform runs without any lock held, so
	/// it may reenter the context machinery.
	pub(crate) fn read_binding(&self, key: KeyId) -> Result<Value> {
		let top = self.top();
		let value = resolve_chain(&top, key)?;
		top.note_read(key);
		Ok(value)
	}

	/// Resolves a service key through the replacement tables and reads it.
	pub(crate) fn read_service(&self, key: KeyId) -> Result<Value> {
		let canonical = self.resolve_key(key)?;
		let value = self.read_binding(canonical)?;
		// A redirected read still counts as a read of the requested key
		// for the frame it was dispatched through.
		if canonical != key {
			self.top().note_read(key);
		}
		Ok(value)
	}

	/// Walks replacements top-to-root until a fixed point, restarting the
	/// walk from the top after each hop.
	///
	/// Cycles are detected lazily here rather than at install time, since
	/// redirections may be spread across arbitrary frames of the chain.
	pub(crate) fn resolve_key(&self, key: KeyId) -> Result<KeyId> {
		let top = self.top();
		let mut canonical = key;
		let mut seen = vec![key];
		'resolve: loop {
			let mut frame = Arc::clone(&top);
			loop {
				if let Some(next) = frame.replacement_for(canonical) {
					if seen.contains(&next) {
						return Err(ContextError::DynamicRule {
							reason: DynamicRuleReason::ReplacementCycle {
								key: key::key_name(key),
							},
						});
					}
					seen.push(next);
					canonical = next;
					continue 'resolve;
				}
				match frame.parent() {
					Some(parent) => frame = Arc::clone(parent),
					None => break,
				}
			}
			return Ok(canonical);
		}
	}

	/// True if restoring this state on the current thread would cross a
	/// live scope guard owned by another thread.
	pub(crate) fn entered_elsewhere(&self) -> bool {
		self.top().entered_elsewhere()
	}

	/// Identity comparison: two handles naming the same swappable state.
	pub fn ptr_eq(a: &State, b: &State) -> bool {
		Arc::ptr_eq(&a.inner, &b.inner)
	}
}

impl core::fmt::Debug for State {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("State").field("depth", &self.depth()).finish()
	}
}

fn resolve_chain(top: &Arc<Frame>, key: KeyId) -> Result<Value> {
	let mut frame = Arc::clone(top);
	loop {
		if let Some(out) = frame.lookup_computed(key) {
			return Ok(out);
		}
		if let Some(input) = frame.lookup_input(key) {
			return compute_into(&frame, key, input);
		}
		match frame.parent() {
			Some(parent) => frame = Arc::clone(parent),
			None => break,
		}
	}
	// `frame` is now the chain root; fall back to the declared default.
	let Some(default) = key::default_input(key) else {
		return Err(ContextError::MissingBinding {
			key: key::key_name(key),
		});
	};
	frame.write_input(key, Arc::clone(&default))?;
	compute_into(&frame, key, default)
}

fn compute_into(frame: &Arc<Frame>, key: KeyId, input: Value) -> Result<Value> {
	let transform = key::transform(key);
	let out = transform(input);
	Ok(frame.freeze(key, out))
}

/// Opaque handle pinning a frame chain for later restoration.
///
/// Snapshots compare equal iff they pin the same top frame.
#[derive(Clone)]
pub struct Snapshot {
	top: Arc<Frame>,
}

impl PartialEq for Snapshot {
	fn eq(&self, other: &Snapshot) -> bool {
		Arc::ptr_eq(&self.top, &other.top)
	}
}

impl Eq for Snapshot {}

impl core::fmt::Debug for Snapshot {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Snapshot").field("depth", &self.top.depth()).finish()
	}
}
