//! Append-only binding frames.
//!
//! A frame is one layer of bindings plus a link to its parent. Under the
//! public API a frame is observably append-only: inputs may be rewritten
//! freely until the frame observes a read for the key (the freeze point),
//! after which the input is final and only equal re-writes are accepted.
//! There is no remove operation.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use crate::error::{ContextError, Result};
use crate::key::{self, KeyId, Value};

/// Binding slot for one key within one frame.
struct Slot {
	/// Write-side value. Final once `computed` is populated.
	input: Value,
	/// Memoized output, present once the frame has observed a read.
	computed: Option<Value>,
}

/// One immutable layer of bindings.
///
/// `parent` never changes after construction; the slot and replacement
/// maps admit controlled mutation under the write-once rule. Frames are
/// shared across snapshots, so all interior mutation is lock-guarded.
pub(crate) struct Frame {
	parent: Option<Arc<Frame>>,
	depth: usize,
	slots: RwLock<HashMap<KeyId, Slot>>,
	replacements: RwLock<HashMap<KeyId, KeyId>>,
	/// Keys whose reads were dispatched while this frame was the top of
	/// its chain, wherever the memoized value landed. Gates replacement
	/// installs the way `computed` gates inputs.
	observed: RwLock<HashSet<KeyId>>,
	/// Thread that created this frame through a live scope guard.
	entered_by: Mutex<Option<ThreadId>>,
}

impl Frame {
	/// Creates a root frame with no parent.
	pub(crate) fn root() -> Arc<Frame> {
		Arc::new(Frame {
			parent: None,
			depth: 0,
			slots: RwLock::new(HashMap::new()),
			replacements: RwLock::new(HashMap::new()),
			observed: RwLock::new(HashSet::new()),
			entered_by: Mutex::new(None),
		})
	}

	/// Creates an empty child layered over `parent`.
	pub(crate) fn child(parent: &Arc<Frame>) -> Arc<Frame> {
		Arc::new(Frame {
			parent: Some(Arc::clone(parent)),
			depth: parent.depth + 1,
			slots: RwLock::new(HashMap::new()),
			replacements: RwLock::new(HashMap::new()),
			observed: RwLock::new(HashSet::new()),
			entered_by: Mutex::new(None),
		})
	}

	pub(crate) fn parent(&self) -> Option<&Arc<Frame>> {
		self.parent.as_ref()
	}

	pub(crate) fn depth(&self) -> usize {
		self.depth
	}

	/// Returns the input bound in this frame, without consulting parents.
	pub(crate) fn lookup_input(&self, key: KeyId) -> Option<Value> {
		self.slots.read().get(&key).map(|slot| Arc::clone(&slot.input))
	}

	/// Returns the memoized output if this frame has one for `key`.
	pub(crate) fn lookup_computed(&self, key: KeyId) -> Option<Value> {
		self.slots
			.read()
			.get(&key)
			.and_then(|slot| slot.computed.as_ref().map(Arc::clone))
	}

	/// Installs `value` as the input for `key`.
	///
	/// Until the frame observes a read for `key`, writes overwrite freely
	/// and the last one wins. Once the key is frozen here, an equal write
	/// is an idempotent no-op and a non-equal write is an
	/// [`ContextError::InputConflict`].
	pub(crate) fn write_input(&self, key: KeyId, value: Value) -> Result<()> {
		let mut slots = self.slots.write();
		match slots.entry(key) {
			Entry::Occupied(mut entry) => {
				let slot = entry.get_mut();
				if slot.computed.is_some() {
					if key::input_eq(key, &slot.input, &value) {
						return Ok(());
					}
					let conflict = ContextError::InputConflict {
						key: key::key_name(key),
						existing: key::render_input(key, &slot.input),
						attempted: key::render_input(key, &value),
					};
					tracing::debug!(key = key::key_name(key), depth = self.depth, "binding.conflict");
					return Err(conflict);
				}
				slot.input = value;
				Ok(())
			}
			Entry::Vacant(entry) => {
				entry.insert(Slot {
					input: value,
					computed: None,
				});
				tracing::trace!(key = key::key_name(key), depth = self.depth, "binding.write");
				Ok(())
			}
		}
	}

	/// Records the memoized output for `key`, freezing its input.
	///
	/// The first completed computation wins: if a reentrant read already
	/// froze the key, that value is kept and returned so every caller
	/// observes the memoized output.
	pub(crate) fn freeze(&self, key: KeyId, out: Value) -> Value {
		let mut slots = self.slots.write();
		let slot = slots
			.get_mut(&key)
			.expect("freeze for a key this frame has no input for");
		match &slot.computed {
			Some(existing) => Arc::clone(existing),
			None => {
				slot.computed = Some(Arc::clone(&out));
				tracing::trace!(key = key::key_name(key), depth = self.depth, "binding.freeze");
				out
			}
		}
	}

	/// Marks that a read of `key` was dispatched while this frame was the
	/// top of its chain.
	pub(crate) fn note_read(&self, key: KeyId) {
		self.observed.write().insert(key);
	}

	/// Records a redirection `from -> to` for service resolution.
	///
	/// Subject to the write-once discipline: a frame may no longer
	/// redirect `from` once it has observed a read of it — memoized here,
	/// or resolved while this frame was current with the value frozen in
	/// an ancestor. A second differing redirection for the same key also
	/// conflicts.
	pub(crate) fn install_replacement(&self, from: KeyId, to: KeyId) -> Result<()> {
		let read_here = self.observed.read().contains(&from)
			|| self
				.slots
				.read()
				.get(&from)
				.is_some_and(|slot| slot.computed.is_some());
		if read_here {
			return Err(ContextError::InputConflict {
				key: key::key_name(from),
				existing: "<observed binding>".to_string(),
				attempted: key::key_name(to).to_string(),
			});
		}
		let mut replacements = self.replacements.write();
		match replacements.entry(from) {
			Entry::Occupied(entry) => {
				if *entry.get() == to {
					return Ok(());
				}
				Err(ContextError::InputConflict {
					key: key::key_name(from),
					existing: key::key_name(*entry.get()).to_string(),
					attempted: key::key_name(to).to_string(),
				})
			}
			Entry::Vacant(entry) => {
				entry.insert(to);
				tracing::trace!(
					from = key::key_name(from),
					to = key::key_name(to),
					depth = self.depth,
					"replacement.install"
				);
				Ok(())
			}
		}
	}

	/// Returns the redirection target this frame records for `key`, if any.
	pub(crate) fn replacement_for(&self, key: KeyId) -> Option<KeyId> {
		self.replacements.read().get(&key).copied()
	}

	pub(crate) fn mark_entered(&self) {
		*self.entered_by.lock() = Some(thread::current().id());
	}

	pub(crate) fn clear_entered(&self) {
		*self.entered_by.lock() = None;
	}

	/// True if a live scope guard on another thread created this frame.
	pub(crate) fn entered_elsewhere(&self) -> bool {
		self.entered_by
			.lock()
			.is_some_and(|tid| tid != thread::current().id())
	}

	/// Bound keys of this frame with their freeze status, for diagnostics.
	pub(crate) fn bound_keys(&self) -> Vec<(KeyId, bool)> {
		self.slots
			.read()
			.iter()
			.map(|(key, slot)| (*key, slot.computed.is_some()))
			.collect()
	}

	/// Redirection edges recorded in this frame, for diagnostics.
	pub(crate) fn replacement_edges(&self) -> Vec<(KeyId, KeyId)> {
		self.replacements
			.read()
			.iter()
			.map(|(from, to)| (*from, *to))
			.collect()
	}
}

impl core::fmt::Debug for Frame {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Frame")
			.field("depth", &self.depth)
			.field("bindings", &self.slots.read().len())
			.finish()
	}
}
