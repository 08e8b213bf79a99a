//! Scoped acquisition of frames and states.
//!
//! Guards pair a push with its pop (or a swap with its restore) on every
//! exit path. Nesting is LIFO; dropping guards out of order trips a debug
//! assertion, mirroring the append-only discipline of the frames they
//! manage.

use std::sync::Arc;

use crate::current;
use crate::error::Result;
use crate::frame::Frame;
use crate::state::{Snapshot, State};

enum Action {
	/// Pop the pushed frame, restoring its parent as top.
	Pop {
		state: State,
		pushed: Arc<Frame>,
		parent: Arc<Frame>,
	},
	/// Reinstall the displaced state after an isolated scope.
	Swap {
		previous: State,
		entered: Arc<Frame>,
	},
	/// Reinstall the displaced state after a snapshot activation.
	Activate { previous: State },
}

/// Guard restoring the context exactly as it was at acquisition.
#[must_use = "dropping the guard immediately exits the scope it opened"]
pub struct ScopeGuard {
	action: Action,
}

/// Pushes a fresh empty child frame onto the current state.
///
/// The frame is locked to this thread for the guard's lifetime: restoring
/// a snapshot of it from another thread fails until the guard drops.
pub fn enter() -> ScopeGuard {
	let state = current::current();
	let parent = state.top();
	let pushed = state.push_child();
	pushed.mark_entered();
	ScopeGuard {
		action: Action::Pop {
			state,
			pushed,
			parent,
		},
	}
}

/// Swaps in a state with a single fresh root frame, inheriting nothing.
///
/// Intended for test isolation; the previous state returns when the guard
/// drops.
pub fn isolate() -> ScopeGuard {
	let previous = current::current();
	let fresh = State::new_root();
	let entered = fresh.top();
	entered.mark_entered();
	current::install_current(fresh);
	tracing::trace!("state.isolate");
	ScopeGuard {
		action: Action::Swap { previous, entered },
	}
}

/// Resumes the chain pinned by `snapshot` for the guard's lifetime.
///
/// Guard form of [`crate::restore`]: the displaced state comes back when
/// the guard drops. Fails like `restore` does if the chain is held open by
/// a guard on another thread.
pub fn activate(snapshot: &Snapshot) -> Result<ScopeGuard> {
	let previous = current::set_current(State::from_snapshot(snapshot))?;
	Ok(ScopeGuard {
		action: Action::Activate { previous },
	})
}

impl Drop for ScopeGuard {
	fn drop(&mut self) {
		match &self.action {
			Action::Pop {
				state,
				pushed,
				parent,
			} => {
				pushed.clear_entered();
				let popped = state.swap_top(Arc::clone(parent));
				debug_assert!(
					Arc::ptr_eq(&popped, pushed),
					"scope guards dropped out of LIFO order"
				);
				tracing::trace!(depth = parent.depth(), "frame.pop");
			}
			Action::Swap { previous, entered } => {
				entered.clear_entered();
				current::install_current(previous.clone());
			}
			Action::Activate { previous } => {
				current::install_current(previous.clone());
			}
		}
	}
}

/// Runs `f` inside a fresh child frame.
pub fn with_frame<R>(f: impl FnOnce() -> R) -> R {
	let _guard = enter();
	f()
}

/// Runs `f` inside a fresh isolated state.
pub fn with_isolated<R>(f: impl FnOnce() -> R) -> R {
	let _guard = isolate();
	f()
}

impl Snapshot {
	/// Runs `f` with this snapshot's chain installed as the current state.
	///
	/// The integration point for cooperative runtimes: switch at a yield
	/// point by running the next task's turn under its snapshot.
	pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
		let _guard = activate(self)?;
		Ok(f())
	}
}
