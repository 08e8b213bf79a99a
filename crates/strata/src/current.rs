//! The per-thread current-state registry.
//!
//! Each OS thread owns one current [`State`], created lazily on first use.
//! Cooperative runtimes switch logical tasks within a thread by swapping
//! states through [`snapshot`]/[`restore`] at their yield points; the core
//! imposes no scheduling policy of its own.

use std::cell::RefCell;

use crate::error::{ContextError, DynamicRuleReason, Result};
use crate::state::{Snapshot, State};

thread_local! {
	static CURRENT: RefCell<Option<State>> = const { RefCell::new(None) };
}

/// Returns the current thread's state, creating a single-frame root state
/// on first use.
pub fn current() -> State {
	CURRENT.with(|slot| {
		let mut slot = slot.borrow_mut();
		match &*slot {
			Some(state) => state.clone(),
			None => {
				let state = State::new_root();
				tracing::debug!("state.init");
				*slot = Some(state.clone());
				state
			}
		}
	})
}

/// Makes `state` current for this thread, returning the previous state.
///
/// Fails with [`DynamicRuleReason::ForeignRestore`] if the target chain is
/// held open by a scope guard on another thread: ownership of a state
/// transfers only at well-defined swap points, never by stealing.
pub fn set_current(state: State) -> Result<State> {
	if state.entered_elsewhere() {
		return Err(ContextError::DynamicRule {
			reason: DynamicRuleReason::ForeignRestore,
		});
	}
	let previous = current();
	CURRENT.with(|slot| *slot.borrow_mut() = Some(state));
	tracing::debug!("state.swap");
	Ok(previous)
}

/// Unchecked slot install for guard unwind paths.
///
/// Guard drops must always restore the state they displaced, so this skips
/// the foreign-restore check that [`set_current`] applies.
pub(crate) fn install_current(state: State) -> Option<State> {
	CURRENT.with(|slot| slot.borrow_mut().replace(state))
}

/// Pins the current thread's frame chain.
pub fn snapshot() -> Snapshot {
	current().snapshot()
}

/// Resumes the chain pinned by `snapshot` on this thread.
///
/// Returns a snapshot of the state that was current, for restoring later.
/// With no intervening writes, `restore(&snapshot())` is a no-op with
/// respect to all subsequent reads.
pub fn restore(snapshot: &Snapshot) -> Result<Snapshot> {
	let previous = set_current(State::from_snapshot(snapshot))?;
	Ok(previous.snapshot())
}
