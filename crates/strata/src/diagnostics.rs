//! Runtime inspection of the current context.
//!
//! Reports are plain data so callers can render them however they like;
//! the `Display` impl produces a line-per-binding dump for logs and REPLs.

use std::sync::Arc;

use crate::current;
use crate::key::{self, KeyKind};

/// One binding slot as seen in one frame.
#[derive(Debug, Clone)]
pub struct BindingReport {
	/// Diagnostic name of the key.
	pub key: &'static str,
	/// Slot kind.
	pub kind: KeyKind,
	/// Whether the frame has memoized (frozen) the binding.
	pub frozen: bool,
}

/// One frame of the current chain.
#[derive(Debug, Clone)]
pub struct FrameReport {
	/// Distance from the root frame.
	pub depth: usize,
	/// Bindings recorded in this frame, sorted by key name.
	pub bindings: Vec<BindingReport>,
	/// Replacement edges recorded in this frame, sorted by source name.
	pub replacements: Vec<(&'static str, &'static str)>,
}

/// Snapshot of the current thread's frame chain, top frame first.
#[derive(Debug, Clone)]
pub struct StateReport {
	/// Frames from top to root.
	pub frames: Vec<FrameReport>,
}

impl StateReport {
	/// Number of frames in the chain.
	pub fn depth(&self) -> usize {
		self.frames.len()
	}

	/// Number of frames holding a frozen binding for `key`.
	///
	/// Always 0 or 1 for a well-formed chain: memoization happens in the
	/// single frame that owns the input.
	pub fn frozen_count(&self, key: &str) -> usize {
		self.frames
			.iter()
			.filter(|frame| frame.bindings.iter().any(|b| b.key == key && b.frozen))
			.count()
	}
}

impl core::fmt::Display for StateReport {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		writeln!(f, "state: {} frame(s)", self.frames.len())?;
		for frame in &self.frames {
			writeln!(f, "frame {}:", frame.depth)?;
			for binding in &frame.bindings {
				writeln!(
					f,
					"\t{} [{:?}] {}",
					binding.key,
					binding.kind,
					if binding.frozen { "frozen" } else { "pending" }
				)?;
			}
			for (from, to) in &frame.replacements {
				writeln!(f, "\t{from} -> {to}")?;
			}
		}
		Ok(())
	}
}

/// Walks the current thread's chain and reports every recorded binding.
pub fn state_report() -> StateReport {
	let mut frames = Vec::new();
	let mut frame = current::current().top();
	loop {
		let mut bindings: Vec<BindingReport> = frame
			.bound_keys()
			.into_iter()
			.map(|(id, frozen)| BindingReport {
				key: key::key_name(id),
				kind: key::key_kind(id),
				frozen,
			})
			.collect();
		bindings.sort_by_key(|binding| binding.key);
		let mut replacements: Vec<(&'static str, &'static str)> = frame
			.replacement_edges()
			.into_iter()
			.map(|(from, to)| (key::key_name(from), key::key_name(to)))
			.collect();
		replacements.sort();
		frames.push(FrameReport {
			depth: frame.depth(),
			bindings,
			replacements,
		});
		match frame.parent() {
			Some(parent) => frame = Arc::clone(parent),
			None => break,
		}
	}
	StateReport { frames }
}
