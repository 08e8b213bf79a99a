//! Error types for context operations.

use thiserror::Error;

/// Detail carried by [`ContextError::DynamicRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicRuleReason {
	/// Replacement resolution for the named key revisited a key it had
	/// already followed.
	ReplacementCycle {
		/// Name of the key whose resolution cycled.
		key: &'static str,
	},
	/// The target state is entered by a scope guard on another thread.
	ForeignRestore,
}

impl core::fmt::Display for DynamicRuleReason {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			Self::ReplacementCycle { key } => {
				write!(f, "replacement cycle while resolving '{key}'")
			}
			Self::ForeignRestore => write!(f, "state is entered by a scope guard on another thread"),
		}
	}
}

/// Errors surfaced by the context core.
///
/// Protocol violations (`InputConflict`, `DynamicRule`) are programmer
/// errors and are never retried by the core. Failures inside user-supplied
/// transforms and factories are not represented here: they unwind through
/// the read unchanged, leaving the frame without a memoized value so a
/// later read retries the computation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
	/// Write-once violation: a frame that has observed a read for a key
	/// rejected a non-equal input (or replacement) for it.
	#[error("write-once violation for '{key}': existing {existing}, attempted {attempted}")]
	InputConflict {
		/// Name of the key the write targeted.
		key: &'static str,
		/// Rendering of the input already fixed in the frame.
		existing: String,
		/// Rendering of the rejected input.
		attempted: String,
	},

	/// A dynamic rule of the context machine was violated.
	#[error("dynamic rule violation: {reason}")]
	DynamicRule {
		/// What was violated.
		reason: DynamicRuleReason,
	},

	/// Read of a key with no declared default and no frame-provided input.
	///
	/// Indicates a declaration bug: a required setting or abstract service
	/// was read before anything bound it.
	#[error("no input or default bound for '{key}'")]
	MissingBinding {
		/// Name of the unresolvable key.
		key: &'static str,
	},
}

/// Result type for context operations.
pub type Result<T> = std::result::Result<T, ContextError>;
