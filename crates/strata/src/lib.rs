//! Scoped, write-once, task-switchable settings and services.
//!
//! Strata replaces process globals and ad-hoc thread locals with bindings
//! resolved through a chain of append-only frames. Each logical task owns
//! a current [`State`]; reads walk its frame chain from the top toward the
//! root, writes land in the top frame only, and the first read through the
//! frame that owns an input memoizes ("freezes") the computed value there.
//! Whole states can be pinned with [`snapshot`] and swapped back in with
//! [`restore`], which is all a cooperative runtime needs to switch tasks.
//!
//! # Example
//!
//! ```
//! use strata::{Setting, enter};
//!
//! static TAB_WIDTH: Setting<i64, i64> = Setting::declare("docs::tab_width", || 4, |v| v);
//!
//! assert_eq!(TAB_WIDTH.get(), 4);
//! {
//! 	let _scope = enter();
//! 	TAB_WIDTH.set(2).unwrap();
//! 	assert_eq!(TAB_WIDTH.get(), 2);
//! }
//! assert_eq!(TAB_WIDTH.get(), 4);
//! ```
//!
//! Writes are free until the owning frame observes a read; from then on
//! the input is fixed and only equal re-writes are accepted. Services
//! ([`Service`]) follow the same discipline with a factory as the input
//! and an `Arc` instance as the memoized value, plus frame-scoped
//! replacement of one service by another.

pub mod diagnostics;

mod current;
mod error;
mod frame;
mod key;
mod scope;
mod service;
mod setting;
mod state;

#[cfg(test)]
mod tests;

pub use current::{current, restore, set_current, snapshot};
pub use error::{ContextError, DynamicRuleReason, Result};
pub use key::{KeyId, KeyKind, KeyMeta, declared_keys, key_kind, key_name};
pub use scope::{ScopeGuard, activate, enter, isolate, with_frame, with_isolated};
pub use service::Service;
pub use setting::Setting;
pub use state::{Snapshot, State};
