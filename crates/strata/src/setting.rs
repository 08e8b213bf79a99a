//! Typed setting handles.

use std::any::TypeId;
use std::sync::{Arc, OnceLock};

use crate::current;
use crate::error::Result;
use crate::key::{self, KeyDecl, KeyId, KeyKind, Value};

/// A scoped, write-once setting: an input of type `I` transformed into an
/// effective value of type `O`.
///
/// Declare settings as `static` items; the handle is const-constructible
/// and interns its key on first use, so every clone of a declaration site
/// names the same slot.
///
/// ```
/// use strata::Setting;
///
/// static SPEED: Setting<i64, f64> = Setting::declare("speed", || 16, |v| v as f64);
///
/// assert_eq!(SPEED.get(), 16.0);
/// ```
///
/// Inputs compare by `PartialEq` value equality: after the first read in a
/// frame, re-writing an equal input is an idempotent no-op while a
/// non-equal input is an `InputConflict`.
pub struct Setting<I: 'static, O: 'static> {
	name: &'static str,
	default: Option<fn() -> I>,
	transform: fn(I) -> O,
	id: OnceLock<KeyId>,
}

impl<I, O> Setting<I, O>
where
	I: Clone + PartialEq + core::fmt::Debug + Send + Sync + 'static,
	O: Clone + Send + Sync + 'static,
{
	/// Declares a setting with a default input.
	///
	/// Reading it never fails: where no frame provides an input, the
	/// default is installed into the chain's root and transformed there.
	pub const fn declare(name: &'static str, default: fn() -> I, transform: fn(I) -> O) -> Self {
		Setting {
			name,
			default: Some(default),
			transform,
			id: OnceLock::new(),
		}
	}

	/// Declares a setting with no default input.
	///
	/// [`Setting::try_get`] surfaces `MissingBinding` until some frame in
	/// the current chain provides an input.
	pub const fn declare_required(name: &'static str, transform: fn(I) -> O) -> Self {
		Setting {
			name,
			default: None,
			transform,
			id: OnceLock::new(),
		}
	}

	/// Diagnostic name of this setting.
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Interned key for this declaration site.
	pub fn key(&self) -> KeyId {
		*self.id.get_or_init(|| {
			let default = self.default;
			let transform = self.transform;
			key::declare(KeyDecl {
				name: self.name,
				kind: KeyKind::Setting,
				input_type: TypeId::of::<I>(),
				eq: |a, b| a.downcast_ref::<I>() == b.downcast_ref::<I>(),
				render: |value| match value.downcast_ref::<I>() {
					Some(value) => format!("{value:?}"),
					None => "<opaque>".to_string(),
				},
				default: default
					.map(|f| Arc::new(move || Arc::new(f()) as Value) as key::DefaultInput),
				transform: Arc::new(move |input: Value| {
					let input = input
						.downcast::<I>()
						.ok()
						.expect("setting input downcast failed despite declaration-time type check");
					Arc::new(transform(I::clone(&input))) as Value
				}),
			})
		})
	}

	/// Returns the effective value in the current state.
	///
	/// The first read through a frame that owns the input memoizes the
	/// transformed value there; later reads observe the memoized value.
	pub fn try_get(&self) -> Result<O> {
		let value = current::current().read_binding(self.key())?;
		let out = value
			.downcast::<O>()
			.ok()
			.expect("setting produced a value of an unexpected type");
		Ok(O::clone(&out))
	}

	/// Returns the effective value, panicking on a missing binding.
	///
	/// Infallible for settings declared with a default; for
	/// [`Setting::declare_required`] sites prefer [`Setting::try_get`].
	pub fn get(&self) -> O {
		self.try_get()
			.unwrap_or_else(|err| panic!("setting '{}' unreadable: {err}", self.name))
	}

	/// Writes `input` into the top frame of the current state.
	///
	/// Until the frame observes a read for this key, writes overwrite
	/// freely and the last one wins. Afterwards only an input equal to the
	/// fixed one is accepted.
	pub fn set(&self, input: I) -> Result<()> {
		current::current().write_input(self.key(), Arc::new(input))
	}
}

impl<I: 'static, O: 'static> core::fmt::Debug for Setting<I, O> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Setting").field("name", &self.name).finish()
	}
}
