//! Typed service handles and replacement.

use std::any::TypeId;
use std::sync::{Arc, OnceLock};

use crate::current;
use crate::error::Result;
use crate::key::{self, KeyDecl, KeyId, KeyKind, Value};

/// Factory input for a service slot.
///
/// Factories compare by identity: the `Arc` installed by one
/// [`Service::set_factory`] call is one input, so a frame accepts exactly
/// one factory assignment before the first read.
struct Factory<T: ?Sized>(Box<dyn Fn() -> Arc<T> + Send + Sync>);

/// A singleton-per-state service: an instance of `T` produced lazily by a
/// factory and memoized in the frame that fixes the factory input.
///
/// `T` may be a trait object, which is what makes replacement useful:
///
/// ```
/// use std::sync::Arc;
/// use strata::Service;
///
/// trait Greeter: Send + Sync {
/// 	fn greet(&self) -> String;
/// }
///
/// struct Plain;
/// impl Greeter for Plain {
/// 	fn greet(&self) -> String {
/// 		"hello".to_string()
/// 	}
/// }
///
/// static GREETER: Service<dyn Greeter> = Service::declare("greeter", || Arc::new(Plain));
///
/// assert_eq!(GREETER.current().greet(), "hello");
/// ```
///
/// Repeated reads within one frame-fix return the same `Arc` instance.
/// Each thread's lazily-created state resolves its own instance.
pub struct Service<T: ?Sized + 'static> {
	name: &'static str,
	kind: KeyKind,
	default: Option<fn() -> Arc<T>>,
	id: OnceLock<KeyId>,
}

impl<T> Service<T>
where
	T: ?Sized + Send + Sync + 'static,
{
	/// Declares a service with a default factory.
	pub const fn declare(name: &'static str, factory: fn() -> Arc<T>) -> Self {
		Service {
			name,
			kind: KeyKind::Service,
			default: Some(factory),
			id: OnceLock::new(),
		}
	}

	/// Declares a service with no default factory.
	///
	/// Resolution requires a frame-assigned factory or a replacement
	/// pointing at a concrete service; until then reads surface
	/// `MissingBinding`.
	pub const fn declare_abstract(name: &'static str) -> Self {
		Service {
			name,
			kind: KeyKind::Service,
			default: None,
			id: OnceLock::new(),
		}
	}

	/// Declares a resource slot.
	///
	/// Resources follow the service lookup contract exactly; the
	/// registration/notification lifecycle layered on top of them belongs
	/// to the consuming subsystem, not the core.
	pub const fn declare_resource(name: &'static str, factory: fn() -> Arc<T>) -> Self {
		Service {
			name,
			kind: KeyKind::Resource,
			default: Some(factory),
			id: OnceLock::new(),
		}
	}

	/// Diagnostic name of this service.
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Interned key for this declaration site.
	pub fn key(&self) -> KeyId {
		*self.id.get_or_init(|| {
			let default = self.default;
			key::declare(KeyDecl {
				name: self.name,
				kind: self.kind,
				input_type: TypeId::of::<Factory<T>>(),
				// Factories compare by identity, not structure.
				eq: |a, b| Arc::ptr_eq(a, b),
				render: |value| format!("<factory {:p}>", Arc::as_ptr(value)),
				default: default.map(|f| {
					Arc::new(move || Arc::new(Factory::<T>(Box::new(f))) as Value)
						as key::DefaultInput
				}),
				transform: Arc::new(|input: Value| {
					let factory = input
						.downcast::<Factory<T>>()
						.ok()
						.expect("service input downcast failed despite declaration-time type check");
					let instance: Arc<T> = (factory.0)();
					Arc::new(instance) as Value
				}),
			})
		})
	}

	/// Resolves the current instance, following replacements.
	///
	/// The replacement chain is re-resolved on every read; only the
	/// factory input of the canonical key is frozen by memoization.
	pub fn try_current(&self) -> Result<Arc<T>> {
		let value = current::current().read_service(self.key())?;
		let instance = value
			.downcast::<Arc<T>>()
			.ok()
			.expect("service instance of an unexpected type");
		Ok(Arc::clone(&*instance))
	}

	/// Resolves the current instance, panicking on a missing binding.
	///
	/// Missing bindings indicate a declaration bug (an unsatisfied
	/// abstract service); recoverable callers use
	/// [`Service::try_current`]. Shared access goes through the returned
	/// `Arc` — there is no way to rebind the slot by assigning through it.
	pub fn current(&self) -> Arc<T> {
		self.try_current()
			.unwrap_or_else(|err| panic!("service '{}' unresolvable: {err}", self.name))
	}

	/// Runs `f` against the current instance.
	pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
		let instance = self.current();
		f(instance.as_ref())
	}

	/// Chooses the factory for this service in the top frame.
	///
	/// Factory inputs compare by identity, so a frame accepts one factory
	/// assignment; after the frame has observed a read, reassignment is an
	/// `InputConflict`.
	pub fn set_factory(&self, factory: impl Fn() -> Arc<T> + Send + Sync + 'static) -> Result<()> {
		current::current().write_input(self.key(), Arc::new(Factory::<T>(Box::new(factory))))
	}

	/// Declares this service a replacement for `original`.
	///
	/// Installs the redirection `original -> self` in the top frame of the
	/// current state; reads of `original` in this frame and its
	/// descendants resolve here until the frame exits.
	pub fn replaces(&self, original: &Service<T>) -> Result<()> {
		current::current().install_replacement(original.key(), self.key())
	}
}

impl<T: ?Sized + 'static> core::fmt::Debug for Service<T> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Service")
			.field("name", &self.name)
			.field("kind", &self.kind)
			.finish()
	}
}
