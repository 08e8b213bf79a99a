//! Key identity and the global key table.
//!
//! A key is the stable identity of a bindable slot. Keys are interned:
//! declaring the same `(kind, name)` pair twice yields the same [`KeyId`],
//! so re-declaration is idempotent and identity survives handle clones.
//! The table also carries the per-key machinery the frame and state layers
//! dispatch through: input equality, diagnostic rendering, the default
//! input producer and the transform.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

/// Kind of slot a key binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
	/// A value computed from a write-once input by a transform.
	Setting,
	/// A singleton-per-state instance produced by a factory.
	Service,
	/// A service-shaped slot managed by an external resource subsystem.
	Resource,
}

/// Interned identity of a bindable slot.
///
/// Two ids compare equal iff they denote the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(u32);

/// Type-erased binding value as stored in frames.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Transform from an input value to the memoized output value.
pub(crate) type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Producer for a key's default input.
pub(crate) type DefaultInput = Arc<dyn Fn() -> Value + Send + Sync>;

/// Declaration record for one key (static input to [`declare`]).
pub(crate) struct KeyDecl {
	/// Diagnostic name; unique per kind.
	pub name: &'static str,
	/// What the slot binds.
	pub kind: KeyKind,
	/// Concrete type of the input values, for re-declaration checking.
	pub input_type: TypeId,
	/// Input equality used for write idempotence after a read.
	pub eq: fn(&Value, &Value) -> bool,
	/// Diagnostic rendering of an input value.
	pub render: fn(&Value) -> String,
	/// Default input, if the declaration carries one.
	pub default: Option<DefaultInput>,
	/// Transform applied to the effective input on first read.
	pub transform: Transform,
}

struct KeyTable {
	infos: Vec<KeyDecl>,
	by_name: HashMap<(KeyKind, &'static str), KeyId>,
}

static KEYS: LazyLock<RwLock<KeyTable>> = LazyLock::new(|| {
	RwLock::new(KeyTable {
		infos: Vec::new(),
		by_name: HashMap::new(),
	})
});

/// Interns a key declaration, returning the existing id if `(kind, name)`
/// was already declared.
pub(crate) fn declare(decl: KeyDecl) -> KeyId {
	let mut table = KEYS.write();
	if let Some(&id) = table.by_name.get(&(decl.kind, decl.name)) {
		debug_assert_eq!(
			table.infos[id.0 as usize].input_type,
			decl.input_type,
			"key '{}' re-declared with a different input type",
			decl.name
		);
		return id;
	}
	let id = KeyId(u32::try_from(table.infos.len()).expect("key table overflow"));
	table.by_name.insert((decl.kind, decl.name), id);
	table.infos.push(decl);
	tracing::trace!(key = table.infos[id.0 as usize].name, id = id.0, "key.declare");
	id
}

/// Returns the diagnostic name of a key.
pub fn key_name(id: KeyId) -> &'static str {
	KEYS.read().infos[id.0 as usize].name
}

/// Returns the kind of a key.
pub fn key_kind(id: KeyId) -> KeyKind {
	KEYS.read().infos[id.0 as usize].kind
}

pub(crate) fn input_eq(id: KeyId, a: &Value, b: &Value) -> bool {
	(KEYS.read().infos[id.0 as usize].eq)(a, b)
}

pub(crate) fn render_input(id: KeyId, value: &Value) -> String {
	(KEYS.read().infos[id.0 as usize].render)(value)
}

/// Clones the transform out of the table so it can be invoked without
/// holding the table lock (transforms may declare further keys).
pub(crate) fn transform(id: KeyId) -> Transform {
	Arc::clone(&KEYS.read().infos[id.0 as usize].transform)
}

/// Produces the declared default input, if any.
///
/// The producer runs after the table lock is released: defaults are user
/// code and may themselves declare keys.
pub(crate) fn default_input(id: KeyId) -> Option<Value> {
	let producer = KEYS.read().infos[id.0 as usize].default.clone();
	producer.map(|f| f())
}

/// Metadata row returned by [`declared_keys`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMeta {
	/// Interned id.
	pub id: KeyId,
	/// Diagnostic name.
	pub name: &'static str,
	/// Slot kind.
	pub kind: KeyKind,
}

/// Returns every key declared so far, in declaration order.
pub fn declared_keys() -> Vec<KeyMeta> {
	KEYS.read()
		.infos
		.iter()
		.enumerate()
		.map(|(i, info)| KeyMeta {
			id: KeyId(i as u32),
			name: info.name,
			kind: info.kind,
		})
		.collect()
}
