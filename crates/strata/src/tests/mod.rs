//! End-to-end scenarios through the public surface.
//!
//! Unit tests live next to the modules they cover; these exercise the
//! user-visible contracts: scoped defaults, write-once freezing, service
//! instances and replacement, and snapshot-based task switching.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::{
	ContextError, DynamicRuleReason, KeyKind, Service, Setting, diagnostics, enter, isolate,
	key_kind, restore, snapshot,
};

#[derive(Debug, Default)]
struct Counter {
	hits: AtomicI64,
}

impl Counter {
	fn inc(&self) {
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	fn value(&self) -> i64 {
		self.hits.load(Ordering::Relaxed)
	}
}

trait Tally: Send + Sync {
	fn inc(&self);
	fn value(&self) -> i64;
}

struct StepTally {
	step: i64,
	hits: AtomicI64,
}

impl StepTally {
	fn with_step(step: i64) -> StepTally {
		StepTally {
			step,
			hits: AtomicI64::new(0),
		}
	}
}

impl Tally for StepTally {
	fn inc(&self) {
		self.hits.fetch_add(self.step, Ordering::Relaxed);
	}

	fn value(&self) -> i64 {
		self.hits.load(Ordering::Relaxed)
	}
}

#[test]
fn test_setting_default_child_override() {
	static SPEED: Setting<i64, f64> =
		Setting::declare("scenario::speed.basic", || 16, |v| v as f64);
	let _iso = isolate();

	assert_eq!(SPEED.get(), 16.0);
	{
		let _scope = enter();
		SPEED.set(48).unwrap();
		assert_eq!(SPEED.get(), 48.0);
	}
	assert_eq!(SPEED.get(), 16.0);
}

#[test]
fn test_rewrite_until_first_read_then_freeze() {
	static SPEED: Setting<i64, f64> =
		Setting::declare("scenario::speed.write_once", || 16, |v| v as f64);
	let _iso = isolate();
	let _scope = enter();

	SPEED.set(77).unwrap();
	SPEED.set(99).unwrap();
	SPEED.set(66).unwrap();
	assert_eq!(SPEED.get(), 66.0);

	let err = SPEED.set(8).unwrap_err();
	assert_eq!(
		err,
		ContextError::InputConflict {
			key: "scenario::speed.write_once",
			existing: "66".to_string(),
			attempted: "8".to_string(),
		}
	);

	{
		let _nested = enter();
		SPEED.set(99).unwrap();
		SPEED.set(54).unwrap();
		assert_eq!(SPEED.get(), 54.0);
	}
	assert_eq!(SPEED.get(), 66.0);

	{
		let _sibling = enter();
		assert_eq!(SPEED.get(), 66.0);
	}
}

#[test]
fn test_equal_write_after_read_is_idempotent() {
	static LIMIT: Setting<i64, i64> = Setting::declare("scenario::limit.idempotent", || 10, |v| v);
	let _iso = isolate();
	let _scope = enter();

	LIMIT.set(20).unwrap();
	assert_eq!(LIMIT.get(), 20);
	LIMIT.set(20).unwrap();
	assert!(LIMIT.set(21).is_err());
	assert_eq!(LIMIT.get(), 20);
}

#[test]
fn test_service_instance_per_state() {
	static COUNTER: Service<Counter> =
		Service::declare("scenario::counter.basic", || Arc::new(Counter::default()));
	let _iso = isolate();

	let counter = COUNTER.current();
	counter.inc();
	assert_eq!(COUNTER.current().value(), 1);
	assert!(Arc::ptr_eq(&counter, &COUNTER.current()));

	// A fresh thread resolves its own zero-valued instance, and repeated
	// reads there return that same instance.
	let other = std::thread::spawn(|| {
		let first = COUNTER.current();
		let initial = first.value();
		first.inc();
		let again = COUNTER.current();
		(initial, again.value(), Arc::ptr_eq(&first, &again))
	})
	.join()
	.unwrap();
	assert_eq!(other, (0, 1, true));
}

#[test]
fn test_service_replacement_scoped_to_frame() {
	static TALLY: Service<dyn Tally> =
		Service::declare("scenario::tally.replaced", || Arc::new(StepTally::with_step(1)));
	static DOUBLE: Service<dyn Tally> =
		Service::declare("scenario::tally.replacement", || Arc::new(StepTally::with_step(2)));
	let _iso = isolate();

	TALLY.current().inc();
	assert_eq!(TALLY.current().value(), 1);

	{
		let _scope = enter();
		DOUBLE.replaces(&TALLY).unwrap();
		let doubled = TALLY.current();
		assert_eq!(doubled.value(), 0);
		doubled.inc();
		assert_eq!(TALLY.current().value(), 2);
	}
	assert_eq!(TALLY.current().value(), 1);
}

#[test]
fn test_replacement_after_inherited_read_conflicts() {
	static TALLY: Service<dyn Tally> = Service::declare("scenario::tally.read_then_replace", || {
		Arc::new(StepTally::with_step(1))
	});
	static DOUBLE: Service<dyn Tally> =
		Service::declare("scenario::tally.read_then_replace.double", || {
			Arc::new(StepTally::with_step(2))
		});
	let _iso = isolate();
	let _scope = enter();

	// The read is dispatched through the child even though the factory
	// input freezes at the root; the child may no longer redirect it.
	assert_eq!(TALLY.current().value(), 0);
	let err = DOUBLE.replaces(&TALLY).unwrap_err();
	assert!(matches!(err, ContextError::InputConflict { .. }));
}

#[test]
fn test_factory_reassignment_write_once() {
	static TALLY: Service<dyn Tally> =
		Service::declare("scenario::tally.reassign", || Arc::new(StepTally::with_step(1)));
	let _iso = isolate();

	// The root read freezes the factory input at the root frame.
	assert_eq!(TALLY.current().value(), 0);
	let err = TALLY
		.set_factory(|| Arc::new(StepTally::with_step(2)))
		.unwrap_err();
	assert!(matches!(err, ContextError::InputConflict { .. }));

	{
		let _scope = enter();
		TALLY
			.set_factory(|| Arc::new(StepTally::with_step(2)))
			.unwrap();
		let fast = TALLY.current();
		fast.inc();
		assert_eq!(fast.value(), 2);
	}
	assert_eq!(TALLY.current().value(), 0);
}

#[test]
fn test_task_switch_and_snapshot() {
	static SPEED: Setting<i64, f64> =
		Setting::declare("scenario::speed.switch", || 16, |v| v as f64);
	let _iso = isolate();

	let pinned;
	{
		let _scope = enter();
		SPEED.set(48).unwrap();
		assert_eq!(SPEED.get(), 48.0);

		// A parallel thread has its own state and sees the default.
		let from_other = std::thread::spawn(|| SPEED.get()).join().unwrap();
		assert_eq!(from_other, 16.0);

		pinned = snapshot();
	}
	assert_eq!(SPEED.get(), 16.0);

	// Cooperative resume: run a turn as if still inside the captured
	// context, then fall back to this task's own state.
	pinned.run(|| assert_eq!(SPEED.get(), 48.0)).unwrap();
	assert_eq!(SPEED.get(), 16.0);
}

#[test]
fn test_restore_round_trip_is_noop() {
	static SPEED: Setting<i64, f64> =
		Setting::declare("scenario::speed.restore", || 16, |v| v as f64);
	let _iso = isolate();

	let _scope = enter();
	SPEED.set(48).unwrap();
	let here = snapshot();
	let detour = restore(&here).unwrap();
	assert_eq!(SPEED.get(), 48.0);
	let back = restore(&detour).unwrap();
	assert_eq!(back, here);
	assert_eq!(SPEED.get(), 48.0);
}

#[test]
fn test_restore_locked_to_entering_thread() {
	let _iso = isolate();
	let _scope = enter();
	let pinned = snapshot();

	let result = std::thread::spawn(move || restore(&pinned).map(|_| ()))
		.join()
		.unwrap();
	assert_eq!(
		result,
		Err(ContextError::DynamicRule {
			reason: DynamicRuleReason::ForeignRestore,
		})
	);
}

#[test]
fn test_replacement_cycle_is_rejected() {
	static A: Service<Counter> =
		Service::declare("scenario::cycle.a", || Arc::new(Counter::default()));
	static B: Service<Counter> =
		Service::declare("scenario::cycle.b", || Arc::new(Counter::default()));
	let _iso = isolate();
	let _scope = enter();

	B.replaces(&A).unwrap();
	A.replaces(&B).unwrap();
	let err = A.try_current().unwrap_err();
	assert_eq!(
		err,
		ContextError::DynamicRule {
			reason: DynamicRuleReason::ReplacementCycle {
				key: "scenario::cycle.a",
			},
		}
	);
}

#[test]
fn test_abstract_service_requires_binding() {
	static SINK: Service<dyn Tally> = Service::declare_abstract("scenario::sink");
	static FILE_SINK: Service<dyn Tally> =
		Service::declare("scenario::sink.file", || Arc::new(StepTally::with_step(1)));
	let _iso = isolate();

	assert!(matches!(
		SINK.try_current(),
		Err(ContextError::MissingBinding { .. })
	));

	{
		let _scope = enter();
		FILE_SINK.replaces(&SINK).unwrap();
		assert_eq!(SINK.try_current().unwrap().value(), 0);
	}

	{
		let _scope = enter();
		SINK.set_factory(|| Arc::new(StepTally::with_step(3))).unwrap();
		let sink = SINK.current();
		sink.inc();
		assert_eq!(sink.value(), 3);
	}
}

#[test]
fn test_required_setting() {
	static NAME: Setting<String, String> =
		Setting::declare_required("scenario::name.required", |v| v.to_uppercase());
	let _iso = isolate();

	assert!(matches!(
		NAME.try_get(),
		Err(ContextError::MissingBinding { .. })
	));

	let _scope = enter();
	NAME.set("hal".to_string()).unwrap();
	assert_eq!(NAME.try_get().unwrap(), "HAL");
}

#[test]
fn test_failed_transform_is_retried() {
	static RATIO: Setting<i64, i64> = Setting::declare("scenario::ratio.retry", || 1, |v| {
		assert!(v > 0, "ratio must be positive");
		v * 2
	});
	let _iso = isolate();
	let _scope = enter();

	RATIO.set(-3).unwrap();
	assert!(catch_unwind(AssertUnwindSafe(|| RATIO.get())).is_err());

	// The failed computation memoized nothing, so the input is still open.
	RATIO.set(5).unwrap();
	assert_eq!(RATIO.get(), 10);
}

#[test]
fn test_single_frozen_frame_per_key() {
	static WIDTH: Setting<i64, i64> =
		Setting::declare("scenario::width.single_freeze", || 1, |v| v);
	let _iso = isolate();

	let _outer = enter();
	WIDTH.set(2).unwrap();
	let _inner = enter();
	assert_eq!(WIDTH.get(), 2);

	let report = diagnostics::state_report();
	assert_eq!(report.depth(), 3);
	assert_eq!(report.frozen_count("scenario::width.single_freeze"), 1);
}

#[test]
fn test_resource_follows_service_contract() {
	static SCRATCH: Service<Counter> =
		Service::declare_resource("scenario::scratch.resource", || Arc::new(Counter::default()));
	let _iso = isolate();

	assert_eq!(key_kind(SCRATCH.key()), KeyKind::Resource);

	// Same lookup contract as a service: lazy instance, memoized per
	// frame-fix, factory input frozen by the first read.
	let scratch = SCRATCH.current();
	scratch.inc();
	assert!(Arc::ptr_eq(&scratch, &SCRATCH.current()));
	assert_eq!(SCRATCH.try_current().unwrap().value(), 1);

	let err = SCRATCH
		.set_factory(|| Arc::new(Counter::default()))
		.unwrap_err();
	assert!(matches!(err, ContextError::InputConflict { .. }));

	{
		let _scope = enter();
		SCRATCH.set_factory(|| Arc::new(Counter::default())).unwrap();
		assert_eq!(SCRATCH.current().value(), 0);
	}
	assert_eq!(SCRATCH.current().value(), 1);
}

#[test]
fn test_service_with_accessor() {
	static COUNTER: Service<Counter> =
		Service::declare("scenario::counter.with", || Arc::new(Counter::default()));
	let _iso = isolate();

	COUNTER.with(Counter::inc);
	assert_eq!(COUNTER.with(Counter::value), 1);
}
