use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use pretty_assertions::assert_eq;

use super::*;
use crate::{ExportFn, ExportMap, FnSig, Frame, Receiver};

#[derive(Clone, Debug, PartialEq, Eq)]
struct Unset;

type Slot = Receiver<i32, Unset>;

fn slot(name: &str) -> Slot {
    Receiver::new(name, || Err(Unset))
}

#[test]
fn empty_chain_has_depth_zero() {
    assert_eq!(depth(), 0);
}

#[test]
fn activation_pushed_for_call_duration() {
    let f = ExportFn::new(FnSig::new("f"), |_: &Frame, ()| depth());
    assert_eq!(f.call(()), 1);
    assert_eq!(depth(), 0);
}

#[test]
fn callee_sees_bound_export() {
    let r = slot("r");
    let f = ExportFn::new(FnSig::new("f").locals(["x"]), {
        let r = r.clone();
        move |frame: &Frame, ()| {
            frame.set("x", 7).expect("i32");
            frame.call(|| r.get())
        }
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");

    assert_eq!(f.call(()), Ok(7));
    assert_eq!(r.get(), Err(Unset));
}

#[test]
fn exporting_body_does_not_see_own_export() {
    let r = slot("r");
    let f = ExportFn::new(FnSig::new("f").locals(["x"]), {
        let r = r.clone();
        move |frame: &Frame, ()| {
            frame.set("x", 7).expect("i32");
            (r.get(), r.is_exported(), frame.call(|| r.get()), r.get())
        }
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");

    assert_eq!(f.call(()), (Err(Unset), false, Ok(7), Err(Unset)));
}

#[test]
fn exporting_body_sees_next_outer_export() {
    let r = slot("r");
    let inner = ExportFn::new(FnSig::new("inner").locals(["x"]), {
        let r = r.clone();
        move |frame: &Frame, ()| {
            frame.set("x", 2).expect("i32");
            r.get()
        }
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");
    let outer = ExportFn::new(FnSig::new("outer").locals(["x"]), move |frame: &Frame, ()| {
        frame.set("x", 1).expect("i32");
        inner.call(())
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");

    assert_eq!(outer.call(()), Ok(1));
}

#[test]
fn nearest_exporter_wins() {
    let r = slot("r");
    let inner = ExportFn::new(FnSig::new("inner").locals(["x"]), {
        let r = r.clone();
        move |frame: &Frame, ()| {
            frame.set("x", 2).expect("i32");
            frame.call(|| r.get())
        }
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");
    let outer = ExportFn::new(FnSig::new("outer").locals(["x"]), {
        let r = r.clone();
        move |frame: &Frame, ()| {
            frame.set("x", 1).expect("i32");
            frame.call(|| (inner.call(()), r.get()))
        }
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");

    assert_eq!(outer.call(()), (Ok(2), Ok(1)));
}

#[test]
fn unbound_exporter_is_skipped() {
    let r = slot("r");
    let inner = ExportFn::new(FnSig::new("inner").locals(["x"]), {
        let r = r.clone();
        move |frame: &Frame, ()| {
            let never_bound = frame.call(|| r.get());
            frame.set("x", 2).expect("i32");
            let bound = frame.call(|| r.get());
            frame.clear("x").expect("declared");
            let cleared = frame.call(|| r.get());
            vec![never_bound, bound, cleared]
        }
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");
    let outer = ExportFn::new(FnSig::new("outer").locals(["x"]), move |frame: &Frame, ()| {
        frame.set("x", 1).expect("i32");
        frame.call(|| inner.call(()))
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");

    assert_eq!(outer.call(()), vec![Ok(1), Ok(2), Ok(1)]);
}

#[test]
fn callee_sees_rebinding_at_lookup_time() {
    let r = slot("r");
    let f = ExportFn::new(FnSig::new("f").locals(["x"]), {
        let r = r.clone();
        move |frame: &Frame, ()| {
            let mut seen = Vec::new();
            for value in [10, 20, 30] {
                frame.set("x", value).expect("i32");
                seen.push(frame.call(|| r.get()));
            }
            seen
        }
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");

    assert_eq!(f.call(()), vec![Ok(10), Ok(20), Ok(30)]);
}

#[test]
fn activation_released_on_panic() {
    let r = slot("r");
    let f: ExportFn<(), ()> = ExportFn::new(FnSig::new("f").locals(["x"]), |frame: &Frame, ()| {
        frame.set("x", 3).expect("i32");
        frame.call(|| panic!("body failed"))
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");

    let result = catch_unwind(AssertUnwindSafe(|| f.call(())));
    assert!(result.is_err());
    assert_eq!(depth(), 0);
    assert_eq!(r.get(), Err(Unset));
}

#[test]
fn callee_scope_closed_on_panic() {
    let r = slot("r");
    let f = ExportFn::new(FnSig::new("f").locals(["x"]), {
        let r = r.clone();
        move |frame: &Frame, ()| {
            frame.set("x", 3).expect("i32");
            let caught = catch_unwind(AssertUnwindSafe(|| frame.call(|| panic!("callee failed"))));
            (caught.is_err(), r.get())
        }
    })
    .bind_exports(&ExportMap::new().export("x", &r))
    .expect("valid");

    // Back in the body after the failed callee: own export invisible again.
    assert_eq!(f.call(()), (true, Err(Unset)));
}

#[test]
fn error_results_release_activation() {
    let f: ExportFn<(), Result<(), &str>> =
        ExportFn::new(FnSig::new("f"), |_: &Frame, ()| Err("boom"));
    assert_eq!(f.call(()), Err("boom"));
    assert_eq!(depth(), 0);
}

#[test]
fn recursive_activations_are_independent() {
    let r = slot("r");
    let me: Arc<OnceLock<ExportFn<i32, Vec<Result<i32, Unset>>>>> = Arc::new(OnceLock::new());
    let countdown = ExportFn::new(FnSig::new("countdown").params(["n"]), {
        let r = r.clone();
        let me = Arc::clone(&me);
        move |frame: &Frame, n: i32| {
            frame.set("n", n).expect("i32");
            let mut seen = vec![frame.call(|| r.get())];
            if let Some(me) = me.get().filter(|_| n > 0) {
                seen.extend(frame.call(|| me.call(n - 1)));
            }
            seen.push(frame.call(|| r.get()));
            seen
        }
    })
    .bind_exports(&ExportMap::new().export("n", &r))
    .expect("valid");
    me.set(countdown.clone()).expect("set once");

    assert_eq!(
        countdown.call(2),
        vec![Ok(2), Ok(1), Ok(0), Ok(0), Ok(1), Ok(2)]
    );
    assert_eq!(depth(), 0);
}

#[test]
fn first_applied_layer_is_consulted_first() {
    let r = slot("r");
    let f = ExportFn::new(FnSig::new("f").locals(["a", "b"]), {
        let r = r.clone();
        move |frame: &Frame, ()| {
            frame.set("b", 2).expect("i32");
            let only_b = frame.call(|| r.get());
            frame.set("a", 1).expect("i32");
            let both = frame.call(|| r.get());
            (only_b, both)
        }
    })
    .bind_exports(&ExportMap::new().export("a", &r))
    .and_then(|f| f.bind_exports(&ExportMap::new().export("b", &r)))
    .expect("valid");

    assert_eq!(f.call(()), (Ok(2), Ok(1)));
}
