//! The per-thread activation chain and the lookup walk over it.
//!
//! Every call of an [`ExportFn`](crate::ExportFn) pushes one activation record
//! on entry and pops it on exit (including unwinding). The chain therefore
//! mirrors the nesting of exporting calls on this thread, innermost last.
//!
//! # Visibility
//!
//! An activation's exports are visible to its callees only. Code running
//! directly in an exporting body never sees that body's own exports:
//!
//! - the innermost record is skipped unless it is inside
//!   [`Frame::call`](crate::Frame::call);
//! - every other record is below a nested exporting call, hence a callee
//!   position, and is always visible.
//!
//! The walk then goes outward and stops at the first record that exports the
//! receiver under a currently bound name. Names exported but unbound are
//! skipped, not treated as a hit.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use crate::export::ExportLayer;
use crate::receiver::ReceiverId;
use crate::signature::FnSig;

/// Type-erased value held by a bound slot.
pub(crate) type SlotValue = Rc<dyn Any>;

/// Runtime state of one in-progress call of an exporting function.
pub(crate) struct Activation {
    pub(crate) sig: Arc<FnSig>,
    /// Stacked export layers, first-applied first. All share `slots`.
    pub(crate) layers: Arc<[Arc<ExportLayer>]>,
    /// One cell per declared name; `None` while unbound.
    pub(crate) slots: Box<[RefCell<Option<SlotValue>>]>,
    /// Number of `Frame::call` scopes currently open in this activation.
    callee_depth: Cell<usize>,
}

impl Activation {
    pub(crate) fn new(sig: Arc<FnSig>, layers: Arc<[Arc<ExportLayer>]>) -> Self {
        let slots = (0..sig.slot_count()).map(|_| RefCell::new(None)).collect();
        Activation {
            sig,
            layers,
            slots,
            callee_depth: Cell::new(0),
        }
    }

    #[inline]
    fn in_callee(&self) -> bool {
        self.callee_depth.get() > 0
    }

    pub(crate) fn enter_callee(&self) {
        self.callee_depth.set(self.callee_depth.get() + 1);
    }

    pub(crate) fn leave_callee(&self) {
        debug_assert!(self.in_callee(), "unbalanced callee scope");
        self.callee_depth.set(self.callee_depth.get().saturating_sub(1));
    }

    /// The bound value this activation exports to `receiver`, if any.
    ///
    /// Layers are consulted in application order; an unbound name in one
    /// layer falls through to the next.
    fn exported(&self, receiver: ReceiverId) -> Option<SlotValue> {
        self.layers
            .iter()
            .filter_map(|layer| layer.slot_for(receiver))
            .find_map(|slot| self.slots[slot].borrow().clone())
    }
}

thread_local! {
    static CHAIN: RefCell<Vec<Rc<Activation>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn push(activation: Rc<Activation>) {
    CHAIN.with(|chain| {
        let mut chain = chain.borrow_mut();
        tracing::trace!(
            function = activation.sig.name(),
            depth = chain.len() + 1,
            "push activation"
        );
        chain.push(activation);
    });
}

/// Pop `activation`, which must be the innermost record.
pub(crate) fn pop(activation: &Rc<Activation>) {
    CHAIN.with(|chain| {
        let mut chain = chain.borrow_mut();
        debug_assert!(
            chain.last().is_some_and(|top| Rc::ptr_eq(top, activation)),
            "activation chain popped out of order"
        );
        tracing::trace!(
            function = activation.sig.name(),
            depth = chain.len(),
            "pop activation"
        );
        chain.pop();
    });
}

/// Number of live activation records on the current thread.
pub fn depth() -> usize {
    CHAIN.with(|chain| chain.borrow().len())
}

/// Find the nearest visible, bound export of `receiver`.
///
/// Read-only. The chain borrow ends before the caller touches the value, so
/// `Clone` impls and default producers are free to look up or export again.
pub(crate) fn find(receiver: ReceiverId) -> Option<SlotValue> {
    CHAIN.with(|chain| {
        let chain = chain.borrow();
        let skip = chain.last().is_some_and(|innermost| !innermost.in_callee());
        let hit = chain
            .iter()
            .rev()
            .skip(usize::from(skip))
            .enumerate()
            .find_map(|(walked, activation)| {
                activation
                    .exported(receiver)
                    .map(|value| (walked, activation, value))
            });
        match hit {
            Some((walked, activation, value)) => {
                tracing::trace!(
                    receiver = receiver.raw(),
                    function = activation.sig.name(),
                    walked,
                    "export found"
                );
                Some(value)
            }
            None => {
                tracing::trace!(receiver = receiver.raw(), depth = chain.len(), "no export");
                None
            }
        }
    })
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "Tests use expect for brevity")]
mod tests;
