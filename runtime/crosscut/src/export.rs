//! Export bindings: wrapping a function so its locals feed receivers.
//!
//! [`ExportFn`] pairs a declared signature with a body. Each call pushes an
//! activation onto the current thread's chain, hands the body a [`Frame`] for
//! binding its declared names, and pops the activation on every exit path.
//!
//! [`bind_exports`] validates a `{name -> receiver}` mapping against the
//! signature and returns the function with one more export layer. Layers
//! stack: each is validated on its own, so the same receiver may be exported
//! by two layers under different names. All layers of one function share the
//! activation's slots.
//!
//! # Example
//!
//! ```text
//! let wsgi_app = ExportFn::new(
//!     FnSig::new("wsgi_app").params(["environ"]).locals(["request"]),
//!     |frame: &Frame, environ: Environ| {
//!         frame.set("request", Request::new(environ))?;
//!         // Callees now resolve `current_request` to the request.
//!         Ok(frame.call(handle))
//!     },
//! );
//! let wsgi_app = bind_exports(&wsgi_app, &ExportMap::new().export("request", &current_request))?;
//! ```

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::chain::{self, Activation, SlotValue};
use crate::errors::CrosscutError;
use crate::receiver::{ExportTarget, ReceiverId, Registry, ValueType};
use crate::signature::FnSig;

/// A `{name -> receiver}` mapping for one [`bind_exports`] call.
///
/// Adding a name twice replaces its earlier target.
#[derive(Default)]
pub struct ExportMap<'a> {
    entries: SmallVec<[(&'a str, &'a dyn ExportTarget); 4]>,
}

impl<'a> ExportMap<'a> {
    pub fn new() -> Self {
        ExportMap {
            entries: SmallVec::new(),
        }
    }

    /// Export the local or parameter `name` to `target`.
    #[must_use]
    pub fn export(mut self, name: &'a str, target: &'a dyn ExportTarget) -> Self {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = target,
            None => self.entries.push((name, target)),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a dyn ExportTarget)> for ExportMap<'a> {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a dyn ExportTarget)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ExportMap::new(), |map, (name, target)| map.export(name, target))
    }
}

impl fmt::Debug for ExportMap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(name, target)| (*name, target.receiver_name())),
            )
            .finish()
    }
}

/// One validated export: a receiver fed from a slot.
#[derive(Clone, Debug)]
struct Export {
    receiver: ReceiverId,
    receiver_name: String,
    value_type: ValueType,
    slot: usize,
}

/// The validated mapping of a single [`bind_exports`] application.
#[derive(Debug)]
pub(crate) struct ExportLayer {
    exports: SmallVec<[Export; 2]>,
}

impl ExportLayer {
    /// Validate `map` as the next layer on top of `earlier`.
    fn validate(
        sig: &FnSig,
        earlier: &[Arc<ExportLayer>],
        map: &ExportMap<'_>,
    ) -> Result<Self, CrosscutError> {
        let registry = Registry::global();

        for (name, _) in &map.entries {
            if !sig.declares(name) {
                return Err(CrosscutError::unknown_name(sig.name(), name));
            }
        }
        for (_, target) in &map.entries {
            registry.verify(*target)?;
        }

        let mut exports: SmallVec<[Export; 2]> = SmallVec::new();
        for (name, target) in &map.entries {
            let receiver = target.receiver_id();
            if let Some(existing) = exports.iter().find(|e| e.receiver == receiver) {
                return Err(CrosscutError::DuplicateExport {
                    receiver: target.receiver_name().to_owned(),
                    function: sig.name().to_owned(),
                    existing: sig.slot_name(existing.slot).to_owned(),
                    name: (*name).to_owned(),
                });
            }
            let Some(slot) = sig.slot_of(name) else {
                return Err(CrosscutError::unknown_name(sig.name(), name));
            };
            exports.push(Export {
                receiver,
                receiver_name: target.receiver_name().to_owned(),
                value_type: target.value_type(),
                slot,
            });
        }

        // Every receiver fed from one slot shares its value type.
        for export in &exports {
            let conflict = earlier
                .iter()
                .flat_map(|layer| layer.exports_from(export.slot))
                .find(|prior| prior.value_type != export.value_type);
            if let Some(prior) = conflict {
                return Err(CrosscutError::ConflictingExport {
                    function: sig.name().to_owned(),
                    name: sig.slot_name(export.slot).to_owned(),
                    existing: prior.receiver_name.clone(),
                    expected: prior.value_type.name(),
                    receiver: export.receiver_name.clone(),
                    found: export.value_type.name(),
                });
            }
        }
        Ok(ExportLayer { exports })
    }

    /// Slot exported to `receiver` by this layer.
    #[inline]
    pub(crate) fn slot_for(&self, receiver: ReceiverId) -> Option<usize> {
        self.exports
            .iter()
            .find(|e| e.receiver == receiver)
            .map(|e| e.slot)
    }

    fn exports_from(&self, slot: usize) -> impl Iterator<Item = &Export> {
        self.exports.iter().filter(move |e| e.slot == slot)
    }
}

type Body<A, R> = dyn Fn(&Frame, A) -> R + Send + Sync;

/// A function whose activations can export locals to receivers.
///
/// Calling it is transparent: arguments go to the body, and whatever the body
/// returns (including an `Err`) comes back unchanged. Cloning is cheap.
pub struct ExportFn<A, R> {
    sig: Arc<FnSig>,
    layers: Arc<[Arc<ExportLayer>]>,
    body: Arc<Body<A, R>>,
}

impl<A, R> ExportFn<A, R> {
    /// Wrap `body` with no exports yet.
    pub fn new<F>(sig: FnSig, body: F) -> Self
    where
        F: Fn(&Frame, A) -> R + Send + Sync + 'static,
    {
        ExportFn {
            sig: Arc::new(sig),
            layers: Arc::from(Vec::new()),
            body: Arc::new(body),
        }
    }

    pub fn signature(&self) -> &FnSig {
        &self.sig
    }

    /// Number of export layers applied.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Apply one more export layer. See [`bind_exports`].
    pub fn bind_exports(&self, map: &ExportMap<'_>) -> Result<Self, CrosscutError> {
        let layer = ExportLayer::validate(&self.sig, &self.layers, map)?;
        tracing::debug!(
            function = self.sig.name(),
            exports = ?map,
            layer = self.layers.len(),
            "bound exports"
        );
        let layers: Vec<_> = self
            .layers
            .iter()
            .cloned()
            .chain(std::iter::once(Arc::new(layer)))
            .collect();
        Ok(ExportFn {
            sig: Arc::clone(&self.sig),
            layers: Arc::from(layers),
            body: Arc::clone(&self.body),
        })
    }

    /// Run one activation of the function.
    pub fn call(&self, args: A) -> R {
        let frame = Frame::enter(Arc::clone(&self.sig), Arc::clone(&self.layers));
        (self.body)(&frame, args)
    }
}

/// Validate `map` against `function`'s signature and return the function
/// with the mapping applied as a new export layer.
///
/// Checks, in order: every name is declared, every target is a registered
/// receiver, no receiver is targeted twice within `map`, and no name is
/// exported to receivers of different value types across layers. Nothing is
/// invoked.
pub fn bind_exports<A, R>(
    function: &ExportFn<A, R>,
    map: &ExportMap<'_>,
) -> Result<ExportFn<A, R>, CrosscutError> {
    function.bind_exports(map)
}

impl<A, R> Clone for ExportFn<A, R> {
    fn clone(&self) -> Self {
        ExportFn {
            sig: Arc::clone(&self.sig),
            layers: Arc::clone(&self.layers),
            body: Arc::clone(&self.body),
        }
    }
}

impl<A, R> fmt::Debug for ExportFn<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportFn")
            .field("sig", &self.sig)
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

/// The body's handle on its own activation.
///
/// Dropping the frame pops the activation, which the wrapper does when the
/// body returns or unwinds.
pub struct Frame {
    activation: Rc<Activation>,
}

impl Frame {
    fn enter(sig: Arc<FnSig>, layers: Arc<[Arc<ExportLayer>]>) -> Self {
        let activation = Rc::new(Activation::new(sig, layers));
        chain::push(Rc::clone(&activation));
        Frame { activation }
    }

    /// Name of the executing function.
    pub fn function(&self) -> &str {
        self.activation.sig.name()
    }

    fn slot(&self, name: &str) -> Result<usize, CrosscutError> {
        self.activation
            .sig
            .slot_of(name)
            .ok_or_else(|| CrosscutError::unknown_name(self.function(), name))
    }

    /// Bind the declared name `name` to `value`.
    ///
    /// From here on, callees resolving a receiver `name` is exported to see
    /// `value`. Fails if `name` is undeclared, or if `V` is not the value
    /// type of a receiver `name` is exported to.
    pub fn set<V: Any>(&self, name: &str, value: V) -> Result<(), CrosscutError> {
        let slot = self.slot(name)?;
        let found = ValueType::of::<V>();
        let mismatch = self
            .activation
            .layers
            .iter()
            .flat_map(|layer| layer.exports_from(slot))
            .find(|export| export.value_type != found);
        if let Some(export) = mismatch {
            return Err(CrosscutError::TypeMismatch {
                function: self.function().to_owned(),
                name: name.to_owned(),
                receiver: export.receiver_name.clone(),
                expected: export.value_type.name(),
                found: found.name(),
            });
        }
        let value: SlotValue = Rc::new(value);
        // The old value is dropped after the borrow ends; its `Drop` may look up.
        let old = self.activation.slots[slot].replace(Some(value));
        drop(old);
        Ok(())
    }

    /// Unbind `name`. Lookups skip this activation for its receivers until
    /// it is bound again.
    pub fn clear(&self, name: &str) -> Result<(), CrosscutError> {
        let slot = self.slot(name)?;
        let old = self.activation.slots[slot].take();
        drop(old);
        Ok(())
    }

    /// Whether `name` currently holds a value. Undeclared names never do.
    pub fn is_bound(&self, name: &str) -> bool {
        self.activation
            .sig
            .slot_of(name)
            .is_some_and(|slot| self.activation.slots[slot].borrow().is_some())
    }

    /// Read back the value bound to `name`, if it is bound and a `V`.
    pub fn get<V: Clone + 'static>(&self, name: &str) -> Option<V> {
        let slot = self.activation.sig.slot_of(name)?;
        let value = self.activation.slots[slot].borrow().clone()?;
        value.downcast_ref::<V>().cloned()
    }

    /// Run `f` as a callee of this activation.
    ///
    /// Lookups made inside `f`, however deeply nested in plain function
    /// calls, see this activation's bound exports.
    pub fn call<T>(&self, f: impl FnOnce() -> T) -> T {
        let _scope = CalleeScope::open(&self.activation);
        f()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        chain::pop(&self.activation);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sig = &self.activation.sig;
        let bound: Vec<&str> = sig
            .declared_names()
            .enumerate()
            .filter(|(slot, _)| self.activation.slots[*slot].borrow().is_some())
            .map(|(_, name)| name)
            .collect();
        f.debug_struct("Frame")
            .field("function", &sig.name())
            .field("bound", &bound)
            .finish()
    }
}

/// Marks an activation as running a callee until dropped.
struct CalleeScope<'a> {
    activation: &'a Activation,
}

impl<'a> CalleeScope<'a> {
    fn open(activation: &'a Activation) -> Self {
        activation.enter_callee();
        CalleeScope { activation }
    }
}

impl Drop for CalleeScope<'_> {
    fn drop(&mut self) {
        self.activation.leave_callee();
    }
}
