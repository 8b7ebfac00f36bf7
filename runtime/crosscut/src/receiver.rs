//! Receivers and the registry of receiver identities.
//!
//! A [`Receiver`] is a queryable slot. Calling [`Receiver::get`] walks the
//! current thread's activation chain for the nearest exported value; if none
//! is found, the receiver's default producer runs instead.
//!
//! Identity is by registration, never by value: two receivers built from the
//! same closure are different receivers. The process-wide [`Registry`] keeps
//! the identities it has issued so export bindings can reject anything else.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::chain;
use crate::errors::CrosscutError;
use crate::signature::FnSig;

/// Opaque identity of a registered receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiverId(u64);

impl ReceiverId {
    /// Raw numeric value (for logging).
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// An id no registry ever issues.
    #[cfg(test)]
    pub(crate) fn forged() -> Self {
        ReceiverId(u64::MAX)
    }
}

impl fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runtime type of the values a receiver yields.
#[derive(Clone, Copy, Debug)]
pub struct ValueType {
    id: TypeId,
    name: &'static str,
}

impl ValueType {
    pub fn of<T: Any>() -> Self {
        ValueType {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.name
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ValueType {}

/// Anything that can appear as the target of an export mapping.
///
/// Implemented by [`Receiver`]. The trait is object safe so that receivers
/// of different value types can share one mapping; export binding checks
/// every target against the [`Registry`], so implementing it by hand does
/// not make a value a receiver.
pub trait ExportTarget {
    fn receiver_id(&self) -> ReceiverId;

    fn receiver_name(&self) -> &str;

    fn value_type(&self) -> ValueType;
}

#[derive(Clone, Copy, Debug)]
struct Registration {
    value_type: ValueType,
}

/// Bookkeeping of every receiver identity issued in this process.
///
/// Receivers are never unregistered: they live for the rest of the process.
pub struct Registry {
    /// Next id to issue. `u64::MAX` is never issued.
    next_id: AtomicU64,
    known: RwLock<FxHashMap<ReceiverId, Registration>>,
}

impl Registry {
    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(|| Registry::starting_at(0))
    }

    fn starting_at(first: u64) -> Self {
        Registry {
            next_id: AtomicU64::new(first),
            known: RwLock::new(FxHashMap::default()),
        }
    }

    /// Issue a fresh id. Ids are never reused, so running out is fatal.
    fn register(&self, value_type: ValueType) -> ReceiverId {
        let issued = self
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                next.checked_add(1).filter(|&after| after < u64::MAX)
            });
        let Ok(raw) = issued else {
            panic!("receiver identities exhausted");
        };
        let id = ReceiverId(raw);
        self.known.write().insert(id, Registration { value_type });
        id
    }

    /// Whether `id` was issued by this registry.
    pub fn is_registered(&self, id: ReceiverId) -> bool {
        self.known.read().contains_key(&id)
    }

    /// Number of receivers registered so far.
    pub fn len(&self) -> usize {
        self.known.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.read().is_empty()
    }

    /// Confirm `target` is a receiver this registry issued, with the value
    /// type it was registered with.
    pub(crate) fn verify(&self, target: &dyn ExportTarget) -> Result<(), CrosscutError> {
        let known = self.known.read();
        match known.get(&target.receiver_id()) {
            Some(reg) if reg.value_type == target.value_type() => Ok(()),
            _ => Err(CrosscutError::NotAReceiver {
                target: target.receiver_name().to_owned(),
            }),
        }
    }
}

type Producer<T, E> = dyn Fn() -> Result<T, E> + Send + Sync;

struct ReceiverInner<T, E> {
    id: ReceiverId,
    name: String,
    producer: Box<Producer<T, E>>,
}

/// A named slot resolved through the dynamic call chain.
///
/// `T` is the value type, `E` the failure type of the default producer.
/// Cloning is cheap and yields the same receiver.
///
/// # Example
///
/// ```text
/// let current_request: Receiver<Request, NoRequest> =
///     Receiver::new("current_request", || Err(NoRequest));
///
/// // Outside any exporting call the default runs.
/// assert!(current_request.get().is_err());
/// ```
pub struct Receiver<T, E> {
    inner: Arc<ReceiverInner<T, E>>,
}

/// Register a receiver whose default producer is described by `sig`.
///
/// The producer must be declared with zero parameters; a signature with
/// parameters is rejected without invoking anything.
pub fn register_receiver<T, E, F>(sig: &FnSig, producer: F) -> Result<Receiver<T, E>, CrosscutError>
where
    T: Clone + 'static,
    E: 'static,
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
{
    if sig.arity() != 0 {
        return Err(CrosscutError::Contract {
            function: sig.name().to_owned(),
            arity: sig.arity(),
        });
    }
    Ok(Receiver::register(sig.name().to_owned(), Box::new(producer)))
}

impl<T: Clone + 'static, E: 'static> Receiver<T, E> {
    /// Register a receiver named `name` with a zero-argument default
    /// producer.
    pub fn new<F>(name: impl Into<String>, producer: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Receiver::register(name.into(), Box::new(producer))
    }

    fn register(name: String, producer: Box<Producer<T, E>>) -> Self {
        let id = Registry::global().register(ValueType::of::<T>());
        tracing::debug!(receiver = %name, id = id.raw(), "registered receiver");
        Receiver {
            inner: Arc::new(ReceiverInner { id, name, producer }),
        }
    }

    /// Resolve the receiver from the call site.
    ///
    /// Returns the nearest bound export visible from here, or else the
    /// default producer's result. Producer failures are returned as-is.
    pub fn get(&self) -> Result<T, E> {
        // Export types are checked when bound, so a hit always downcasts.
        match chain::find(self.inner.id).and_then(|value| value.downcast_ref::<T>().cloned()) {
            Some(value) => Ok(value),
            None => self.default_value(),
        }
    }

    /// Run the default producer, ignoring any exports.
    pub fn default_value(&self) -> Result<T, E> {
        tracing::trace!(receiver = %self.inner.name, "resolving default");
        (self.inner.producer)()
    }
}

impl<T, E> Receiver<T, E> {
    #[inline]
    pub fn id(&self) -> ReceiverId {
        self.inner.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether [`get`](Self::get) would currently find an export instead of
    /// falling back to the default.
    pub fn is_exported(&self) -> bool {
        chain::find(self.inner.id).is_some()
    }
}

impl<T: 'static, E> ExportTarget for Receiver<T, E> {
    fn receiver_id(&self) -> ReceiverId {
        self.inner.id
    }

    fn receiver_name(&self) -> &str {
        &self.inner.name
    }

    fn value_type(&self) -> ValueType {
        ValueType::of::<T>()
    }
}

impl<T, E> Clone for Receiver<T, E> {
    fn clone(&self) -> Self {
        Receiver {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> PartialEq for Receiver<T, E> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T, E> Eq for Receiver<T, E> {}

impl<T, E> Hash for Receiver<T, E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<T, E> fmt::Debug for Receiver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

impl<T, E> fmt::Display for Receiver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<receiver {}>", self.inner.name)
    }
}
