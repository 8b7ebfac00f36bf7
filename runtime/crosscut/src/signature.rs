//! Declared function signatures.
//!
//! Rust has no reflection over a function's parameter and local names, so a
//! function taking part in dynamic scoping declares them up front. The
//! declared names are what export mappings are validated against, and each
//! one owns a slot in every activation of the function.

use rustc_hash::FxHashMap;

/// The declared parameter and local names of a function.
///
/// Names are kept in declaration order (parameters first). Declaring the same
/// name twice keeps the first occurrence.
///
/// # Example
///
/// ```text
/// let sig = FnSig::new("wsgi_app").params(["environ"]).locals(["request"]);
/// assert_eq!(sig.arity(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct FnSig {
    name: String,
    /// Parameters followed by locals.
    names: Vec<String>,
    arity: usize,
    slots: FxHashMap<String, usize>,
}

impl FnSig {
    /// Create a signature with no parameters or locals.
    pub fn new(name: impl Into<String>) -> Self {
        FnSig {
            name: name.into(),
            names: Vec::new(),
            arity: 0,
            slots: FxHashMap::default(),
        }
    }

    /// Declare parameters, in order.
    ///
    /// Parameters always precede locals in slot order, even when declared
    /// after them.
    #[must_use]
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let locals = self.names.split_off(self.arity);
        self.slots.clear();
        for existing in std::mem::take(&mut self.names) {
            self.declare(existing);
        }
        for param in params {
            self.declare(param.into());
        }
        self.arity = self.names.len();
        for local in locals {
            self.declare(local);
        }
        self
    }

    /// Declare locals, in order.
    #[must_use]
    pub fn locals<I, S>(mut self, locals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for local in locals {
            self.declare(local.into());
        }
        self
    }

    fn declare(&mut self, name: String) {
        if self.slots.contains_key(&name) {
            return;
        }
        self.slots.insert(name.clone(), self.names.len());
        self.names.push(name);
    }

    /// The function's name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of declared parameters.
    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Declared parameters, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.names[..self.arity].iter().map(String::as_str)
    }

    /// All declared names: parameters, then locals.
    pub fn declared_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Whether `name` is a declared parameter or local.
    #[inline]
    pub fn declares(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Slot index of a declared name.
    #[inline]
    pub(crate) fn slot_of(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    #[inline]
    pub(crate) fn slot_count(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub(crate) fn slot_name(&self, slot: usize) -> &str {
        &self.names[slot]
    }
}
