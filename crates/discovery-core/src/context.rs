//! Per-connection client identity.
//!
//! A [`ClientContext`] carries no data: two contexts are equal only if they
//! are the same context. Handlers that need to remember a client keep a
//! [`ContextKey`], which never keeps the connection's context alive.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

#[derive(Debug)]
struct Marker;

/// Identity of one accepted connection.
///
/// Cloning shares the identity; `ClientContext::new()` always creates a
/// fresh one.
#[derive(Clone)]
pub struct ClientContext {
    marker: Arc<Marker>,
}

impl ClientContext {
    /// Create a new, unique context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            marker: Arc::new(Marker),
        }
    }

    /// Get an identity-only key for this context.
    #[must_use]
    pub fn key(&self) -> ContextKey {
        ContextKey {
            marker: Arc::downgrade(&self.marker),
        }
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.marker) as usize
    }
}

impl Default for ClientContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ClientContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.marker, &other.marker)
    }
}

impl Eq for ClientContext {}

impl Hash for ClientContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientContext({:#x})", self.addr())
    }
}

impl fmt::Display for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx_{:x}", self.addr())
    }
}

/// Weak, identity-only reference to a [`ClientContext`].
///
/// While any key exists the identity it refers to is not reused, so a stale
/// key never aliases a newer connection.
#[derive(Clone)]
pub struct ContextKey {
    marker: Weak<Marker>,
}

impl ContextKey {
    /// Check whether the context this key refers to is still alive.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.marker.strong_count() > 0
    }

    /// Check whether this key refers to `context`.
    #[must_use]
    pub fn refers_to(&self, context: &ClientContext) -> bool {
        self.addr() == context.addr()
    }

    fn addr(&self) -> usize {
        self.marker.as_ptr() as usize
    }
}

impl PartialEq for ContextKey {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.marker, &other.marker)
    }
}

impl Eq for ContextKey {}

impl Hash for ContextKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({:#x})", self.addr())
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx_{:x}", self.addr())
    }
}
