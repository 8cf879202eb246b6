//! Liveness checks for tracked handles.

use tracing::trace;

use crate::handle::Handle;
use crate::host::SceneOps;

/// Answers whether a handle may still be dereferenced.
///
/// Implementations never fail: any error reaching the host counts as "dead".
pub trait ReferenceValidator {
    /// Returns true if the entity behind `handle` still exists.
    fn is_valid(&self, handle: Handle) -> bool;

    /// Returns the handle if it is still valid.
    fn live(&self, handle: Option<Handle>) -> Option<Handle> {
        handle.filter(|h| self.is_valid(*h))
    }
}

/// Validator backed by the host's `exists` query.
pub struct HostValidator<'a, H: ?Sized> {
    host: &'a H,
}

impl<'a, H: SceneOps + ?Sized> HostValidator<'a, H> {
    /// Wraps a host.
    #[must_use]
    pub const fn new(host: &'a H) -> Self {
        Self { host }
    }
}

impl<H: SceneOps + ?Sized> ReferenceValidator for HostValidator<'_, H> {
    fn is_valid(&self, handle: Handle) -> bool {
        match self.host.exists(handle) {
            Ok(alive) => alive,
            Err(err) => {
                trace!(%handle, %err, "validity check failed; treating as dead");
                false
            }
        }
    }
}
