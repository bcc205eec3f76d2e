//! Guards around plugin-created objects
//!
//! Managed instances must report their destruction to the loader that made
//! them: the loader refuses to unmap its library while they exist, and in
//! lazy mode the last release may trigger the unmap. [`Instance`] carries
//! that release duty alongside the object; [`SharedInstance`] is the
//! cloneable form.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::loader::LoaderCore;

/// An owned plugin instance satisfying base capability `B`.
///
/// Dereferences to `B`. Dropping it destroys the plugin object first and
/// then notifies the owning loader, which is what allows lazy loaders to
/// unmap once their last instance is gone.
pub struct Instance<B: ?Sized> {
    // Dropped by hand so the object dies strictly before the release
    // notification below can unmap its library.
    object: ManuallyDrop<Box<B>>,
    core: Option<Arc<LoaderCore>>,
}

/// A shared, cloneable plugin instance handle.
pub type SharedInstance<B> = Arc<Instance<B>>;

impl<B: ?Sized> Instance<B> {
    pub(crate) fn new(object: Box<B>, core: Arc<LoaderCore>) -> Self {
        Self {
            object: ManuallyDrop::new(object),
            core: Some(core),
        }
    }
}

impl<B: ?Sized> std::fmt::Debug for Instance<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").finish_non_exhaustive()
    }
}

impl<B: ?Sized> Deref for Instance<B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.object
    }
}

impl<B: ?Sized> DerefMut for Instance<B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut self.object
    }
}

impl<B: ?Sized> Drop for Instance<B> {
    fn drop(&mut self) {
        // SAFETY: `object` is dropped exactly once, here, and never touched
        // again. It must go before the release below, which may unmap the
        // library holding the object's code.
        unsafe { ManuallyDrop::drop(&mut self.object) }
        if let Some(core) = self.core.take() {
            core.release_instance();
        }
    }
}
