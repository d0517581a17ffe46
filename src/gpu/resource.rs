//! Reference-counted ownership of device resources

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Counter for generating unique handle IDs
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type ReleaseFn = Box<dyn FnOnce() + Send>;

struct HandleInner {
    id: u64,
    size: usize,
    backend: &'static str,
    release: Mutex<Option<ReleaseFn>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Some(release) = self.release.get_mut().take() {
            release();
        }
        log::trace!(
            "GPU resource {} released ({} bytes on {})",
            self.id,
            self.size,
            self.backend
        );
    }
}

/// Opaque, cloneable handle to device buffers
///
/// Clones share one reference count. The release callback runs exactly once,
/// when the last clone is dropped, so a cache evicting its copy never frees
/// buffers a reader is still holding.
#[derive(Clone)]
pub struct GpuResourceHandle {
    inner: Arc<HandleInner>,
}

impl GpuResourceHandle {
    /// Wrap device resources of `size` bytes with the callback that frees them
    pub fn new<F>(size: usize, backend: &'static str, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(HandleInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                size,
                backend,
                release: Mutex::new(Some(Box::new(release))),
            }),
        }
    }

    /// Unique identifier
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Device memory held, in bytes
    pub fn size_in_bytes(&self) -> usize {
        self.inner.size
    }

    /// Name of the backend that owns the resources
    pub fn backend_name(&self) -> &'static str {
        self.inner.backend
    }

    /// Number of live clones of this handle
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for GpuResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuResourceHandle")
            .field("id", &self.inner.id)
            .field("size", &self.inner.size)
            .field("backend", &self.inner.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_release_runs_once_on_last_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let handle = GpuResourceHandle::new(64, "Mock", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let reader = handle.clone();
        assert_eq!(handle.ref_count(), 2);

        drop(handle);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(reader.ref_count(), 1);

        drop(reader);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unique_ids() {
        let a = GpuResourceHandle::new(1, "Mock", || {});
        let b = GpuResourceHandle::new(1, "Mock", || {});
        assert_ne!(a.id(), b.id());
        assert_eq!(a.size_in_bytes(), 1);
        assert_eq!(a.backend_name(), "Mock");
    }
}
