//! Live Vulkan object accounting
//!
//! Each RAII wrapper reports its creation and destruction here, which lets
//! callers check that teardown exactly matches creation (e.g. across swapchain
//! reshapes).

use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};

/// Kinds of device objects tracked per context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// `vk::Buffer`
    Buffer,
    /// `vk::Image` created by this crate (swapchain images are not counted)
    Image,
    /// `vk::ImageView`
    ImageView,
    /// `vk::DeviceMemory`
    Allocation,
    /// `vk::Sampler`
    Sampler,
    /// `vk::Framebuffer`
    Framebuffer,
}

impl ObjectKind {
    const ALL: [Self; 6] = [
        Self::Buffer,
        Self::Image,
        Self::ImageView,
        Self::Allocation,
        Self::Sampler,
        Self::Framebuffer,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Counters of live objects, one per [`ObjectKind`]
#[derive(Default)]
pub struct LiveObjects {
    counts: [AtomicIsize; 6],
}

impl LiveObjects {
    /// Record one object of `kind` being created
    pub fn created(&self, kind: ObjectKind) {
        self.counts[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record one object of `kind` being destroyed
    pub fn destroyed(&self, kind: ObjectKind) {
        let previous = self.counts[kind.index()].fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "{kind:?} destroyed more often than created");
    }

    /// Number of live objects of `kind`
    pub fn count(&self, kind: ObjectKind) -> isize {
        self.counts[kind.index()].load(Ordering::Relaxed)
    }

    /// Copy of all counters
    pub fn snapshot(&self) -> LiveObjectSnapshot {
        let mut counts = [0; 6];
        for kind in ObjectKind::ALL {
            counts[kind.index()] = self.count(kind);
        }
        LiveObjectSnapshot { counts }
    }
}

/// Point-in-time copy of [`LiveObjects`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveObjectSnapshot {
    counts: [isize; 6],
}

impl LiveObjectSnapshot {
    /// Number of live objects of `kind` when the snapshot was taken
    pub fn count(&self, kind: ObjectKind) -> isize {
        self.counts[kind.index()]
    }
}

impl fmt::Display for LiveObjectSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for kind in ObjectKind::ALL {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{kind:?}={}", self.count(kind))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_per_kind() {
        let live = LiveObjects::default();
        live.created(ObjectKind::Image);
        live.created(ObjectKind::ImageView);
        live.created(ObjectKind::ImageView);
        live.destroyed(ObjectKind::ImageView);

        assert_eq!(live.count(ObjectKind::Image), 1);
        assert_eq!(live.count(ObjectKind::ImageView), 1);
        assert_eq!(live.count(ObjectKind::Buffer), 0);
    }

    #[test]
    fn test_snapshot_equality_detects_leaks() {
        let live = LiveObjects::default();
        live.created(ObjectKind::Framebuffer);
        let before = live.snapshot();

        live.created(ObjectKind::ImageView);
        live.destroyed(ObjectKind::ImageView);
        assert_eq!(live.snapshot(), before);

        live.created(ObjectKind::ImageView);
        assert_ne!(live.snapshot(), before);
        assert!(live.snapshot().to_string().contains("ImageView=1"));
    }
}
