use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared position for keyless dispatch.
///
/// Each executor owns one cursor. The stored value always stays below the
/// node count seen by the last caller, so it wraps rather than overflows.
#[derive(Debug, Default)]
pub struct RoundRobinCursor(AtomicUsize);

impl RoundRobinCursor {
    /// Creates a cursor starting at the first node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index to use among `len` nodes and advances the cursor.
    ///
    /// Concurrent callers never receive the same position for one step. If
    /// the node count shrank since the last call the stored value is folded
    /// back into range first.
    pub fn next(&self, len: usize) -> usize {
        debug_assert!(len > 0);
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let idx = current % len;
            let next = (idx + 1) % len;
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return idx,
                Err(actual) => current = actual,
            }
        }
    }
}
