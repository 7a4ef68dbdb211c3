//! `ContextRegistry`: the last-known device context.
//!
//! Holds at most one context, set when a device is registered and cleared on remove.
//! Callers that need "whatever device is live" (a migration helper, a
//! health check) look it up here instead of through a global, so
//! independent instances in one process do not interfere.

use parking_lot::Mutex;

pub struct ContextRegistry<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for ContextRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ContextRegistry<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Record `ctx` as current. Returns the context it replaced.
    pub fn register(&self, ctx: T) -> Option<T> {
        let prev = self.slot.lock().replace(ctx);
        if prev.is_some() {
            tracing::debug!("context registry: replacing live context");
        }
        prev
    }

    /// Forget the current context (device removed).
    pub fn clear(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Clear only if `matches` accepts the current context.
    pub fn clear_if(&self, matches: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(matches) {
            slot.take()
        } else {
            None
        }
    }

    pub fn is_registered(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Run `f` against the current context while holding the lock.
    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> Option<U> {
        self.slot.lock().as_ref().map(f)
    }
}

impl<T: Clone> ContextRegistry<T> {
    pub fn current(&self) -> Option<T> {
        self.slot.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Ctx {
        name: &'static str,
    }

    #[test]
    fn test_register_remove_lifecycle() {
        let reg = ContextRegistry::new();
        assert!(reg.current().is_none());

        assert!(reg.register(Ctx { name: "dev0" }).is_none());
        assert_eq!(reg.current(), Some(Ctx { name: "dev0" }));

        let old = reg.register(Ctx { name: "dev1" });
        assert_eq!(old, Some(Ctx { name: "dev0" }));
        assert_eq!(reg.with(|c| c.name), Some("dev1"));

        assert!(reg.clear_if(|c| c.name == "dev0").is_none());
        assert!(reg.is_registered());
        assert_eq!(reg.clear(), Some(Ctx { name: "dev1" }));
        assert!(!reg.is_registered());
    }

    #[test]
    fn test_instances_are_independent() {
        let a = ContextRegistry::new();
        let b: ContextRegistry<u32> = ContextRegistry::new();
        a.register(1u32);
        assert_eq!(a.current(), Some(1));
        assert_eq!(b.current(), None);
    }

    #[test]
    fn test_shared_across_threads() {
        let reg = Arc::new(ContextRegistry::new());
        let handles: Vec<_> = (0..4u32)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    reg.register(i);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(matches!(reg.current(), Some(0..=3)));
    }
}
