use slotmap::{Key, SlotMap, new_key_type};

use crate::error::{GpuError, Result};

new_key_type! {
    pub struct BufferHandle;
    pub struct PipelineHandle;
    pub struct ShaderHandle;
}

/// Numeric identity of a handle. The null key (`0`-equivalent) is never handed out.
pub trait HandleExt: Key {
    #[inline(always)]
    fn to_raw(&self) -> u64 {
        self.data().as_ffi()
    }

    #[inline(always)]
    fn is_valid(&self) -> bool {
        !self.is_null()
    }
}

impl<K: Key> HandleExt for K {}

/// Handle table mapping generational keys to resource records.
///
/// A slot index may be recycled after `destroy`, but its generation is bumped, so the
/// old key stays stale and its raw value is never returned again by this registry.
pub struct Registry<K: Key, T> {
    kind: &'static str,
    slots: SlotMap<K, T>,
}

impl<K: Key, T> Registry<K, T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slots: SlotMap::with_key(),
        }
    }

    pub fn with_capacity(kind: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            slots: SlotMap::with_capacity_and_key(capacity),
        }
    }

    #[inline(always)]
    pub fn create(&mut self, value: T) -> K {
        self.slots.insert(value)
    }

    /// Removes the mapping and hands the record back so the caller can release it.
    #[inline(always)]
    pub fn destroy(&mut self, handle: K) -> Option<T> {
        self.slots.remove(handle)
    }

    pub fn get(&self, handle: K) -> Result<&T> {
        self.slots.get(handle).ok_or_else(|| self.invalid(handle))
    }

    pub fn get_mut(&mut self, handle: K) -> Result<&mut T> {
        let kind = self.kind;
        self.slots
            .get_mut(handle)
            .ok_or_else(|| GpuError::InvalidHandle {
                kind,
                raw: handle.to_raw(),
            })
    }

    #[inline(always)]
    pub fn contains(&self, handle: K) -> bool {
        self.slots.contains_key(handle)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline(always)]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (K, T)> + '_ {
        self.slots.drain()
    }

    fn invalid(&self, handle: K) -> GpuError {
        GpuError::InvalidHandle {
            kind: self.kind,
            raw: handle.to_raw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Record {
        size: u64,
    }

    #[test]
    fn create_then_get_returns_inserted_record() {
        let mut registry: Registry<BufferHandle, Record> = Registry::new("buffer");
        let handle = registry.create(Record { size: 36 });

        assert!(handle.is_valid());
        assert_eq!(registry.get(handle).unwrap(), &Record { size: 36 });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn destroy_returns_record_and_get_fails_afterwards() {
        let mut registry: Registry<BufferHandle, Record> = Registry::new("buffer");
        let handle = registry.create(Record { size: 12 });

        assert_eq!(registry.destroy(handle), Some(Record { size: 12 }));
        assert!(registry.destroy(handle).is_none());

        match registry.get(handle) {
            Err(GpuError::InvalidHandle { kind, raw }) => {
                assert_eq!(kind, "buffer");
                assert_eq!(raw, handle.to_raw());
            }
            other => panic!("expected InvalidHandle, got {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn null_handle_is_rejected() {
        let registry: Registry<PipelineHandle, Record> = Registry::new("pipeline");
        let handle = PipelineHandle::null();

        assert!(!handle.is_valid());
        assert!(registry.get(handle).is_err());
    }

    #[test]
    fn destroyed_handle_values_are_never_reused() {
        let mut registry: Registry<BufferHandle, Record> = Registry::new("buffer");
        let mut seen = HashSet::new();

        for round in 0..64 {
            let handle = registry.create(Record { size: round });
            assert!(seen.insert(handle.to_raw()), "raw handle reused");
            registry.destroy(handle);
        }

        let stale = registry.create(Record { size: 0 });
        registry.destroy(stale);
        let fresh = registry.create(Record { size: 1 });

        assert_ne!(stale, fresh);
        assert!(registry.get(stale).is_err());
        assert_eq!(registry.get(fresh).unwrap().size, 1);
    }

    #[test]
    fn get_mut_updates_record() {
        let mut registry: Registry<ShaderHandle, Record> = Registry::new("shader");
        let handle = registry.create(Record { size: 4 });

        registry.get_mut(handle).unwrap().size = 8;

        assert_eq!(registry.get(handle).unwrap().size, 8);
    }

    #[test]
    fn drain_empties_registry() {
        let mut registry: Registry<BufferHandle, Record> = Registry::with_capacity("buffer", 4);
        let first = registry.create(Record { size: 1 });
        let second = registry.create(Record { size: 2 });

        let drained: Vec<_> = registry.drain().map(|(handle, _)| handle).collect();

        assert_eq!(drained.len(), 2);
        assert!(drained.contains(&first) && drained.contains(&second));
        assert!(registry.is_empty());
        assert!(!registry.contains(first));
    }
}
