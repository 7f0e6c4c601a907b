//! Virtual memory of the VM.
//!
//! Memory is a table of slots addressed by [`VirtualPointer`]. Slot 0 is the
//! null slot and never valid; slot 1 is the static data slot holding the
//! program image followed by the stack. Every heap allocation occupies its
//! own slot, which makes use-after-free detectable: deallocation marks the
//! slot dead without recycling its index.

use scatha_asm::{VirtualPointer, STATIC_DATA_SLOT};

use crate::error::{MemoryAccessKind, VmError, VmResult};

#[derive(Debug, Clone, Default)]
struct Slot {
    data: Vec<u8>,
    live: bool,
}

/// Slot-table backed memory.
#[derive(Debug, Clone)]
pub struct VirtualMemory {
    slots: Vec<Slot>,
}

impl Default for VirtualMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMemory {
    pub fn new() -> Self {
        Self {
            // Null slot and static data slot.
            slots: vec![
                Slot::default(),
                Slot { data: Vec::new(), live: true },
            ],
        }
    }

    /// Grow the static data slot to `size` bytes.
    pub fn resize_static_slot(&mut self, size: usize) {
        let slot = &mut self.slots[STATIC_DATA_SLOT as usize];
        slot.data.resize(size, 0);
        slot.live = true;
    }

    /// Allocate a fresh block. The returned pointer starts at offset 0 of a
    /// new slot, so it satisfies any alignment.
    pub fn allocate(&mut self, size: u64, _align: u64) -> VirtualPointer {
        let slot = self.slots.len() as u16;
        self.slots.push(Slot { data: vec![0; size as usize], live: true });
        VirtualPointer::new(slot, 0)
    }

    /// Release a block. The slot index is never reused, so stale pointers
    /// into it raise `UseAfterFree`.
    pub fn deallocate(
        &mut self,
        ptr: VirtualPointer,
        size: u64,
        _align: u64,
    ) -> VmResult<()> {
        let slot = self
            .slots
            .get_mut(ptr.slot as usize)
            .filter(|slot| slot.live)
            .ok_or(VmError::MemoryAccess {
                kind: MemoryAccessKind::UseAfterFree,
                ptr,
                size: size as usize,
            })?;
        if ptr.offset != 0 || slot.data.len() as u64 != size {
            return Err(VmError::MemoryAccess {
                kind: MemoryAccessKind::OutOfRange,
                ptr,
                size: size as usize,
            });
        }
        slot.data = Vec::new();
        slot.live = false;
        Ok(())
    }

    /// Number of valid bytes reachable from `ptr`, or an error if the pointer
    /// does not point into a live slot.
    pub fn valid_range(&self, ptr: VirtualPointer) -> VmResult<usize> {
        let slot = self
            .slots
            .get(ptr.slot as usize)
            .ok_or_else(|| self.access_error(ptr, 0))?;
        if !slot.live {
            return Err(VmError::MemoryAccess {
                kind: MemoryAccessKind::UseAfterFree,
                ptr,
                size: 0,
            });
        }
        (slot.data.len() as u64)
            .checked_sub(ptr.offset)
            .map(|rest| rest as usize)
            .ok_or_else(|| self.access_error(ptr, 0))
    }

    /// Borrow `[ptr, ptr + size)` if it lies wholly within a live slot.
    pub fn dereference(
        &self,
        ptr: VirtualPointer,
        size: usize,
    ) -> VmResult<&[u8]> {
        let (start, end) = self.check(ptr, size)?;
        Ok(&self.slots[ptr.slot as usize].data[start..end])
    }

    /// Mutable variant of [`Self::dereference`].
    pub fn dereference_mut(
        &mut self,
        ptr: VirtualPointer,
        size: usize,
    ) -> VmResult<&mut [u8]> {
        let (start, end) = self.check(ptr, size)?;
        Ok(&mut self.slots[ptr.slot as usize].data[start..end])
    }

    pub fn read<const N: usize>(&self, ptr: VirtualPointer) -> VmResult<[u8; N]> {
        let bytes = self.dereference(ptr, N)?;
        Ok(bytes.try_into().unwrap())
    }

    pub fn write(&mut self, ptr: VirtualPointer, bytes: &[u8]) -> VmResult<()> {
        self.dereference_mut(ptr, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    fn check(&self, ptr: VirtualPointer, size: usize) -> VmResult<(usize, usize)> {
        let slot = self
            .slots
            .get(ptr.slot as usize)
            .ok_or_else(|| self.access_error(ptr, size))?;
        if ptr.slot == 0 {
            return Err(self.access_error(ptr, size));
        }
        if !slot.live {
            return Err(VmError::MemoryAccess {
                kind: MemoryAccessKind::UseAfterFree,
                ptr,
                size,
            });
        }
        let start = ptr.offset as usize;
        let end = start.checked_add(size).filter(|end| *end <= slot.data.len());
        match end {
            Some(end) => Ok((start, end)),
            None => Err(self.access_error(ptr, size)),
        }
    }

    fn access_error(&self, ptr: VirtualPointer, size: usize) -> VmError {
        VmError::MemoryAccess { kind: MemoryAccessKind::OutOfRange, ptr, size }
    }
}

/// Alignment check raised on misaligned loads and stores.
pub fn check_aligned(
    ptr: VirtualPointer,
    size: usize,
    store: bool,
) -> VmResult<()> {
    if ptr.offset % size as u64 != 0 {
        return Err(VmError::MemoryAccess {
            kind: if store {
                MemoryAccessKind::MisalignedStore
            } else {
                MemoryAccessKind::MisalignedLoad
            },
            ptr,
            size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_access() {
        let mut memory = VirtualMemory::new();
        let ptr = memory.allocate(16, 8);
        memory.write(ptr, &[1, 2, 3, 4]).unwrap();
        assert_eq!(memory.dereference(ptr, 4).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(memory.valid_range(ptr).unwrap(), 16);
        assert_eq!(memory.valid_range(ptr.wrapping_offset(10)).unwrap(), 6);
    }

    #[test]
    fn out_of_range_access_fails() {
        let mut memory = VirtualMemory::new();
        let ptr = memory.allocate(8, 8);
        let err = memory.dereference(ptr.wrapping_offset(4), 8).unwrap_err();
        assert!(matches!(
            err,
            VmError::MemoryAccess { kind: MemoryAccessKind::OutOfRange, .. }
        ));
    }

    #[test]
    fn use_after_free_is_detected() {
        let mut memory = VirtualMemory::new();
        let ptr = memory.allocate(8, 8);
        memory.deallocate(ptr, 8, 8).unwrap();
        let err = memory.dereference(ptr, 1).unwrap_err();
        assert!(matches!(
            err,
            VmError::MemoryAccess { kind: MemoryAccessKind::UseAfterFree, .. }
        ));
    }

    #[test]
    fn null_pointer_never_dereferences() {
        let memory = VirtualMemory::new();
        assert!(memory.dereference(VirtualPointer::NULL, 1).is_err());
    }
}
