use std::mem;
use std::sync::{Mutex, MutexGuard};

/// Two-slot buffer: producers append to the write slot, a reader flips the
/// slots and takes everything accumulated since the previous swap.
#[derive(Debug)]
pub struct DoubleBuffer<T> {
    slots: Mutex<Slots<T>>,
}

#[derive(Debug)]
struct Slots<T> {
    buffers: [Vec<T>; 2],
    write_index: usize,
}

impl<T> Default for DoubleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DoubleBuffer<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                buffers: [Vec::new(), Vec::new()],
                write_index: 0,
            }),
        }
    }

    pub fn write(&self, item: T) {
        let mut slots = self.lock();
        let index = slots.write_index;
        slots.buffers[index].push(item);
    }

    /// Items come back in write order.
    pub fn swap_and_read(&self) -> Vec<T> {
        let mut slots = self.lock();
        let read_index = slots.write_index;
        slots.write_index ^= 1;
        let write_index = slots.write_index;
        slots.buffers[write_index].clear();
        mem::take(&mut slots.buffers[read_index])
    }

    /// Whether anything was written since the last swap.
    pub fn has_data(&self) -> bool {
        self.len() > 0
    }

    pub fn len(&self) -> usize {
        let slots = self.lock();
        slots.buffers[slots.write_index].len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_data()
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
