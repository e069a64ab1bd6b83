/// Fixed-capacity circular buffer.
///
/// Overflow behavior: drops the oldest entries. Wrap in
/// `Arc<parking_lot::Mutex<RingBuffer<T>>>` for cross-thread access.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
        }
    }

    /// Appends `item`, returning the entry it displaced when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let displaced = if self.available == self.capacity {
            let old = self.slots[self.read_index].take();
            self.read_index = (self.read_index + 1) % self.capacity;
            self.available -= 1;
            old
        } else {
            None
        };

        self.slots[self.write_index] = Some(item);
        self.write_index = (self.write_index + 1) % self.capacity;
        self.available += 1;
        displaced
    }

    /// Removes and returns the oldest entry.
    pub fn pop(&mut self) -> Option<T> {
        if self.available == 0 {
            return None;
        }
        let item = self.slots[self.read_index].take();
        self.read_index = (self.read_index + 1) % self.capacity;
        self.available -= 1;
        item
    }

    /// Removes and returns up to `count` entries, oldest first.
    pub fn read(&mut self, count: usize) -> Vec<T> {
        let to_read = count.min(self.available);
        let mut result = Vec::with_capacity(to_read);
        for _ in 0..to_read {
            if let Some(item) = self.pop() {
                result.push(item);
            }
        }
        result
    }

    /// Number of entries currently held.
    pub fn count(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Empties the buffer.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copies all entries, oldest first, without removing them.
    pub fn snapshot(&self) -> Vec<T> {
        (0..self.available)
            .filter_map(|i| self.slots[(self.read_index + i) % self.capacity].clone())
            .collect()
    }
}
