//! Consumable buffer used by the trace pipeline

use parking_lot::Mutex;

/// Append-only buffer that is drained by a consumer and can be refilled
/// at the front when the consumer fails to hand the items off.
#[derive(Debug)]
pub struct ConsumableBucket<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for ConsumableBucket<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConsumableBucket<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn append(&self, item: T) {
        self.items.lock().push(item);
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        self.items.lock().extend(items);
    }

    /// Take every buffered item, leaving the bucket empty
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Put items back ahead of anything appended since they were drained
    pub fn insert_at_front(&self, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        let mut guard = self.items.lock();
        let newer = std::mem::replace(&mut *guard, items);
        guard.extend(newer);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T: Clone> ConsumableBucket<T> {
    /// Read every item. With `flush` the bucket is emptied as well.
    pub fn consume(&self, flush: bool) -> Vec<T> {
        if flush {
            self.drain()
        } else {
            self.items.lock().clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_consume_without_flush_keeps_items() {
        let bucket = ConsumableBucket::new();
        bucket.append(1);
        bucket.append(2);

        assert_eq!(bucket.consume(false), vec![1, 2]);
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.consume(true), vec![1, 2]);
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_restored_items_precede_newer_ones() {
        let bucket = ConsumableBucket::new();
        bucket.extend(vec!["a", "b"]);
        let drained = bucket.drain();

        bucket.append("c");
        bucket.insert_at_front(drained);

        assert_eq!(bucket.drain(), vec!["a", "b", "c"]);
    }

    proptest! {
        #[test]
        fn test_drain_restore_preserves_order(items in proptest::collection::vec(any::<u16>(), 0..64)) {
            let bucket = ConsumableBucket::new();
            bucket.extend(items.clone());
            let drained = bucket.drain();
            bucket.insert_at_front(drained);
            prop_assert_eq!(bucket.drain(), items);
        }
    }
}
