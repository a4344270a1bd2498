//! Fixed-length item storage for static fields, locals and arguments.

use crate::error::VMError;
use crate::reference_counter::ReferenceCounter;
use crate::stack_item::StackItem;

/// A fixed-length indexed sequence of stack items.
///
/// Every item held by a slot carries a stack reference; the references are
/// released by [`clear_references`](Self::clear_references) when the owning
/// frame unloads.
pub struct Slot {
    items: Vec<StackItem>,
    counter: ReferenceCounter,
}

impl Slot {
    /// Creates a slot of `count` nulls.
    pub fn new(count: usize, counter: ReferenceCounter) -> Self {
        let items = vec![StackItem::Null; count];
        counter.add_stack_references(&StackItem::Null, count);
        Self { items, counter }
    }

    /// Creates a slot holding `items` in order.
    pub fn with_items(items: Vec<StackItem>, counter: ReferenceCounter) -> Self {
        for item in &items {
            counter.add_stack_reference(item);
        }
        Self { items, counter }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the item at `index`.
    pub fn get(&self, index: usize) -> Result<StackItem, VMError> {
        self.items
            .get(index)
            .cloned()
            .ok_or(VMError::IndexOutOfRange {
                op: "slot load",
                index: index as i64,
                length: self.items.len(),
            })
    }

    /// Replaces the item at `index`.
    pub fn set(&mut self, index: usize, item: StackItem) -> Result<(), VMError> {
        let length = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(VMError::IndexOutOfRange {
                op: "slot store",
                index: index as i64,
                length,
            })?;
        self.counter.remove_stack_reference(slot);
        self.counter.add_stack_reference(&item);
        *slot = item;
        Ok(())
    }

    /// Releases the stack references of every held item.
    pub fn clear_references(&mut self) {
        for item in &self.items {
            self.counter.remove_stack_reference(item);
        }
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_slot_is_null_filled() {
        let counter = ReferenceCounter::new();
        let slot = Slot::new(3, counter.clone());
        assert_eq!(slot.len(), 3);
        assert!(slot.get(0).unwrap().is_null());
        assert_eq!(counter.count(), 3);
    }

    #[test]
    fn set_swaps_references() {
        let counter = ReferenceCounter::new();
        let mut slot = Slot::new(1, counter.clone());
        slot.set(0, StackItem::from_int(42)).unwrap();
        assert_eq!(counter.count(), 1);
        assert!(slot.get(0).unwrap().equals(&StackItem::from_int(42)));
    }

    #[test]
    fn out_of_range_access_fails() {
        let counter = ReferenceCounter::new();
        let mut slot = Slot::new(2, counter);
        assert!(matches!(
            slot.get(2),
            Err(VMError::IndexOutOfRange { index: 2, length: 2, .. })
        ));
        assert!(slot.set(5, StackItem::Null).is_err());
    }

    #[test]
    fn clear_references_releases_everything() {
        let counter = ReferenceCounter::new();
        let mut slot = Slot::with_items(
            vec![StackItem::from_int(1), StackItem::from_int(2)],
            counter.clone(),
        );
        assert_eq!(counter.count(), 2);
        slot.clear_references();
        assert_eq!(counter.check_zero_referred(), 0);
    }
}
