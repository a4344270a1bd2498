//! Compound-type construction and manipulation, and the type tests.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::engine::ExecutionEngine;
use crate::error::VMError;
use crate::instruction::Instruction;
use crate::stack_item::{assert_map_key, ItemType, StackItem};

/// Position of `key` in a map's pairs, by item equality.
fn find_key(pairs: &[(StackItem, StackItem)], key: &StackItem) -> Option<usize> {
    pairs.iter().position(|(k, _)| k.equals(key))
}

impl ExecutionEngine {
    /// Pops the element count for NEWARRAY/NEWSTRUCT, bounded by
    /// MaxStackSize.
    pub(super) fn op_new_compound_count(&mut self) -> Result<usize, VMError> {
        let count = self.pop_index("NEWARRAY")?;
        let max = self.limits().max_stack_size;
        if count > max {
            return Err(VMError::StackOverflow { count, max });
        }
        Ok(count)
    }

    pub(super) fn op_new_compound(&mut self, count: usize, is_struct: bool) -> Result<(), VMError> {
        self.fill_and_push(count, is_struct, StackItem::Null)
    }

    /// NEWARRAY_T: the operand must name a defined item type, but only the
    /// primitive types select a non-null default; every other defined type
    /// fills with nulls.
    pub(super) fn op_new_array_t(&mut self, instruction: &Instruction) -> Result<(), VMError> {
        let item_type = ItemType::try_from(instruction.token_u8())?;
        let count = self.op_new_compound_count()?;
        let default = match item_type {
            ItemType::Boolean => StackItem::Boolean(false),
            ItemType::Integer => StackItem::from_int(0),
            ItemType::ByteString => StackItem::byte_string(Vec::new()),
            _ => StackItem::Null,
        };
        self.fill_and_push(count, false, default)
    }

    fn fill_and_push(
        &mut self,
        count: usize,
        is_struct: bool,
        default: StackItem,
    ) -> Result<(), VMError> {
        let items = vec![default; count];
        let compound = if is_struct {
            StackItem::new_struct(items)
        } else {
            StackItem::new_array(items)
        };
        self.reference_counter().add_child_references(&compound);
        self.push(compound)
    }

    /// PACK: pops n then n items; the first popped becomes element 0.
    pub(super) fn op_pack(&mut self) -> Result<(), VMError> {
        let items = self.pop_packed_items("PACK")?;
        let array = StackItem::new_array(items);
        self.reference_counter().add_child_references(&array);
        self.push(array)
    }

    pub(super) fn op_pack_struct(&mut self) -> Result<(), VMError> {
        let items = self.pop_packed_items("PACKSTRUCT")?;
        let packed = StackItem::new_struct(items);
        self.reference_counter().add_child_references(&packed);
        self.push(packed)
    }

    fn pop_packed_items(&mut self, op: &'static str) -> Result<Vec<StackItem>, VMError> {
        let count = self.pop_index(op)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.pop()?);
        }
        Ok(items)
    }

    /// PACKMAP: pops n then n key/value pairs, key first; a repeated key
    /// overwrites its earlier value.
    pub(super) fn op_pack_map(&mut self) -> Result<(), VMError> {
        let count = self.pop_index("PACKMAP")?;
        let mut pairs: Vec<(StackItem, StackItem)> = Vec::with_capacity(count);
        for _ in 0..count {
            let key = self.pop()?;
            assert_map_key(&key)?;
            let value = self.pop()?;
            match find_key(&pairs, &key) {
                Some(position) => pairs[position].1 = value,
                None => pairs.push((key, value)),
            }
        }
        let map = StackItem::Map(std::rc::Rc::new(std::cell::RefCell::new(pairs)));
        self.reference_counter().add_child_references(&map);
        self.push(map)
    }

    /// UNPACK: spreads a compound so element 0 (or the first pair) ends on
    /// top, then pushes the element count.
    pub(super) fn op_unpack(&mut self) -> Result<(), VMError> {
        let compound = self.pop()?;
        let count = match &compound {
            StackItem::Array(items) | StackItem::Struct(items) => {
                let items = items.borrow().clone();
                for item in items.iter().rev() {
                    self.push(item.clone())?;
                }
                items.len()
            }
            StackItem::Map(pairs) => {
                let pairs = pairs.borrow().clone();
                for (key, value) in pairs.iter().rev() {
                    self.push(value.clone())?;
                    self.push(key.clone())?;
                }
                pairs.len()
            }
            other => {
                return Err(VMError::WrongType {
                    op: "UNPACK",
                    expected: "Array, Struct or Map",
                    actual: other.type_name(),
                })
            }
        };
        self.push_integer(BigInt::from(count))
    }

    /// SIZE: element count of compounds, byte length of spans.
    pub(super) fn op_size(&mut self) -> Result<(), VMError> {
        let item = self.pop()?;
        let size = match &item {
            StackItem::Array(items) | StackItem::Struct(items) => items.borrow().len(),
            StackItem::Map(pairs) => pairs.borrow().len(),
            StackItem::Boolean(_)
            | StackItem::Integer(_)
            | StackItem::ByteString(_)
            | StackItem::Buffer(_) => item.get_span()?.len(),
            other => {
                return Err(VMError::WrongType {
                    op: "SIZE",
                    expected: "a collection or span",
                    actual: other.type_name(),
                })
            }
        };
        self.push_integer(BigInt::from(size))
    }

    pub(super) fn op_has_key(&mut self) -> Result<(), VMError> {
        let key = self.pop()?;
        let collection = self.pop()?;
        let found = match &collection {
            StackItem::Array(items) | StackItem::Struct(items) => {
                let index = crate::stack_item::index_to_usize("HASKEY", &key.get_integer()?)?;
                index < items.borrow().len()
            }
            StackItem::Map(pairs) => {
                assert_map_key(&key)?;
                find_key(&pairs.borrow(), &key).is_some()
            }
            StackItem::ByteString(_) | StackItem::Buffer(_) => {
                let index = crate::stack_item::index_to_usize("HASKEY", &key.get_integer()?)?;
                index < collection.get_span()?.len()
            }
            other => {
                return Err(VMError::WrongType {
                    op: "HASKEY",
                    expected: "Array, Struct, Map, ByteString or Buffer",
                    actual: other.type_name(),
                })
            }
        };
        self.push_bool(found)
    }

    pub(super) fn op_keys(&mut self) -> Result<(), VMError> {
        let map = self.pop_map("KEYS")?;
        let keys: Vec<StackItem> = map.borrow().iter().map(|(k, _)| k.clone()).collect();
        let array = StackItem::new_array(keys);
        self.reference_counter().add_child_references(&array);
        self.push(array)
    }

    /// VALUES: collection values as a new array; struct values are copied
    /// (struct-by-value container semantics).
    pub(super) fn op_values(&mut self) -> Result<(), VMError> {
        let collection = self.pop()?;
        let values: Vec<StackItem> = match &collection {
            StackItem::Array(items) | StackItem::Struct(items) => items.borrow().clone(),
            StackItem::Map(pairs) => pairs.borrow().iter().map(|(_, v)| v.clone()).collect(),
            other => {
                return Err(VMError::WrongType {
                    op: "VALUES",
                    expected: "Array, Struct or Map",
                    actual: other.type_name(),
                })
            }
        };
        let counter = self.reference_counter().clone();
        let limits = self.limits().clone();
        let mut copied = Vec::with_capacity(values.len());
        for value in values {
            copied.push(match &value {
                StackItem::Struct(_) => value.struct_clone(&counter, &limits)?,
                _ => value,
            });
        }
        let array = StackItem::new_array(copied);
        counter.add_child_references(&array);
        self.push(array)
    }

    /// PICKITEM: element of an array or map, or a single byte of a span as
    /// an integer.
    pub(super) fn op_pick_item(&mut self) -> Result<(), VMError> {
        let key = self.pop()?;
        let collection = self.pop()?;
        let picked = match &collection {
            StackItem::Array(items) | StackItem::Struct(items) => {
                let items = items.borrow();
                let index = crate::stack_item::index_to_usize("PICKITEM", &key.get_integer()?)?;
                items.get(index).cloned().ok_or(VMError::IndexOutOfRange {
                    op: "PICKITEM",
                    index: index as i64,
                    length: items.len(),
                })?
            }
            StackItem::Map(pairs) => {
                assert_map_key(&key)?;
                let pairs = pairs.borrow();
                let position = find_key(&pairs, &key).ok_or(VMError::KeyNotFound)?;
                pairs[position].1.clone()
            }
            StackItem::Boolean(_)
            | StackItem::Integer(_)
            | StackItem::ByteString(_)
            | StackItem::Buffer(_) => {
                let span = collection.get_span()?;
                let index = crate::stack_item::index_to_usize("PICKITEM", &key.get_integer()?)?;
                let byte = span.get(index).ok_or(VMError::IndexOutOfRange {
                    op: "PICKITEM",
                    index: index as i64,
                    length: span.len(),
                })?;
                StackItem::from_int(*byte)
            }
            other => {
                return Err(VMError::WrongType {
                    op: "PICKITEM",
                    expected: "a collection or span",
                    actual: other.type_name(),
                })
            }
        };
        self.push(picked)
    }

    /// APPEND: struct values are copied on insertion.
    pub(super) fn op_append(&mut self) -> Result<(), VMError> {
        let value = self.pop()?;
        let target = self.pop()?;
        let (StackItem::Array(items) | StackItem::Struct(items)) = &target else {
            return Err(VMError::WrongType {
                op: "APPEND",
                expected: "Array or Struct",
                actual: target.type_name(),
            });
        };
        let counter = self.reference_counter().clone();
        let value = match &value {
            StackItem::Struct(_) => value.struct_clone(&counter, &self.limits().clone())?,
            _ => value,
        };
        counter.add_reference(&value, &target);
        items.borrow_mut().push(value);
        Ok(())
    }

    /// SETITEM: replaces an array or struct element, sets a map entry, or
    /// writes one byte of a buffer.
    pub(super) fn op_set_item(&mut self) -> Result<(), VMError> {
        let value = self.pop()?;
        let key = self.pop()?;
        let target = self.pop()?;
        let counter = self.reference_counter().clone();
        match &target {
            StackItem::Array(items) | StackItem::Struct(items) => {
                let value = match &value {
                    StackItem::Struct(_) => value.struct_clone(&counter, &self.limits().clone())?,
                    _ => value,
                };
                let index = crate::stack_item::index_to_usize("SETITEM", &key.get_integer()?)?;
                let mut items = items.borrow_mut();
                let length = items.len();
                let slot = items.get_mut(index).ok_or(VMError::IndexOutOfRange {
                    op: "SETITEM",
                    index: index as i64,
                    length,
                })?;
                counter.remove_reference(slot, &target);
                counter.add_reference(&value, &target);
                *slot = value;
            }
            StackItem::Map(pairs) => {
                assert_map_key(&key)?;
                let value = match &value {
                    StackItem::Struct(_) => value.struct_clone(&counter, &self.limits().clone())?,
                    _ => value,
                };
                let mut pairs = pairs.borrow_mut();
                match find_key(&pairs, &key) {
                    Some(position) => {
                        counter.remove_reference(&pairs[position].1, &target);
                        counter.add_reference(&value, &target);
                        pairs[position].1 = value;
                    }
                    None => {
                        counter.add_reference(&key, &target);
                        counter.add_reference(&value, &target);
                        pairs.push((key, value));
                    }
                }
            }
            StackItem::Buffer(bytes) => {
                if !value.is_primitive() {
                    return Err(VMError::WrongType {
                        op: "SETITEM",
                        expected: "a primitive byte value",
                        actual: value.type_name(),
                    });
                }
                let byte = value.get_integer()?;
                let byte = byte
                    .to_i64()
                    .filter(|b| (i8::MIN as i64..=u8::MAX as i64).contains(b))
                    .ok_or_else(|| VMError::NumberOutOfRange {
                        op: "SETITEM",
                        value: byte.to_string(),
                    })?;
                let index = crate::stack_item::index_to_usize("SETITEM", &key.get_integer()?)?;
                let mut bytes = bytes.borrow_mut();
                let length = bytes.len();
                let slot = bytes.get_mut(index).ok_or(VMError::IndexOutOfRange {
                    op: "SETITEM",
                    index: index as i64,
                    length,
                })?;
                *slot = (byte & 0xFF) as u8;
            }
            other => {
                return Err(VMError::WrongType {
                    op: "SETITEM",
                    expected: "Array, Struct, Map or Buffer",
                    actual: other.type_name(),
                })
            }
        }
        Ok(())
    }

    pub(super) fn op_reverse_items(&mut self) -> Result<(), VMError> {
        let target = self.pop()?;
        match &target {
            StackItem::Array(items) | StackItem::Struct(items) => {
                items.borrow_mut().reverse();
                Ok(())
            }
            StackItem::Buffer(bytes) => {
                bytes.borrow_mut().reverse();
                Ok(())
            }
            other => Err(VMError::WrongType {
                op: "REVERSEITEMS",
                expected: "Array, Struct or Buffer",
                actual: other.type_name(),
            }),
        }
    }

    /// REMOVE: array element by index, map entry by key (absent keys are
    /// ignored).
    pub(super) fn op_remove(&mut self) -> Result<(), VMError> {
        let key = self.pop()?;
        let target = self.pop()?;
        let counter = self.reference_counter().clone();
        match &target {
            StackItem::Array(items) | StackItem::Struct(items) => {
                let index = crate::stack_item::index_to_usize("REMOVE", &key.get_integer()?)?;
                let mut items = items.borrow_mut();
                if index >= items.len() {
                    return Err(VMError::IndexOutOfRange {
                        op: "REMOVE",
                        index: index as i64,
                        length: items.len(),
                    });
                }
                let removed = items.remove(index);
                counter.remove_reference(&removed, &target);
                Ok(())
            }
            StackItem::Map(pairs) => {
                assert_map_key(&key)?;
                let mut pairs = pairs.borrow_mut();
                if let Some(position) = find_key(&pairs, &key) {
                    let (removed_key, removed_value) = pairs.remove(position);
                    counter.remove_reference(&removed_key, &target);
                    counter.remove_reference(&removed_value, &target);
                }
                Ok(())
            }
            other => Err(VMError::WrongType {
                op: "REMOVE",
                expected: "Array, Struct or Map",
                actual: other.type_name(),
            }),
        }
    }

    pub(super) fn op_clear_items(&mut self) -> Result<(), VMError> {
        let target = self.pop()?;
        if !target.is_compound() {
            return Err(VMError::WrongType {
                op: "CLEARITEMS",
                expected: "Array, Struct or Map",
                actual: target.type_name(),
            });
        }
        self.reference_counter().remove_child_references(&target);
        match &target {
            StackItem::Array(items) | StackItem::Struct(items) => items.borrow_mut().clear(),
            StackItem::Map(pairs) => pairs.borrow_mut().clear(),
            _ => {}
        }
        Ok(())
    }

    /// POPITEM: removes the last element of an array and pushes it.
    pub(super) fn op_pop_item(&mut self) -> Result<(), VMError> {
        let target = self.pop()?;
        let (StackItem::Array(items) | StackItem::Struct(items)) = &target else {
            return Err(VMError::WrongType {
                op: "POPITEM",
                expected: "Array or Struct",
                actual: target.type_name(),
            });
        };
        let removed = {
            let mut items = items.borrow_mut();
            items.pop().ok_or(VMError::IndexOutOfRange {
                op: "POPITEM",
                index: -1,
                length: 0,
            })?
        };
        self.reference_counter().remove_reference(&removed, &target);
        self.push(removed)
    }

    pub(super) fn op_is_null(&mut self) -> Result<(), VMError> {
        let item = self.pop()?;
        self.push_bool(item.is_null())
    }

    /// ISTYPE: the operand must be a defined type other than Any.
    pub(super) fn op_is_type(&mut self, instruction: &Instruction) -> Result<(), VMError> {
        let item_type = ItemType::try_from(instruction.token_u8())?;
        if item_type == ItemType::Any {
            return Err(VMError::IsTypeAny);
        }
        let item = self.pop()?;
        self.push_bool(item.item_type() == item_type)
    }

    pub(super) fn op_convert(&mut self, instruction: &Instruction) -> Result<(), VMError> {
        let item_type = ItemType::try_from(instruction.token_u8())?;
        let item = self.pop()?;
        let counter = self.reference_counter().clone();
        let converted = item.convert_to(item_type, &counter)?;
        self.push(converted)
    }

    fn pop_map(
        &mut self,
        op: &'static str,
    ) -> Result<std::rc::Rc<std::cell::RefCell<Vec<(StackItem, StackItem)>>>, VMError> {
        let item = self.pop()?;
        match item {
            StackItem::Map(pairs) => Ok(pairs),
            other => Err(VMError::WrongType {
                op,
                expected: "Map",
                actual: other.type_name(),
            }),
        }
    }
}
