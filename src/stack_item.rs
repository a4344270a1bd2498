//! Tagged runtime values manipulated by the evaluation stack.
//!
//! Compound values (arrays, structs, maps) and buffers are shared by
//! reference: cloning a [`StackItem`] clones the handle, not the contents,
//! and equality for those variants is identity. The reference counter
//! observes items through [`StackItem::sub_items`] and the identity keys
//! from [`StackItem::identity`].

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::error::VMError;
use crate::limits::ExecutionEngineLimits;
use crate::reference_counter::ReferenceCounter;
use crate::script::Script;

/// Wire-level stack item type identifiers.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ItemType {
    Any = 0x00,
    Pointer = 0x10,
    Boolean = 0x20,
    Integer = 0x21,
    ByteString = 0x28,
    Buffer = 0x30,
    Array = 0x40,
    Struct = 0x41,
    Map = 0x48,
    InteropInterface = 0x60,
}

impl TryFrom<u8> for ItemType {
    type Error = VMError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ItemType::Any),
            0x10 => Ok(ItemType::Pointer),
            0x20 => Ok(ItemType::Boolean),
            0x21 => Ok(ItemType::Integer),
            0x28 => Ok(ItemType::ByteString),
            0x30 => Ok(ItemType::Buffer),
            0x40 => Ok(ItemType::Array),
            0x41 => Ok(ItemType::Struct),
            0x48 => Ok(ItemType::Map),
            0x60 => Ok(ItemType::InteropInterface),
            _ => Err(VMError::UndefinedType { value }),
        }
    }
}

impl ItemType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ItemType::Any => "Any",
            ItemType::Pointer => "Pointer",
            ItemType::Boolean => "Boolean",
            ItemType::Integer => "Integer",
            ItemType::ByteString => "ByteString",
            ItemType::Buffer => "Buffer",
            ItemType::Array => "Array",
            ItemType::Struct => "Struct",
            ItemType::Map => "Map",
            ItemType::InteropInterface => "InteropInterface",
        }
    }
}

/// Largest minimal two's-complement width of an Integer item, in bytes.
pub const MAX_INTEGER_SIZE: usize = 32;

/// Largest key span accepted by map operations, in bytes.
pub const MAX_KEY_SIZE: usize = 64;

/// A value on the evaluation stack.
#[derive(Clone)]
pub enum StackItem {
    Null,
    Boolean(bool),
    Integer(BigInt),
    ByteString(Rc<[u8]>),
    Buffer(Rc<RefCell<Vec<u8>>>),
    Array(Rc<RefCell<Vec<StackItem>>>),
    Struct(Rc<RefCell<Vec<StackItem>>>),
    Map(Rc<RefCell<Vec<(StackItem, StackItem)>>>),
    Pointer { script: Script, position: usize },
    InteropInterface(Rc<dyn Any>),
}

/// Minimal little-endian two's-complement encoding; zero is empty.
pub fn integer_to_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        Vec::new()
    } else {
        value.to_signed_bytes_le()
    }
}

/// Decodes a little-endian two's-complement integer; empty is zero.
pub fn integer_from_bytes(bytes: &[u8]) -> BigInt {
    BigInt::from_signed_bytes_le(bytes)
}

/// Validates that an integer fits the 32-byte item bound.
pub fn assert_integer_size(value: &BigInt) -> Result<(), VMError> {
    let size = integer_to_bytes(value).len();
    if size > MAX_INTEGER_SIZE {
        return Err(VMError::IntegerTooLarge { size });
    }
    Ok(())
}

impl StackItem {
    pub fn from_int<T: Into<BigInt>>(value: T) -> Self {
        StackItem::Integer(value.into())
    }

    pub fn byte_string(bytes: Vec<u8>) -> Self {
        StackItem::ByteString(bytes.into())
    }

    pub fn buffer(bytes: Vec<u8>) -> Self {
        StackItem::Buffer(Rc::new(RefCell::new(bytes)))
    }

    pub fn new_array(items: Vec<StackItem>) -> Self {
        StackItem::Array(Rc::new(RefCell::new(items)))
    }

    pub fn new_struct(items: Vec<StackItem>) -> Self {
        StackItem::Struct(Rc::new(RefCell::new(items)))
    }

    pub fn new_map() -> Self {
        StackItem::Map(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            StackItem::Null => ItemType::Any,
            StackItem::Boolean(_) => ItemType::Boolean,
            StackItem::Integer(_) => ItemType::Integer,
            StackItem::ByteString(_) => ItemType::ByteString,
            StackItem::Buffer(_) => ItemType::Buffer,
            StackItem::Array(_) => ItemType::Array,
            StackItem::Struct(_) => ItemType::Struct,
            StackItem::Map(_) => ItemType::Map,
            StackItem::Pointer { .. } => ItemType::Pointer,
            StackItem::InteropInterface(_) => ItemType::InteropInterface,
        }
    }

    /// Returns the type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            StackItem::Null => "Null",
            other => other.item_type().as_str(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StackItem::Null)
    }

    /// Boolean, Integer and ByteString are the primitive variants.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_)
        )
    }

    pub fn is_compound(&self) -> bool {
        matches!(
            self,
            StackItem::Array(_) | StackItem::Struct(_) | StackItem::Map(_)
        )
    }

    /// Whether the reference counter tracks this variant (compounds and
    /// buffers, the heap-weight items).
    pub(crate) fn is_tracked(&self) -> bool {
        self.is_compound() || matches!(self, StackItem::Buffer(_))
    }

    /// Stable identity of a tracked item while any handle is alive.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            StackItem::Array(rc) | StackItem::Struct(rc) => {
                Some(Rc::as_ptr(rc) as *const () as usize)
            }
            StackItem::Map(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            StackItem::Buffer(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            _ => None,
        }
    }

    /// Direct children of a compound, in container order (map keys and
    /// values interleaved). Empty for everything else.
    pub(crate) fn sub_items(&self) -> Vec<StackItem> {
        match self {
            StackItem::Array(rc) | StackItem::Struct(rc) => rc.borrow().clone(),
            StackItem::Map(rc) => rc
                .borrow()
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Boolean coercion. Defined for every variant.
    pub fn get_boolean(&self) -> bool {
        match self {
            StackItem::Null => false,
            StackItem::Boolean(b) => *b,
            StackItem::Integer(v) => !v.is_zero(),
            StackItem::ByteString(bytes) => bytes.iter().any(|b| *b != 0),
            StackItem::Buffer(bytes) => bytes.borrow().iter().any(|b| *b != 0),
            _ => true,
        }
    }

    /// Integer coercion for primitives and buffers.
    ///
    /// Byte sequences decode as little-endian two's-complement and must not
    /// exceed [`MAX_INTEGER_SIZE`] bytes.
    pub fn get_integer(&self) -> Result<BigInt, VMError> {
        match self {
            StackItem::Boolean(b) => Ok(if *b { BigInt::one() } else { BigInt::zero() }),
            StackItem::Integer(v) => Ok(v.clone()),
            StackItem::ByteString(bytes) => decode_integer(bytes),
            StackItem::Buffer(bytes) => decode_integer(&bytes.borrow()),
            other => Err(VMError::WrongType {
                op: "integer coercion",
                expected: "Boolean, Integer, ByteString or Buffer",
                actual: other.type_name(),
            }),
        }
    }

    /// Byte view of primitives and buffers.
    pub fn get_span(&self) -> Result<Vec<u8>, VMError> {
        match self {
            StackItem::Boolean(b) => Ok(vec![u8::from(*b)]),
            StackItem::Integer(v) => Ok(integer_to_bytes(v)),
            StackItem::ByteString(bytes) => Ok(bytes.to_vec()),
            StackItem::Buffer(bytes) => Ok(bytes.borrow().clone()),
            other => Err(VMError::WrongType {
                op: "span coercion",
                expected: "Boolean, Integer, ByteString or Buffer",
                actual: other.type_name(),
            }),
        }
    }

    /// Item equality.
    ///
    /// Null equals only Null; primitives compare by byte span (so an
    /// Integer equals the ByteString holding its encoding); buffers,
    /// compounds and interop handles compare by identity; pointers by
    /// script and position.
    pub fn equals(&self, other: &StackItem) -> bool {
        match (self, other) {
            (StackItem::Null, StackItem::Null) => true,
            (StackItem::Boolean(a), StackItem::Boolean(b)) => a == b,
            (StackItem::Integer(a), StackItem::Integer(b)) => a == b,
            (StackItem::ByteString(a), StackItem::ByteString(b)) => a == b,
            (a, b) if a.is_primitive() && b.is_primitive() => {
                // get_span cannot fail for primitives
                a.get_span().unwrap_or_default() == b.get_span().unwrap_or_default()
            }
            (StackItem::Buffer(a), StackItem::Buffer(b)) => Rc::ptr_eq(a, b),
            (StackItem::Array(a), StackItem::Array(b)) => Rc::ptr_eq(a, b),
            (StackItem::Struct(a), StackItem::Struct(b)) => Rc::ptr_eq(a, b),
            (StackItem::Map(a), StackItem::Map(b)) => Rc::ptr_eq(a, b),
            (
                StackItem::Pointer { script, position },
                StackItem::Pointer {
                    script: other_script,
                    position: other_position,
                },
            ) => position == other_position && script == other_script,
            (StackItem::InteropInterface(a), StackItem::InteropInterface(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Converts this item to `target`.
    ///
    /// Identity conversions always succeed; every variant converts to
    /// Boolean via [`get_boolean`](Self::get_boolean); primitives and
    /// buffers convert among themselves; arrays and structs convert into
    /// each other (sharing children). Everything else is illegal.
    pub fn convert_to(
        &self,
        target: ItemType,
        counter: &ReferenceCounter,
    ) -> Result<StackItem, VMError> {
        if self.item_type() == target {
            return Ok(self.clone());
        }
        if target == ItemType::Boolean {
            return Ok(StackItem::Boolean(self.get_boolean()));
        }
        let converted = match (self, target) {
            (
                StackItem::Boolean(_)
                | StackItem::Integer(_)
                | StackItem::ByteString(_)
                | StackItem::Buffer(_),
                ItemType::Integer,
            ) => StackItem::Integer(self.get_integer()?),
            (
                StackItem::Boolean(_)
                | StackItem::Integer(_)
                | StackItem::ByteString(_)
                | StackItem::Buffer(_),
                ItemType::ByteString,
            ) => StackItem::byte_string(self.get_span()?),
            (
                StackItem::Boolean(_)
                | StackItem::Integer(_)
                | StackItem::ByteString(_)
                | StackItem::Buffer(_),
                ItemType::Buffer,
            ) => StackItem::buffer(self.get_span()?),
            (StackItem::Array(items), ItemType::Struct) => {
                new_sibling_compound(items, counter, StackItem::new_struct)
            }
            (StackItem::Struct(items), ItemType::Array) => {
                new_sibling_compound(items, counter, StackItem::new_array)
            }
            _ => {
                return Err(VMError::InvalidConversion {
                    from: self.type_name(),
                    to: target.as_str(),
                })
            }
        };
        Ok(converted)
    }

    /// Deep copy of a struct: nested structs are cloned recursively while
    /// arrays, maps and buffers stay shared. The total number of copied
    /// sub-items is bounded by MaxStackSize.
    ///
    /// Fails with a type error on any other variant.
    pub fn struct_clone(
        &self,
        counter: &ReferenceCounter,
        limits: &ExecutionEngineLimits,
    ) -> Result<StackItem, VMError> {
        let StackItem::Struct(items) = self else {
            return Err(VMError::WrongType {
                op: "struct clone",
                expected: "Struct",
                actual: self.type_name(),
            });
        };
        let mut budget = limits.max_stack_size;
        clone_struct_items(&items.borrow(), counter, limits, &mut budget)
    }

    /// Short rendering used in unhandled-exception messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            StackItem::Boolean(b) => b.to_string(),
            StackItem::Integer(v) => v.to_string(),
            StackItem::ByteString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            other => other.type_name().to_string(),
        }
    }
}

fn decode_integer(bytes: &[u8]) -> Result<BigInt, VMError> {
    if bytes.len() > MAX_INTEGER_SIZE {
        return Err(VMError::IntegerTooLarge { size: bytes.len() });
    }
    Ok(integer_from_bytes(bytes))
}

/// Builds an array-from-struct or struct-from-array sharing the source's
/// children, registering the new parent's child edges.
fn new_sibling_compound(
    items: &Rc<RefCell<Vec<StackItem>>>,
    counter: &ReferenceCounter,
    build: fn(Vec<StackItem>) -> StackItem,
) -> StackItem {
    let compound = build(items.borrow().clone());
    counter.add_child_references(&compound);
    compound
}

fn clone_struct_items(
    items: &[StackItem],
    counter: &ReferenceCounter,
    limits: &ExecutionEngineLimits,
    budget: &mut usize,
) -> Result<StackItem, VMError> {
    let mut cloned = Vec::with_capacity(items.len());
    for item in items {
        *budget = budget.checked_sub(1).ok_or(VMError::StackOverflow {
            count: limits.max_stack_size + 1,
            max: limits.max_stack_size,
        })?;
        let copy = match item {
            StackItem::Struct(inner) => {
                clone_struct_items(&inner.borrow(), counter, limits, budget)?
            }
            other => other.clone(),
        };
        cloned.push(copy);
    }
    let result = StackItem::new_struct(cloned);
    counter.add_child_references(&result);
    Ok(result)
}

impl fmt::Debug for StackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackItem::Null => write!(f, "Null"),
            StackItem::Boolean(b) => write!(f, "Boolean({b})"),
            StackItem::Integer(v) => write!(f, "Integer({v})"),
            StackItem::ByteString(bytes) => write!(f, "ByteString({bytes:02X?})"),
            StackItem::Buffer(bytes) => write!(f, "Buffer({:02X?})", bytes.borrow()),
            StackItem::Array(items) => write!(f, "Array[{}]", items.borrow().len()),
            StackItem::Struct(items) => write!(f, "Struct[{}]", items.borrow().len()),
            StackItem::Map(pairs) => write!(f, "Map[{}]", pairs.borrow().len()),
            StackItem::Pointer { position, .. } => write!(f, "Pointer({position})"),
            StackItem::InteropInterface(_) => write!(f, "InteropInterface"),
        }
    }
}

/// Validates a map key: a primitive whose span fits the key bound.
pub(crate) fn assert_map_key(key: &StackItem) -> Result<(), VMError> {
    if !key.is_primitive() {
        return Err(VMError::WrongType {
            op: "map key",
            expected: "Boolean, Integer or ByteString",
            actual: key.type_name(),
        });
    }
    let size = key.get_span()?.len();
    if size > MAX_KEY_SIZE {
        return Err(VMError::KeyTooLarge {
            size,
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

/// Converts an integer index operand to `usize`, rejecting negatives.
pub(crate) fn index_to_usize(op: &'static str, value: &BigInt) -> Result<usize, VMError> {
    if value.is_negative() {
        return Err(VMError::NegativeCount {
            op,
            count: value.to_i64().unwrap_or(i64::MIN),
        });
    }
    value.to_usize().ok_or_else(|| VMError::NumberOutOfRange {
        op,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_coercion() {
        assert!(!StackItem::Null.get_boolean());
        assert!(StackItem::Boolean(true).get_boolean());
        assert!(!StackItem::from_int(0).get_boolean());
        assert!(StackItem::from_int(-3).get_boolean());
        assert!(!StackItem::byte_string(vec![0, 0]).get_boolean());
        assert!(StackItem::byte_string(vec![0, 1]).get_boolean());
        assert!(StackItem::new_array(vec![]).get_boolean());
    }

    #[test]
    fn integer_coercion() {
        assert_eq!(
            StackItem::Boolean(true).get_integer().unwrap(),
            BigInt::one()
        );
        assert_eq!(
            StackItem::byte_string(vec![]).get_integer().unwrap(),
            BigInt::zero()
        );
        assert_eq!(
            StackItem::byte_string(vec![0xFF]).get_integer().unwrap(),
            BigInt::from(-1)
        );
        assert_eq!(
            StackItem::byte_string(vec![0x00, 0x01]).get_integer().unwrap(),
            BigInt::from(256)
        );
        assert!(matches!(
            StackItem::byte_string(vec![0; 33]).get_integer(),
            Err(VMError::IntegerTooLarge { size: 33 })
        ));
        assert!(StackItem::new_map().get_integer().is_err());
    }

    #[test]
    fn integer_bytes_are_minimal_little_endian() {
        assert_eq!(integer_to_bytes(&BigInt::zero()), Vec::<u8>::new());
        assert_eq!(integer_to_bytes(&BigInt::from(127)), vec![0x7F]);
        assert_eq!(integer_to_bytes(&BigInt::from(128)), vec![0x80, 0x00]);
        assert_eq!(integer_to_bytes(&BigInt::from(-128)), vec![0x80]);
        assert_eq!(integer_from_bytes(&[0x80, 0x00]), BigInt::from(128));
    }

    #[test]
    fn primitive_equality_is_span_equality() {
        let int_one = StackItem::from_int(1);
        let bytes_one = StackItem::byte_string(vec![1]);
        let bool_true = StackItem::Boolean(true);
        assert!(int_one.equals(&bytes_one));
        assert!(bool_true.equals(&int_one));
        // zero encodes as empty, the false byte does not
        assert!(!StackItem::Boolean(false).equals(&StackItem::from_int(0)));
        assert!(StackItem::from_int(0).equals(&StackItem::byte_string(vec![])));
    }

    #[test]
    fn compound_equality_is_identity() {
        let a = StackItem::new_array(vec![StackItem::from_int(1)]);
        let b = StackItem::new_array(vec![StackItem::from_int(1)]);
        assert!(a.equals(&a.clone()));
        assert!(!a.equals(&b));
        let buf = StackItem::buffer(vec![1]);
        assert!(buf.equals(&buf.clone()));
        assert!(!buf.equals(&StackItem::buffer(vec![1])));
    }

    #[test]
    fn null_equals_only_null() {
        assert!(StackItem::Null.equals(&StackItem::Null));
        assert!(!StackItem::Null.equals(&StackItem::from_int(0)));
    }

    #[test]
    fn conversions() {
        let counter = ReferenceCounter::new();
        let item = StackItem::from_int(256);
        let bytes = item.convert_to(ItemType::ByteString, &counter).unwrap();
        assert!(matches!(&bytes, StackItem::ByteString(b) if b.as_ref() == [0x00, 0x01]));
        let back = bytes.convert_to(ItemType::Integer, &counter).unwrap();
        assert!(back.equals(&item));

        // anything converts to Boolean
        let arr = StackItem::new_array(vec![]);
        assert!(matches!(
            arr.convert_to(ItemType::Boolean, &counter),
            Ok(StackItem::Boolean(true))
        ));

        // Map to Integer is illegal
        assert!(matches!(
            StackItem::new_map().convert_to(ItemType::Integer, &counter),
            Err(VMError::InvalidConversion { .. })
        ));
    }

    #[test]
    fn convert_to_same_type_is_identity() {
        let counter = ReferenceCounter::new();
        let item = StackItem::byte_string(b"abc".to_vec());
        let converted = item.convert_to(ItemType::ByteString, &counter).unwrap();
        assert!(converted.equals(&item));
    }

    #[test]
    fn array_struct_conversion_shares_children() {
        let counter = ReferenceCounter::new();
        let inner = StackItem::buffer(vec![7]);
        let array = StackItem::new_array(vec![inner.clone()]);
        let st = array.convert_to(ItemType::Struct, &counter).unwrap();
        let StackItem::Struct(items) = &st else {
            panic!("expected struct");
        };
        assert!(items.borrow()[0].equals(&inner));
    }

    #[test]
    fn struct_clone_copies_nested_structs_only() {
        let counter = ReferenceCounter::new();
        let limits = ExecutionEngineLimits::default();
        let shared_array = StackItem::new_array(vec![]);
        let inner = StackItem::new_struct(vec![StackItem::from_int(5)]);
        let outer = StackItem::new_struct(vec![inner.clone(), shared_array.clone()]);
        let copy = outer.struct_clone(&counter, &limits).unwrap();

        let StackItem::Struct(items) = &copy else {
            panic!("expected struct");
        };
        let items = items.borrow();
        // nested struct was replaced by a fresh copy
        assert!(!items[0].equals(&inner));
        let StackItem::Struct(nested) = &items[0] else {
            panic!("expected struct");
        };
        assert!(nested.borrow()[0].equals(&StackItem::from_int(5)));
        // the array is still the same object
        assert!(items[1].equals(&shared_array));
    }

    #[test]
    fn struct_clone_is_budgeted() {
        let counter = ReferenceCounter::new();
        let limits = ExecutionEngineLimits {
            max_stack_size: 3,
            ..Default::default()
        };
        let wide = StackItem::new_struct(vec![
            StackItem::from_int(1),
            StackItem::from_int(2),
            StackItem::from_int(3),
            StackItem::from_int(4),
        ]);
        assert!(matches!(
            wide.struct_clone(&counter, &limits),
            Err(VMError::StackOverflow { .. })
        ));
    }
}
