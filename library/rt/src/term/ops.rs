//! Per-type operations and the dispatchers which route to them.
//!
//! Each user-visible type has a [`ValueOps`] implementation. Operations a type
//! does not support are left at their default, which returns `None`; the
//! dispatchers on [`Heap`] turn that into the appropriate `TypeError`.
use core::cmp::Ordering;
use core::fmt;

use crate::error::{Exception, RtResult};
use crate::heap::Heap;
use crate::refs::Reference;

use super::dict::DictOps;
use super::list::ListOps;
use super::{Value, ValueType};

const STRING_HASH_SEED: u64 = 1125899906842597;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Identity,
}
impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negate => f.write_str("-"),
            Self::Identity => f.write_str("+"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}
impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("+"),
            Self::Subtract => f.write_str("-"),
            Self::Multiply => f.write_str("*"),
            Self::Divide => f.write_str("/"),
            Self::Modulo => f.write_str("%"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompareOp {
    Equals,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}
impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals => f.write_str("=="),
            Self::Less => f.write_str("<"),
            Self::Greater => f.write_str(">"),
            Self::LessEqual => f.write_str("<="),
            Self::GreaterEqual => f.write_str(">="),
        }
    }
}

/// The operations a type of value supports.
///
/// Binary operations and comparisons are only dispatched when both operands
/// have the same type.
pub trait ValueOps: Sync {
    fn truthy(&self, heap: &Heap, value: Reference) -> bool;

    fn len(&self, _heap: &Heap, _value: Reference) -> Option<usize> {
        None
    }

    fn hash(&self, _heap: &Heap, _value: Reference) -> Option<u64> {
        None
    }

    fn compare(&self, _heap: &Heap, _left: Reference, _right: Reference) -> Option<RtResult<Ordering>> {
        None
    }

    fn equals(&self, heap: &Heap, left: Reference, right: Reference) -> bool;

    fn unary(&self, _heap: &mut Heap, _op: UnaryOp, _value: Reference) -> Option<RtResult<Reference>> {
        None
    }

    fn binary(
        &self,
        _heap: &mut Heap,
        _op: BinaryOp,
        _left: Reference,
        _right: Reference,
    ) -> Option<RtResult<Reference>> {
        None
    }

    fn subscr_get(&self, _heap: &mut Heap, _value: Reference, _subscript: Reference) -> Option<RtResult<Reference>> {
        None
    }

    fn subscr_set(
        &self,
        _heap: &mut Heap,
        _value: Reference,
        _subscript: Reference,
        _item: Reference,
    ) -> Option<RtResult<()>> {
        None
    }

    fn subscr_del(&self, _heap: &mut Heap, _value: Reference, _subscript: Reference) -> Option<RtResult<()>> {
        None
    }

    /// Writes `value`, with `depth` levels of nesting left to print
    fn print(
        &self,
        heap: &Heap,
        value: Reference,
        f: &mut fmt::Formatter<'_>,
        depth: usize,
        repr: bool,
    ) -> fmt::Result;
}

/// Gets the operations for a type of value
pub fn ops_for(ty: ValueType) -> &'static dyn ValueOps {
    match ty {
        ValueType::None | ValueType::Bool => &SingletonOps,
        ValueType::Integer => &IntOps,
        ValueType::String => &StrOps,
        ValueType::List => &ListOps,
        ValueType::Dict => &DictOps,
        ValueType::RefArray | ValueType::Free => panic!("{:?} values have no operations", ty),
    }
}

/// `None`, `True` and `False`
pub struct SingletonOps;
impl SingletonOps {
    fn truth(heap: &Heap, value: Reference) -> bool {
        match heap.value(value) {
            Value::None => false,
            Value::Bool(b) => b,
            other => panic!("expected a singleton, got {:?}", other.value_type()),
        }
    }
}
impl ValueOps for SingletonOps {
    fn truthy(&self, heap: &Heap, value: Reference) -> bool {
        Self::truth(heap, value)
    }

    fn hash(&self, heap: &Heap, value: Reference) -> Option<u64> {
        match heap.value(value) {
            Value::None => Some(u64::MAX),
            _ => Some(Self::truth(heap, value) as u64),
        }
    }

    fn compare(&self, heap: &Heap, left: Reference, right: Reference) -> Option<RtResult<Ordering>> {
        Some(Ok(Self::truth(heap, left).cmp(&Self::truth(heap, right))))
    }

    fn equals(&self, heap: &Heap, left: Reference, right: Reference) -> bool {
        Self::truth(heap, left) == Self::truth(heap, right)
    }

    fn print(&self, heap: &Heap, value: Reference, f: &mut fmt::Formatter<'_>, _depth: usize, _repr: bool) -> fmt::Result {
        match heap.value(value) {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            _ => f.write_str("False"),
        }
    }
}

pub struct IntOps;
impl IntOps {
    fn coerce(heap: &Heap, value: Reference) -> i64 {
        match heap.value(value) {
            Value::Integer(i) => i,
            other => panic!("expected an integer, got {:?}", other.value_type()),
        }
    }
}
impl ValueOps for IntOps {
    fn truthy(&self, heap: &Heap, value: Reference) -> bool {
        Self::coerce(heap, value) != 0
    }

    fn hash(&self, heap: &Heap, value: Reference) -> Option<u64> {
        Some(Self::coerce(heap, value) as u64)
    }

    fn compare(&self, heap: &Heap, left: Reference, right: Reference) -> Option<RtResult<Ordering>> {
        Some(Ok(Self::coerce(heap, left).cmp(&Self::coerce(heap, right))))
    }

    fn equals(&self, heap: &Heap, left: Reference, right: Reference) -> bool {
        Self::coerce(heap, left) == Self::coerce(heap, right)
    }

    fn unary(&self, heap: &mut Heap, op: UnaryOp, value: Reference) -> Option<RtResult<Reference>> {
        let i = Self::coerce(heap, value);
        let result = match op {
            UnaryOp::Negate => i.wrapping_neg(),
            UnaryOp::Identity => i,
        };
        Some(heap.make_int(result).map_err(Exception::from))
    }

    fn binary(&self, heap: &mut Heap, op: BinaryOp, left: Reference, right: Reference) -> Option<RtResult<Reference>> {
        let l = Self::coerce(heap, left);
        let r = Self::coerce(heap, right);
        let result = match op {
            BinaryOp::Add => l.wrapping_add(r),
            BinaryOp::Subtract => l.wrapping_sub(r),
            BinaryOp::Multiply => l.wrapping_mul(r),
            BinaryOp::Divide | BinaryOp::Modulo if r == 0 => {
                return Some(Err(Exception::value_error("integer division or modulo by zero")));
            }
            BinaryOp::Divide => l.wrapping_div(r),
            BinaryOp::Modulo => l.wrapping_rem(r),
        };
        Some(heap.make_int(result).map_err(Exception::from))
    }

    fn print(&self, heap: &Heap, value: Reference, f: &mut fmt::Formatter<'_>, _depth: usize, _repr: bool) -> fmt::Result {
        write!(f, "{}", Self::coerce(heap, value))
    }
}

pub struct StrOps;
impl ValueOps for StrOps {
    fn truthy(&self, heap: &Heap, value: Reference) -> bool {
        !heap.str_bytes(value).is_empty()
    }

    fn len(&self, heap: &Heap, value: Reference) -> Option<usize> {
        Some(heap.str_bytes(value).len())
    }

    fn hash(&self, heap: &Heap, value: Reference) -> Option<u64> {
        // Bytes are folded in as signed chars
        let hash = heap.str_bytes(value).iter().fold(STRING_HASH_SEED, |hash, b| {
            hash.wrapping_mul(31).wrapping_add(*b as i8 as u64)
        });
        Some(hash)
    }

    fn compare(&self, heap: &Heap, left: Reference, right: Reference) -> Option<RtResult<Ordering>> {
        Some(Ok(heap.str_bytes(left).cmp(heap.str_bytes(right))))
    }

    fn equals(&self, heap: &Heap, left: Reference, right: Reference) -> bool {
        heap.str_bytes(left) == heap.str_bytes(right)
    }

    fn binary(&self, heap: &mut Heap, op: BinaryOp, left: Reference, right: Reference) -> Option<RtResult<Reference>> {
        match op {
            BinaryOp::Add => Some(heap.make_str_concat(left, right).map_err(Exception::from)),
            _ => None,
        }
    }

    fn print(&self, heap: &Heap, value: Reference, f: &mut fmt::Formatter<'_>, _depth: usize, repr: bool) -> fmt::Result {
        let s = String::from_utf8_lossy(heap.str_bytes(value));
        if repr {
            write!(f, "\"{}\"", s)
        } else {
            f.write_str(&s)
        }
    }
}

/// Generic dispatch over the type of a value
impl Heap {
    #[inline]
    fn ops(&self, value: Reference) -> &'static dyn ValueOps {
        ops_for(self.type_of(value))
    }

    /// Coerces a value to a boolean; every type supports this
    pub fn ref_bool(&self, value: Reference) -> bool {
        self.ops(value).truthy(self, value)
    }

    pub fn ref_len(&self, value: Reference) -> RtResult<usize> {
        self.ops(value).len(self, value).ok_or_else(|| {
            Exception::type_error(format!("object of type '{}' has no len()", self.type_of(value)))
        })
    }

    pub fn ref_hash(&self, value: Reference) -> RtResult<u64> {
        self.ops(value)
            .hash(self, value)
            .ok_or_else(|| Exception::type_error(format!("unhashable type: '{}'", self.type_of(value))))
    }

    /// Orders two values of the same comparable type
    pub fn compare(&self, left: Reference, right: Reference) -> RtResult<Ordering> {
        let (lty, rty) = (self.type_of(left), self.type_of(right));
        let result = if lty == rty {
            ops_for(lty).compare(self, left, right)
        } else {
            None
        };
        result.unwrap_or_else(|| {
            Err(Exception::type_error(format!(
                "type(s) are not comparable: '{}' and '{}'",
                lty, rty
            )))
        })
    }

    /// Evaluates a comparison operator
    pub fn ref_compare(&self, op: CompareOp, left: Reference, right: Reference) -> RtResult<bool> {
        if op == CompareOp::Equals {
            return Ok(self.ref_eq(left, right));
        }
        let ordering = self.compare(left, right)?;
        Ok(match op {
            CompareOp::Less => ordering.is_lt(),
            CompareOp::Greater => ordering.is_gt(),
            CompareOp::LessEqual => ordering.is_le(),
            CompareOp::GreaterEqual => ordering.is_ge(),
            CompareOp::Equals => unreachable!(),
        })
    }

    /// Values of different types are never equal
    pub fn ref_eq(&self, left: Reference, right: Reference) -> bool {
        let ty = self.type_of(left);
        ty == self.type_of(right) && ops_for(ty).equals(self, left, right)
    }

    pub fn ref_unary(&mut self, op: UnaryOp, value: Reference) -> RtResult<Reference> {
        let ty = self.type_of(value);
        ops_for(ty).unary(self, op, value).unwrap_or_else(|| {
            Err(Exception::type_error(format!(
                "bad operand type for unary {}: '{}'",
                op, ty
            )))
        })
    }

    pub fn ref_binary(&mut self, op: BinaryOp, left: Reference, right: Reference) -> RtResult<Reference> {
        let (lty, rty) = (self.type_of(left), self.type_of(right));
        let result = if lty == rty {
            ops_for(lty).binary(self, op, left, right)
        } else {
            None
        };
        result.unwrap_or_else(|| {
            Err(Exception::type_error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op, lty, rty
            )))
        })
    }

    /// Evaluates `value[subscript]`, returning a new reference
    pub fn ref_subscr_get(&mut self, value: Reference, subscript: Reference) -> RtResult<Reference> {
        let ty = self.type_of(value);
        ops_for(ty)
            .subscr_get(self, value, subscript)
            .unwrap_or_else(|| Err(Exception::type_error(format!("'{}' object is not subscriptable", ty))))
    }

    /// Evaluates `value[subscript] = item`; the container takes its own reference to `item`
    pub fn ref_subscr_set(&mut self, value: Reference, subscript: Reference, item: Reference) -> RtResult<()> {
        let ty = self.type_of(value);
        ops_for(ty)
            .subscr_set(self, value, subscript, item)
            .unwrap_or_else(|| {
                Err(Exception::type_error(format!(
                    "'{}' object does not support item assignment",
                    ty
                )))
            })
    }

    pub fn ref_subscr_del(&mut self, value: Reference, subscript: Reference) -> RtResult<()> {
        let ty = self.type_of(value);
        ops_for(ty)
            .subscr_del(self, value, subscript)
            .unwrap_or_else(|| {
                Err(Exception::type_error(format!(
                    "'{}' object does not support item deletion",
                    ty
                )))
            })
    }
}
