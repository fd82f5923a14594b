use std::{any::Any, cell::RefCell, fmt::Display, rc::Rc};

use crate::{
    interpreter::RuntimeErrorKind,
    types::{ScriptType, SequenceKind, TypeSystem},
};

/// An object owned by the host and handed to scripts.
pub trait HostObject: std::fmt::Debug {
    /// Registered class name; must match a class known to the type system.
    fn class_name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

/// A shared, typed sequence. Copies of the value alias the same storage.
///
/// Queues keep their front at index 0 and stacks keep their top at the end.
#[derive(Debug, Clone)]
pub struct ListRef {
    pub kind: SequenceKind,
    pub element: ScriptType,
    pub items: Rc<RefCell<Vec<Value>>>,
}

impl ListRef {
    pub fn new(element: ScriptType, items: Vec<Value>) -> Self {
        Self::with_kind(SequenceKind::List, element, items)
    }

    pub fn with_kind(kind: SequenceKind, element: ScriptType, items: Vec<Value>) -> Self {
        Self {
            kind,
            element,
            items: Rc::new(RefCell::new(items)),
        }
    }

    pub fn ty(&self) -> ScriptType {
        self.kind.of(self.element.clone())
    }

    /// Items in `foreach` order; a stack yields its top first.
    pub fn snapshot(&self) -> Vec<Value> {
        let mut items = self.items.borrow().clone();
        if self.kind == SequenceKind::Stack {
            items.reverse();
        }
        items
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: i32) -> Result<Value, RuntimeErrorKind> {
        let items = self.items.borrow();
        checked_index(index, items.len()).map(|i| items[i].clone())
    }

    pub fn set(&self, index: i32, value: Value) -> Result<(), RuntimeErrorKind> {
        let mut items = self.items.borrow_mut();
        let i = checked_index(index, items.len())?;
        items[i] = value;
        Ok(())
    }
}

/// A shared map with insertion-ordered entries. Keys compare with `==`.
#[derive(Debug, Clone)]
pub struct DictionaryRef {
    pub key: ScriptType,
    pub value: ScriptType,
    pub entries: Rc<RefCell<Vec<(Value, Value)>>>,
}

impl DictionaryRef {
    pub fn new(key: ScriptType, value: ScriptType) -> Self {
        Self {
            key,
            value,
            entries: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn ty(&self) -> ScriptType {
        ScriptType::dictionary(self.key.clone(), self.value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn position(&self, key: &Value) -> Result<Option<usize>, RuntimeErrorKind> {
        if key.is_null() {
            return Err(RuntimeErrorKind::NullValue("dictionary key".to_string()));
        }
        Ok(self
            .entries
            .borrow()
            .iter()
            .position(|(existing, _)| existing.script_equals(key)))
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool, RuntimeErrorKind> {
        Ok(self.position(&key.clone().coerce(&self.key))?.is_some())
    }

    pub fn get(&self, key: &Value) -> Result<Value, RuntimeErrorKind> {
        let key = key.clone().coerce(&self.key);
        match self.position(&key)? {
            Some(i) => Ok(self.entries.borrow()[i].1.clone()),
            None => Err(RuntimeErrorKind::KeyNotFound(key.to_string())),
        }
    }

    /// Inserts or overwrites, as indexer assignment does.
    pub fn set(&self, key: Value, value: Value) -> Result<(), RuntimeErrorKind> {
        let key = key.coerce(&self.key);
        let value = value.coerce(&self.value);
        match self.position(&key)? {
            Some(i) => self.entries.borrow_mut()[i].1 = value,
            None => self.entries.borrow_mut().push((key, value)),
        }
        Ok(())
    }

    /// Inserts a new key; an existing key is an error.
    pub fn add(&self, key: Value, value: Value) -> Result<(), RuntimeErrorKind> {
        let key = key.coerce(&self.key);
        if self.position(&key)?.is_some() {
            return Err(RuntimeErrorKind::DuplicateKey(key.to_string()));
        }
        self.entries.borrow_mut().push((key, value.coerce(&self.value)));
        Ok(())
    }

    pub fn remove(&self, key: &Value) -> Result<bool, RuntimeErrorKind> {
        let key = key.clone().coerce(&self.key);
        Ok(match self.position(&key)? {
            Some(i) => {
                self.entries.borrow_mut().remove(i);
                true
            }
            None => false,
        })
    }
}

pub(crate) fn checked_index(index: i32, length: usize) -> Result<usize, RuntimeErrorKind> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < length)
        .ok_or(RuntimeErrorKind::IndexOutOfRange {
            index: index as i64,
            length,
        })
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Rc<str>),
    List(ListRef),
    Dictionary(DictionaryRef),
    Host(Rc<dyn HostObject>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn runtime_type(&self) -> ScriptType {
        match self {
            Value::Null => ScriptType::Null,
            Value::Bool(_) => ScriptType::Bool,
            Value::Int(_) => ScriptType::Int,
            Value::Long(_) => ScriptType::Long,
            Value::Float(_) => ScriptType::Float,
            Value::Double(_) => ScriptType::Double,
            Value::String(_) => ScriptType::String,
            Value::List(list) => list.ty(),
            Value::Dictionary(map) => map.ty(),
            Value::Host(object) => ScriptType::class(object.class_name()),
        }
    }

    /// The value a declaration without an initializer starts with.
    pub fn default_for(ty: &ScriptType) -> Value {
        match ty {
            ScriptType::Bool => Value::Bool(false),
            ScriptType::Int => Value::Int(0),
            ScriptType::Long => Value::Long(0),
            ScriptType::Float => Value::Float(0.0),
            ScriptType::Double => Value::Double(0.0),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Applies an implicit numeric widening towards `target`. Values that
    /// need no representation change are returned untouched.
    pub fn coerce(self, target: &ScriptType) -> Value {
        match (self, target) {
            (Value::Int(i), ScriptType::Long) => Value::Long(i as i64),
            (Value::Int(i), ScriptType::Float) => Value::Float(i as f32),
            (Value::Int(i), ScriptType::Double) => Value::Double(i as f64),
            (Value::Long(l), ScriptType::Float) => Value::Float(l as f32),
            (Value::Long(l), ScriptType::Double) => Value::Double(l as f64),
            (Value::Float(f), ScriptType::Double) => Value::Double(f as f64),
            (value, _) => value,
        }
    }

    /// Explicit `(target)value` conversion.
    pub fn cast(
        self,
        target: &ScriptType,
        types: &dyn TypeSystem,
    ) -> Result<Value, RuntimeErrorKind> {
        let invalid = |value: &Value| RuntimeErrorKind::InvalidCast {
            from: value.runtime_type(),
            to: target.clone(),
        };

        if target.is_numeric() {
            return match self.as_f64() {
                Some(_) => numeric_cast(&self, target).ok_or_else(|| invalid(&self)),
                None => Err(invalid(&self)),
            };
        }

        if self.is_null() {
            return if target.is_reference() {
                Ok(Value::Null)
            } else {
                Err(invalid(&self))
            };
        }

        if types.is_assignable_or_convertible(target, &self.runtime_type()) {
            Ok(self.coerce(target))
        } else {
            Err(invalid(&self))
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Long(l) => Some(*l as f64),
            Value::Float(f) => Some(*f as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Result<bool, RuntimeErrorKind> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(RuntimeErrorKind::UnexpectedValue {
                expected: ScriptType::Bool,
                found: other.runtime_type(),
            }),
        }
    }

    pub fn as_int(&self) -> Result<i32, RuntimeErrorKind> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(RuntimeErrorKind::UnexpectedValue {
                expected: ScriptType::Int,
                found: other.runtime_type(),
            }),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Equality as seen by `==` in a script. Numeric operands are expected
    /// to already be promoted to a common type.
    pub fn script_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(&a.items, &b.items),
            (Value::Dictionary(a), Value::Dictionary(b)) => Rc::ptr_eq(&a.entries, &b.entries),
            (Value::Host(a), Value::Host(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Text used by concatenation and formatting; `null` renders empty.
    pub fn to_script_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

fn numeric_cast(value: &Value, target: &ScriptType) -> Option<Value> {
    match (value, target) {
        (Value::Int(i), ScriptType::Int) => Some(Value::Int(*i)),
        (Value::Long(l), ScriptType::Long) => Some(Value::Long(*l)),
        (Value::Long(l), ScriptType::Int) => i32::try_from(*l).ok().map(Value::Int),
        (Value::Int(_), ScriptType::Long) => Some(value.clone().coerce(target)),
        (_, ScriptType::Int) => {
            let f = value.as_f64()?.trunc();
            (f >= i32::MIN as f64 && f <= i32::MAX as f64).then(|| Value::Int(f as i32))
        }
        (_, ScriptType::Long) => {
            let f = value.as_f64()?.trunc();
            // i64::MAX is not exactly representable, so compare against 2^63.
            (f >= -9.223_372_036_854_775_808e18 && f < 9.223_372_036_854_775_808e18)
                .then(|| Value::Long(f as i64))
        }
        (Value::Long(l), ScriptType::Float) => Some(Value::Float(*l as f32)),
        (_, ScriptType::Float) => Some(Value::Float(value.as_f64()? as f32)),
        (Value::Long(l), ScriptType::Double) => Some(Value::Double(*l as f64)),
        (_, ScriptType::Double) => Some(Value::Double(value.as_f64()?)),
        _ => None,
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::List(list) => {
                write!(f, "[")?;
                for (i, item) in list.items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Dictionary(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.entries.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Host(object) => write!(f, "{}", object.class_name()),
        }
    }
}

/// Rust types that can be read out of, and written into, script bindings.
pub trait ScriptValue: Sized {
    fn script_type() -> ScriptType;
    fn from_value(value: Value) -> Option<Self>;
    fn into_value(self) -> Value;
}

macro_rules! script_value {
    ($rust:ty, $ty:expr, $variant:ident) => {
        impl ScriptValue for $rust {
            fn script_type() -> ScriptType {
                $ty
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

script_value! { bool, ScriptType::Bool, Bool }
script_value! { i32, ScriptType::Int, Int }
script_value! { i64, ScriptType::Long, Long }
script_value! { f32, ScriptType::Float, Float }
script_value! { f64, ScriptType::Double, Double }

impl ScriptValue for String {
    fn script_type() -> ScriptType {
        ScriptType::String
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }

    fn into_value(self) -> Value {
        Value::string(self)
    }
}

/// Any value, read as `object`.
impl ScriptValue for Value {
    fn script_type() -> ScriptType {
        ScriptType::Object
    }

    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }

    fn into_value(self) -> Value {
        self
    }
}

/// Reference types read as `Option` to observe `null`.
impl<T: ScriptValue> ScriptValue for Option<T> {
    fn script_type() -> ScriptType {
        T::script_type()
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            value => T::from_value(value).map(Some),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Some(value) => value.into_value(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::HostRegistry;

    #[test]
    fn coerce_widens_integers() {
        assert!(matches!(Value::Int(3).coerce(&ScriptType::Double), Value::Double(d) if d == 3.0));
        assert!(matches!(Value::Int(3).coerce(&ScriptType::Long), Value::Long(3)));
        assert!(matches!(Value::Bool(true).coerce(&ScriptType::Object), Value::Bool(true)));
    }

    #[test]
    fn casts_truncate_and_detect_overflow() {
        let types = HostRegistry::new();
        assert!(matches!(
            Value::Double(3.9).cast(&ScriptType::Int, &types),
            Ok(Value::Int(3))
        ));
        assert!(matches!(
            Value::Double(-3.9).cast(&ScriptType::Int, &types),
            Ok(Value::Int(-3))
        ));
        assert!(matches!(
            Value::Long(i64::MAX).cast(&ScriptType::Int, &types),
            Err(RuntimeErrorKind::InvalidCast { .. })
        ));
        assert!(matches!(
            Value::Double(f64::NAN).cast(&ScriptType::Int, &types),
            Err(RuntimeErrorKind::InvalidCast { .. })
        ));
    }

    #[test]
    fn object_casts_check_the_runtime_type() {
        let types = HostRegistry::new();
        assert!(matches!(
            Value::string("hi").cast(&ScriptType::String, &types),
            Ok(Value::String(_))
        ));
        assert!(matches!(
            Value::string("hi").cast(&ScriptType::Int, &types),
            Err(RuntimeErrorKind::InvalidCast { .. })
        ));
        assert!(matches!(
            Value::Null.cast(&ScriptType::Int, &types),
            Err(RuntimeErrorKind::InvalidCast { .. })
        ));
    }

    #[test]
    fn display_matches_script_output() {
        assert_eq!(Value::Double(3.0).to_string(), "3");
        assert_eq!(Value::Double(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_script_string(), "");
        let list = ListRef::new(ScriptType::Int, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(Value::List(list).to_string(), "[1, 2]");
    }

    #[test]
    fn lists_compare_by_identity() {
        let list = ListRef::new(ScriptType::Int, vec![]);
        let alias = Value::List(list.clone());
        let other = Value::List(ListRef::new(ScriptType::Int, vec![]));
        assert!(Value::List(list).script_equals(&alias));
        assert!(!alias.script_equals(&other));
    }

    #[test]
    fn list_indexing_is_bounds_checked() {
        let list = ListRef::new(ScriptType::Int, vec![Value::Int(7)]);
        assert!(matches!(list.get(0), Ok(Value::Int(7))));
        assert!(matches!(
            list.get(1),
            Err(RuntimeErrorKind::IndexOutOfRange { index: 1, length: 1 })
        ));
        assert!(list.set(-1, Value::Int(0)).is_err());
    }

    #[test]
    fn dictionaries_key_by_script_equality() {
        let ages = DictionaryRef::new(ScriptType::String, ScriptType::Long);
        ages.add(Value::string("ann"), Value::Int(30)).unwrap();
        ages.set(Value::string("bob"), Value::Int(41)).unwrap();
        ages.set(Value::string("ann"), Value::Int(31)).unwrap();

        assert_eq!(ages.len(), 2);
        assert!(matches!(ages.get(&Value::string("ann")), Ok(Value::Long(31))));
        assert!(matches!(
            ages.add(Value::string("bob"), Value::Int(0)),
            Err(RuntimeErrorKind::DuplicateKey(key)) if key == "bob"
        ));
        assert!(matches!(
            ages.get(&Value::string("cy")),
            Err(RuntimeErrorKind::KeyNotFound(_))
        ));
        assert!(matches!(ages.get(&Value::Null), Err(RuntimeErrorKind::NullValue(_))));
        assert!(matches!(ages.remove(&Value::string("ann")), Ok(true)));
        assert_eq!(Value::Dictionary(ages).to_string(), "{bob: 41}");
    }

    #[test]
    fn stacks_iterate_from_the_top() {
        let items = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let stack = ListRef::with_kind(SequenceKind::Stack, ScriptType::Int, items);
        let order: Vec<String> = stack.snapshot().iter().map(Value::to_string).collect();
        assert_eq!(order, ["3", "2", "1"]);
        assert_eq!(stack.ty().to_string(), "Stack<int>");
    }

    #[test]
    fn optional_reads_observe_null() {
        assert_eq!(Option::<String>::from_value(Value::Null), Some(None));
        assert_eq!(
            Option::<String>::from_value(Value::string("x")),
            Some(Some("x".to_string()))
        );
        assert_eq!(String::from_value(Value::Null), None);
    }
}
