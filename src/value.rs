// Runtime values.
//
// Lists, maps and class objects are reference-shared: two names bound to
// the same list observe each other's mutations. Strings, tuples and enum
// payloads are immutable. Iterators keep their source collection alive
// for the duration of the loop and carry their cursor in interior-mutable
// cells so the dispatch loop can advance them in place on the stack.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use enumflags2::BitFlags;
use itertools::Itertools;

use crate::map::ValueMap;
use crate::util;


// Runtime type tags form a flag set so errors can report the whole set
// of acceptable tags, not just one.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u16)]
pub enum TypeTag {
    Bool = 0b0000_0000_0001,
    Int = 0b0000_0000_0010,
    Real = 0b0000_0000_0100,
    Char = 0b0000_0000_1000,
    Str = 0b0000_0001_0000,
    List = 0b0000_0010_0000,
    Tuple = 0b0000_0100_0000,
    Map = 0b0000_1000_0000,
    Class = 0b0001_0000_0000,
    Enum = 0b0010_0000_0000,
    Function = 0b0100_0000_0000,
    Iterator = 0b1000_0000_0000,
}

pub type TypeSet = BitFlags<TypeTag>;


#[derive(Clone, Debug)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    Char(u8),
    Str(Rc<String>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Map(Rc<RefCell<ValueMap>>),
    Class(Rc<ClassObject>),
    Enum(Rc<EnumObject>),
    Function(Rc<FunctionObject>),
    ListIter(Rc<ListIterator>),
    MapIter(Rc<MapIterator>),
}


#[derive(Debug)]
pub struct ClassObject {
    pub class: String,
    pub fields: RefCell<Vec<Value>>,
}

#[derive(Debug)]
pub struct EnumObject {
    pub label: String,
    pub payload: Vec<Value>,
}

#[derive(Debug)]
pub struct FunctionObject {
    pub name: String,
    pub builtin: bool,
}

#[derive(Debug)]
pub struct ListIterator {
    pub list: Rc<RefCell<Vec<Value>>>,
    pub index: Cell<usize>,
}

#[derive(Debug)]
pub struct MapIterator {
    pub map: Rc<RefCell<ValueMap>>,
    pub bucket: Cell<usize>,
    pub chain: Cell<usize>,
}


impl Value {
    pub fn string(s: &str) -> Value {
        Value::Str(Rc::new(String::from(s)))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn enumeration(label: &str, payload: Vec<Value>) -> Value {
        Value::Enum(Rc::new(EnumObject {
            label: String::from(label),
            payload,
        }))
    }

    // The runtime form of `Optional::Some(value)`.
    pub fn some(value: Value) -> Value {
        Value::enumeration("Some", vec![value])
    }

    // The runtime form of `Optional::None`.
    pub fn none() -> Value {
        Value::enumeration("None", vec![])
    }

    pub fn get_type(&self) -> TypeTag {
        match self {
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Real(_) => TypeTag::Real,
            Value::Char(_) => TypeTag::Char,
            Value::Str(_) => TypeTag::Str,
            Value::List(_) => TypeTag::List,
            Value::Tuple(_) => TypeTag::Tuple,
            Value::Map(_) => TypeTag::Map,
            Value::Class(_) => TypeTag::Class,
            Value::Enum(_) => TypeTag::Enum,
            Value::Function(_) => TypeTag::Function,
            Value::ListIter(_) | Value::MapIter(_) => TypeTag::Iterator,
        }
    }

    // Structural equality. Integers and reals cross-compare as numbers;
    // functions and iterators are never equal; mismatched tags are
    // unequal rather than an error.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Int(a), Value::Real(b)) | (Value::Real(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Map(a), Value::Map(b)) => a.borrow().equals(&b.borrow()),
            (Value::Class(a), Value::Class(b)) => {
                let af = a.fields.borrow();
                let bf = b.fields.borrow();
                a.class == b.class
                    && af.len() == bf.len()
                    && af.iter().zip(bf.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Enum(a), Value::Enum(b)) => {
                a.label == b.label
                    && a.payload.len() == b.payload.len()
                    && a.payload
                        .iter()
                        .zip(b.payload.iter())
                        .all(|(x, y)| x.equals(y))
            }
            _ => false,
        }
    }

    // Ordering for the relational operators and for `sorted`. Only
    // numbers, characters and strings are ordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Real(b)) => (*a as f64).partial_cmp(b),
            (Value::Real(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    // The quoted form used inside collections: strings and characters
    // keep their delimiters, everything else reads as at top level.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => util::quote(s),
            Value::Char(c) => format!("'{}'", escape_char(*c)),
            other => other.to_string(),
        }
    }
}

fn escape_char(c: u8) -> String {
    match c {
        b'\n' => String::from("\\n"),
        b'\r' => String::from("\\r"),
        b'\t' => String::from("\\t"),
        b'\\' => String::from("\\\\"),
        b'\'' => String::from("\\'"),
        c => (c as char).to_string(),
    }
}


impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}


impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{:?}", r),
            Value::Char(c) => write!(f, "{}", *c as char),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                let items = items.borrow();
                write!(f, "[{}]", items.iter().map(|v| v.repr()).join(", "))
            }
            Value::Tuple(items) => {
                write!(f, "({})", items.iter().map(|v| v.repr()).join(", "))
            }
            Value::Map(map) => {
                let map = map.borrow();
                let entries = map
                    .entries()
                    .into_iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .join(", ");
                write!(f, "{{{}}}", entries)
            }
            Value::Class(object) => {
                let fields = object.fields.borrow();
                write!(
                    f,
                    "{}({})",
                    object.class,
                    fields.iter().map(|v| v.repr()).join(", ")
                )
            }
            Value::Enum(object) => {
                if object.payload.is_empty() {
                    write!(f, "{}", object.label)
                } else {
                    write!(
                        f,
                        "{}({})",
                        object.label,
                        object.payload.iter().map(|v| v.repr()).join(", ")
                    )
                }
            }
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::ListIter(_) | Value::MapIter(_) => write!(f, "<iterator>"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_cross_equality() {
        assert_eq!(Value::Int(2), Value::Real(2.0));
        assert_eq!(Value::Real(2.0), Value::Int(2));
        assert_ne!(Value::Int(2), Value::Real(2.5));
    }

    #[test]
    fn test_structural_equality() {
        let a = Value::list(vec![Value::Int(1), Value::string("x")]);
        let b = Value::list(vec![Value::Int(1), Value::string("x")]);
        assert_eq!(a, b);
        let c = Value::list(vec![Value::Int(1)]);
        assert_ne!(a, c);

        assert_eq!(Value::some(Value::Int(1)), Value::some(Value::Int(1)));
        assert_ne!(Value::some(Value::Int(1)), Value::none());
    }

    #[test]
    fn test_functions_never_equal() {
        let f = Value::Function(Rc::new(FunctionObject {
            name: String::from("f"),
            builtin: false,
        }));
        assert_ne!(f.clone(), f);
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(
            Value::Int(3).compare(&Value::Real(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::string("a").compare(&Value::string("b")),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Int(1).compare(&Value::string("a")), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Real(1.5).to_string(), "1.5");
        assert_eq!(Value::Real(2.0).to_string(), "2.0");
        assert_eq!(Value::string("hi").to_string(), "hi");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::string("x")]).to_string(),
            "[1, \"x\"]"
        );
        assert_eq!(
            Value::Tuple(Rc::new(vec![Value::Int(1), Value::Bool(true)])).to_string(),
            "(1, true)"
        );
        assert_eq!(Value::some(Value::Int(3)).to_string(), "Some(3)");
        assert_eq!(Value::none().to_string(), "None");
    }
}
