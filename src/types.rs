// Static types and the three operations the checker needs: structural
// compatibility (`check`), generic substitution (`substitute`), and
// argument-driven unification (`match_generics`).

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use itertools::Itertools;


pub type Node<T> = Rc<T>;

pub type GenericBindings = HashMap<String, Type>;


#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    // Matches every non-void type.
    Any,
    // The absence of a value; only a function with no declared return
    // type produces it, and nothing accepts it.
    Void,
    Bool,
    Char,
    Int,
    Real,
    Str,
    List(Node<Type>),
    Map(Node<Type>, Node<Type>),
    Tuple(Vec<Type>),
    Function(Node<FunctionType>),
    Class(Node<ClassType>),
    Enum(Node<EnumType>),
    // Ad-hoc alternatives; only builtin signatures spell this.
    Union(Vec<Type>),
    // A generic placeholder, replaced by substitution.
    Parameter(String),
    Module(Node<ModuleType>),
}


#[derive(Clone, Debug, PartialEq)]
pub struct FunctionType {
    pub name: String,
    pub public: bool,
    pub generic_params: Vec<String>,
    pub params: Vec<Type>,
    pub return_type: Option<Type>,
    pub builtin: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassType {
    pub name: String,
    pub generic_params: Vec<String>,
    pub fields: Vec<ClassField>,
    pub methods: Vec<Node<FunctionType>>,
}

impl ClassType {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<Node<FunctionType>> {
        self.methods
            .iter()
            .find(|m| m.name.ends_with(&format!("__{}", name)))
            .cloned()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassField {
    pub name: String,
    pub public: bool,
    pub field_type: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub generic_params: Vec<String>,
    pub cases: Vec<EnumCase>,
}

impl EnumType {
    pub fn case(&self, label: &str) -> Option<&EnumCase> {
        self.cases.iter().find(|c| c.label == label)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumCase {
    pub label: String,
    pub payload: Vec<Type>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleType {
    pub name: String,
    pub types: HashMap<String, Type>,
}


// The pre-registered Optional enum: `Some(T)` or `None`.
pub fn optional_enum() -> Node<EnumType> {
    Node::new(EnumType {
        name: String::from("Optional"),
        generic_params: vec![String::from("T")],
        cases: vec![
            EnumCase {
                label: String::from("Some"),
                payload: vec![Type::Parameter(String::from("T"))],
            },
            EnumCase {
                label: String::from("None"),
                payload: vec![],
            },
        ],
    })
}

// An Optional instance with `T` already substituted.
pub fn optional_of(inner: Type) -> Type {
    let mut bindings = GenericBindings::new();
    bindings.insert(String::from("T"), inner);
    Type::Enum(optional_enum()).substitute(&bindings)
}


impl Type {
    // Structural compatibility of a concrete type against this one,
    // where `self` plays the "expected" role. `Any` admits every
    // non-void type, a union admits a type any alternative admits, and
    // function types are never assignable.
    pub fn check(&self, concrete: &Type) -> bool {
        match (self, concrete) {
            (Type::Any, Type::Void) => false,
            (Type::Any, _) => true,
            // An unresolved generic defaults to Any on the concrete
            // side; it matches any expectation.
            (_, Type::Any) => true,
            (Type::Union(alternatives), c) => alternatives.iter().any(|a| a.check(c)),
            (Type::Function(_), _) => false,
            (Type::List(a), Type::List(b)) => a.check(b),
            (Type::Map(ak, av), Type::Map(bk, bv)) => ak.check(bk) && av.check(bv),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.check(y))
            }
            (Type::Class(a), Type::Class(b)) => {
                a.name == b.name
                    && a.fields.len() == b.fields.len()
                    && a.fields
                        .iter()
                        .zip(&b.fields)
                        .all(|(x, y)| x.field_type.check(&y.field_type))
            }
            (Type::Enum(a), Type::Enum(b)) => {
                a.name == b.name
                    && a.cases.len() == b.cases.len()
                    && a.cases.iter().zip(&b.cases).all(|(x, y)| {
                        x.label == y.label
                            && x.payload.len() == y.payload.len()
                            && x.payload.iter().zip(&y.payload).all(|(s, t)| s.check(t))
                    })
            }
            (Type::Parameter(a), Type::Parameter(b)) => a == b,
            (a, b) => a == b,
        }
    }

    // Replace every generic parameter whose label appears in the
    // bindings; other labels are left untouched. Every compound variant
    // recurses into its children.
    pub fn substitute(&self, bindings: &GenericBindings) -> Type {
        match self {
            Type::Parameter(label) => match bindings.get(label) {
                Some(concrete) => concrete.clone(),
                None => self.clone(),
            },
            Type::List(item) => Type::List(Node::new(item.substitute(bindings))),
            Type::Map(key, value) => Type::Map(
                Node::new(key.substitute(bindings)),
                Node::new(value.substitute(bindings)),
            ),
            Type::Tuple(items) => {
                Type::Tuple(items.iter().map(|t| t.substitute(bindings)).collect())
            }
            Type::Union(alternatives) => {
                Type::Union(alternatives.iter().map(|t| t.substitute(bindings)).collect())
            }
            Type::Function(f) => Type::Function(Node::new(FunctionType {
                name: f.name.clone(),
                public: f.public,
                generic_params: f.generic_params.clone(),
                params: f.params.iter().map(|t| t.substitute(bindings)).collect(),
                return_type: f.return_type.as_ref().map(|t| t.substitute(bindings)),
                builtin: f.builtin,
            })),
            Type::Class(c) => Type::Class(Node::new(ClassType {
                name: c.name.clone(),
                generic_params: c.generic_params.clone(),
                fields: c
                    .fields
                    .iter()
                    .map(|f| ClassField {
                        name: f.name.clone(),
                        public: f.public,
                        field_type: f.field_type.substitute(bindings),
                    })
                    .collect(),
                methods: c.methods.clone(),
            })),
            Type::Enum(e) => Type::Enum(Node::new(EnumType {
                name: e.name.clone(),
                generic_params: e.generic_params.clone(),
                cases: e
                    .cases
                    .iter()
                    .map(|c| EnumCase {
                        label: c.label.clone(),
                        payload: c.payload.iter().map(|t| t.substitute(bindings)).collect(),
                    })
                    .collect(),
            })),
            other => other.clone(),
        }
    }

    // Walk this signature type against a concrete type, binding each
    // generic parameter to whatever the concrete side supplies. The
    // first binding wins; a later conflicting binding for the same
    // label is reported so the caller can reject the call.
    pub fn match_generics(
        &self,
        concrete: &Type,
        bindings: &mut GenericBindings,
    ) -> Result<(), String> {
        match (self, concrete) {
            (Type::Parameter(label), c) => {
                if let Some(previous) = bindings.get(label) {
                    if previous != c {
                        return Err(label.clone());
                    }
                } else {
                    bindings.insert(label.clone(), c.clone());
                }
                Ok(())
            }
            (Type::List(a), Type::List(b)) => a.match_generics(b, bindings),
            (Type::Map(ak, av), Type::Map(bk, bv)) => {
                ak.match_generics(bk, bindings)?;
                av.match_generics(bv, bindings)
            }
            (Type::Tuple(a), Type::Tuple(b)) if a.len() == b.len() => {
                for (x, y) in a.iter().zip(b) {
                    x.match_generics(y, bindings)?;
                }
                Ok(())
            }
            (Type::Class(a), Type::Class(b)) if a.fields.len() == b.fields.len() => {
                for (x, y) in a.fields.iter().zip(&b.fields) {
                    x.field_type.match_generics(&y.field_type, bindings)?;
                }
                Ok(())
            }
            (Type::Enum(a), Type::Enum(b)) if a.cases.len() == b.cases.len() => {
                for (x, y) in a.cases.iter().zip(&b.cases) {
                    if x.payload.len() != y.payload.len() {
                        continue;
                    }
                    for (s, t) in x.payload.iter().zip(&y.payload) {
                        s.match_generics(t, bindings)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}


impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Any => write!(f, "any"),
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Char => write!(f, "char"),
            Type::Int => write!(f, "int"),
            Type::Real => write!(f, "real"),
            Type::Str => write!(f, "string"),
            Type::List(item) => write!(f, "[{}]", item),
            Type::Map(key, value) => write!(f, "{{{}, {}}}", key, value),
            Type::Tuple(items) => {
                write!(f, "({})", items.iter().map(|t| t.to_string()).join(", "))
            }
            Type::Function(func) => {
                let params = func.params.iter().map(|t| t.to_string()).join(", ");
                match &func.return_type {
                    Some(ret) => write!(f, "func({}) -> {}", params, ret),
                    None => write!(f, "func({})", params),
                }
            }
            Type::Class(class) => write!(f, "{}", class.name),
            Type::Enum(enum_type) => write!(f, "{}", enum_type.name),
            Type::Union(alternatives) => {
                write!(f, "{}", alternatives.iter().map(|t| t.to_string()).join(" | "))
            }
            Type::Parameter(label) => write!(f, "{}", label),
            Type::Module(module) => write!(f, "module `{}`", module.name),
        }
    }
}
