// The virtual machine.
//
// Execution state is an evaluation stack of tagged values plus a chain of
// environments mapping names to values. Each instruction returns a
// relative jump: 1 advances, anything else moves the program counter,
// and 0 returns from the current function.
//
// A call pops its arguments, seeds a fresh stack with them, chains a
// child environment off the caller's, and executes the callee's
// instruction list recursively; the callee's stack top comes back to the
// caller. Builtins route through the handler table instead.
//
// The checker prevents type errors in programs it compiled, but the VM
// does not assume the bytecode it runs came from this checker: every
// operation re-checks its operands and fails with an execution error
// rather than trusting the stack.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::builtins;
use crate::bytecode::{Opcode, Program};
use crate::env::{Env, Node};
use crate::map::ValueMap;
use crate::value::{
    ClassObject, EnumObject, FunctionObject, ListIterator, MapIterator, TypeSet, TypeTag, Value,
};


#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    Underflow,
    TypeError { expect: TypeSet, got: TypeTag },
    NameError(String),
    UnknownFunction(String),
    IllegalOpcode(String),
    IndexOutOfBounds(i64),
    DivisionByZero,
    Arity { expected: usize, got: usize },
    Builtin(String),
    BadJump(isize),
    // The underlying fault plus the index of the instruction that
    // raised it, attached by the innermost dispatch loop.
    At(usize, Box<Error>),
}

impl Error {
    // Strip the position wrapper.
    pub fn cause(&self) -> &Error {
        match self {
            Error::At(_, cause) => cause.cause(),
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Underflow => write!(f, "stack underflow"),
            Error::TypeError { expect, got } => {
                let expected: Vec<String> =
                    expect.iter().map(|tag| format!("{:?}", tag)).collect();
                write!(f, "expected {}, got {:?}", expected.join(" | "), got)
            }
            Error::NameError(name) => write!(f, "name `{}` is not defined", name),
            Error::UnknownFunction(name) => write!(f, "no function named `{}`", name),
            Error::IllegalOpcode(op) => write!(f, "illegal opcode {}", op),
            Error::IndexOutOfBounds(_) => write!(f, "index out of bounds"),
            Error::DivisionByZero => write!(f, "division by zero"),
            Error::Arity { expected, got } => {
                write!(f, "builtin expected {} arguments, got {}", expected, got)
            }
            Error::Builtin(message) => write!(f, "{}", message),
            Error::BadJump(delta) => write!(f, "jump by {} out of range", delta),
            Error::At(position, cause) => {
                write!(f, "{} (near instruction {})", cause, position)
            }
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;


fn expected(expect: TypeSet, got: &Value) -> Error {
    Error::TypeError {
        expect,
        got: got.get_type(),
    }
}


// Like core::convert::TryInto, but failing with a runtime type error so
// typed pops read as one line.
pub trait TryInto<T> {
    fn try_into(self) -> Result<T>;
}

macro_rules! impl_try_into {
    ($variant:ident => $type:ty) => {
        impl TryInto<$type> for Value {
            fn try_into(self) -> Result<$type> {
                match self {
                    Value::$variant(value) => Ok(value),
                    v => Err(expected(BitFlags::from_flag(TypeTag::$variant), &v)),
                }
            }
        }
    };
}

impl_try_into! { Bool => bool }
impl_try_into! { Int => i64 }
impl_try_into! { Real => f64 }
impl_try_into! { Str => Rc<String> }
impl_try_into! { List => Rc<RefCell<Vec<Value>>> }
impl_try_into! { Map => Rc<RefCell<ValueMap>> }
impl_try_into! { Class => Rc<ClassObject> }
impl_try_into! { Enum => Rc<EnumObject> }
impl_try_into! { Function => Rc<FunctionObject> }


pub struct Vm {
    program: Rc<Program>,
    stack: Vec<Value>,
    env: Node<Env<Value>>,
}

impl Vm {
    pub fn new(program: Program) -> Vm {
        Vm {
            program: Rc::new(program),
            stack: Vec::new(),
            env: Env::root(),
        }
    }

    // A VM sharing a caller-provided environment; the REPL threads one
    // environment through every snippet it runs.
    pub fn with_env(program: Program, env: Node<Env<Value>>) -> Vm {
        Vm {
            program: Rc::new(program),
            stack: Vec::new(),
            env,
        }
    }

    // Execute `main` to completion. The terminal value is whatever the
    // entry function left on top of its stack.
    pub fn run(&mut self) -> Result<Option<Value>> {
        let program = self.program.clone();
        let main = program
            .functions
            .get("main")
            .ok_or_else(|| Error::UnknownFunction(String::from("main")))?;
        self.execute(main)?;
        Ok(self.stack.last().cloned())
    }

    fn execute(&mut self, code: &[Opcode]) -> Result<()> {
        let mut pc: usize = 0;
        while pc < code.len() {
            trace!("{:4} {:24} {:?}", pc, format!("{}", code[pc]), self.stack);
            let delta = self.step(&code[pc]).map_err(|e| match e {
                Error::At(_, _) => e,
                e => Error::At(pc, Box::new(e)),
            })?;
            if delta == 0 {
                return Ok(());
            }
            let next = pc as isize + delta;
            if next < 0 {
                return Err(Error::BadJump(delta));
            }
            pc = next as usize;
        }
        Ok(())
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or(Error::Underflow)
    }

    fn pop_into<T>(&mut self) -> Result<T>
    where
        Value: TryInto<T>,
    {
        let value = self.pop()?;
        value.try_into()
    }

    fn peek(&self) -> Result<&Value> {
        self.stack.last().ok_or(Error::Underflow)
    }

    /***************************** dispatch *****************************/

    fn step(&mut self, op: &Opcode) -> Result<isize> {
        use Opcode::*;
        match op {
            PushConstInt(i) => self.push(Value::Int(*i)),
            PushConstBool(b) => self.push(Value::Bool(*b)),
            PushConstReal(r) => self.push(Value::Real(*r)),
            PushConstStr(s) => self.push(Value::Str(Rc::new(s.clone()))),
            PushConstChar(c) => self.push(Value::Char(*c)),
            PushConstFunction(name, builtin) => self.push(Value::Function(Rc::new(
                FunctionObject {
                    name: name.clone(),
                    builtin: *builtin,
                },
            ))),

            Add => self.int_binop(|a, b| Ok(a.wrapping_add(b)))?,
            Sub => self.int_binop(|a, b| Ok(a.wrapping_sub(b)))?,
            Mul => self.int_binop(|a, b| Ok(a.wrapping_mul(b)))?,
            Div => self.int_binop(|a, b| {
                if b == 0 {
                    Err(Error::DivisionByZero)
                } else {
                    Ok(a.wrapping_div(b))
                }
            })?,
            Modulo => self.int_binop(|a, b| {
                if b == 0 {
                    Err(Error::DivisionByZero)
                } else {
                    Ok(a.wrapping_rem(b))
                }
            })?,
            RealAdd => self.real_binop(|a, b| a + b)?,
            RealSub => self.real_binop(|a, b| a - b)?,
            RealMul => self.real_binop(|a, b| a * b)?,
            RealDiv => self.real_binop(|a, b| a / b)?,
            Concat => self.concat()?,
            Eq => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a.equals(&b)));
            }
            NotEq => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(!a.equals(&b)));
            }
            Lt => self.order_binop(|o| o == std::cmp::Ordering::Less)?,
            LtEq => self.order_binop(|o| o != std::cmp::Ordering::Greater)?,
            Gt => self.order_binop(|o| o == std::cmp::Ordering::Greater)?,
            GtEq => self.order_binop(|o| o != std::cmp::Ordering::Less)?,
            And => {
                let b: bool = self.pop_into()?;
                let a: bool = self.pop_into()?;
                self.push(Value::Bool(a && b));
            }
            Or => {
                let b: bool = self.pop_into()?;
                let a: bool = self.pop_into()?;
                self.push(Value::Bool(a || b));
            }
            In => self.contains()?,
            ListIndex => self.list_index()?,
            StringIndex => self.string_index()?,
            MapIndex => self.map_index()?,

            Minus => {
                let value = self.pop()?;
                match value {
                    Value::Int(i) => self.push(Value::Int(i.wrapping_neg())),
                    Value::Real(r) => self.push(Value::Real(-r)),
                    other => return Err(expected(TypeTag::Int | TypeTag::Real, &other)),
                }
            }
            Not => {
                let value: bool = self.pop_into()?;
                self.push(Value::Bool(!value));
            }

            BuildList(n) => {
                let items = self.pop_values(*n)?;
                self.push(Value::list(items));
            }
            BuildMap(n) => {
                let mut map = ValueMap::new();
                for _ in 0..*n {
                    let key = self.pop()?;
                    let value = self.pop()?;
                    map.insert(key, value);
                }
                self.push(Value::Map(Rc::new(RefCell::new(map))));
            }
            BuildTuple(n) => {
                let items = self.pop_values(*n)?;
                self.push(Value::Tuple(Rc::new(items)));
            }
            BuildClass(name, n) => {
                let fields = self.pop_values(*n)?;
                self.push(Value::Class(Rc::new(ClassObject {
                    class: name.clone(),
                    fields: RefCell::new(fields),
                })));
            }
            PushEnum(label, n) => {
                let payload = self.pop_values(*n)?;
                self.push(Value::enumeration(label, payload));
            }

            PushName(name) => match self.env.get(name) {
                Some(value) => self.push(value),
                None => return Err(Error::NameError(name.clone())),
            },
            StoreName(name) => {
                let value = self.pop()?;
                if !self.env.assign(name, value.clone()) {
                    self.env.define(name, value);
                }
            }
            PushField(index) => {
                let object: Rc<ClassObject> = self.pop_into()?;
                let fields = object.fields.borrow();
                match fields.get(*index) {
                    Some(value) => {
                        let value = value.clone();
                        drop(fields);
                        self.push(value);
                    }
                    None => return Err(Error::Builtin(String::from("bad field index"))),
                }
            }
            StoreField(index) => {
                let object: Rc<ClassObject> = self.pop_into()?;
                let value = self.pop()?;
                let mut fields = object.fields.borrow_mut();
                match fields.get_mut(*index) {
                    Some(slot) => *slot = value,
                    None => return Err(Error::Builtin(String::from("bad field index"))),
                }
            }
            PushTupleField(index) => {
                let tuple = self.pop()?;
                match &tuple {
                    Value::Tuple(items) => match items.get(*index) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value);
                        }
                        None => return Err(Error::Builtin(String::from("bad tuple index"))),
                    },
                    other => return Err(expected(BitFlags::from_flag(TypeTag::Tuple), other)),
                }
            }
            StoreIndex => {
                let index: i64 = self.pop_into()?;
                let list: Rc<RefCell<Vec<Value>>> = self.pop_into()?;
                let value = self.pop()?;
                let mut items = list.borrow_mut();
                if index < 0 || index as usize >= items.len() {
                    return Err(Error::IndexOutOfBounds(index));
                }
                items[index as usize] = value;
            }
            StoreMapIndex => {
                let key = self.pop()?;
                let map: Rc<RefCell<ValueMap>> = self.pop_into()?;
                let value = self.pop()?;
                map.borrow_mut().insert(key, value);
            }
            LookupMethod(name) => {
                let object: Rc<ClassObject> = self.pop_into()?;
                let slot = format!("{}__{}", object.class, name);
                self.push(Value::Class(object));
                self.push(Value::Function(Rc::new(FunctionObject {
                    name: slot,
                    builtin: false,
                })));
            }

            RelJump(delta) => return Ok(*delta),
            RelJumpIfFalse(delta) => {
                let value: bool = self.pop_into()?;
                return Ok(if value { 1 } else { *delta });
            }
            RelJumpIfFalseOrPop(delta) => {
                let keep = match self.peek()? {
                    Value::Bool(b) => !b,
                    other => return Err(expected(BitFlags::from_flag(TypeTag::Bool), other)),
                };
                if keep {
                    return Ok(*delta);
                }
                self.pop()?;
            }
            RelJumpIfTrueOrPop(delta) => {
                let keep = match self.peek()? {
                    Value::Bool(b) => *b,
                    other => return Err(expected(BitFlags::from_flag(TypeTag::Bool), other)),
                };
                if keep {
                    return Ok(*delta);
                }
                self.pop()?;
            }

            CallFunction(argc) | CallBuiltin(argc) => self.call(*argc)?,
            Return => return Ok(0),

            GetIter => self.get_iter()?,
            ForIter(delta) => return self.for_iter(*delta),

            CheckLabel(label) => {
                let matches = match self.peek()? {
                    Value::Enum(object) => object.label == *label,
                    other => return Err(expected(BitFlags::from_flag(TypeTag::Enum), other)),
                };
                self.push(Value::Bool(matches));
            }
            PushEnumIndex(index) => {
                let value = match self.peek()? {
                    Value::Enum(object) => match object.payload.get(*index) {
                        Some(value) => value.clone(),
                        None => {
                            return Err(Error::Builtin(String::from("bad enum payload index")))
                        }
                    },
                    other => return Err(expected(BitFlags::from_flag(TypeTag::Enum), other)),
                };
                self.push(value);
            }

            BreakLoop | ContinueLoop => {
                return Err(Error::IllegalOpcode(op.to_string()));
            }
        }
        Ok(1)
    }

    /***************************** operators *****************************/

    fn int_binop(&mut self, apply: impl Fn(i64, i64) -> Result<i64>) -> Result<()> {
        let b: i64 = self.pop_into()?;
        let a: i64 = self.pop_into()?;
        let result = apply(a, b)?;
        self.push(Value::Int(result));
        Ok(())
    }

    fn real_binop(&mut self, apply: impl Fn(f64, f64) -> f64) -> Result<()> {
        let b: f64 = self.pop_into()?;
        let a: f64 = self.pop_into()?;
        self.push(Value::Real(apply(a, b)));
        Ok(())
    }

    fn order_binop(&mut self, admit: impl Fn(std::cmp::Ordering) -> bool) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match a.compare(&b) {
            Some(ordering) => {
                self.push(Value::Bool(admit(ordering)));
                Ok(())
            }
            None => Err(expected(
                TypeTag::Int | TypeTag::Real | TypeTag::Char | TypeTag::Str,
                &a,
            )),
        }
    }

    fn concat(&mut self) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Str(x), Value::Str(y)) => {
                let mut joined = String::with_capacity(x.len() + y.len());
                joined.push_str(x);
                joined.push_str(y);
                self.push(Value::Str(Rc::new(joined)));
                Ok(())
            }
            (Value::List(x), Value::List(y)) => {
                let mut joined = x.borrow().clone();
                joined.extend(y.borrow().iter().cloned());
                self.push(Value::list(joined));
                Ok(())
            }
            _ => Err(expected(TypeTag::Str | TypeTag::List, &a)),
        }
    }

    fn contains(&mut self) -> Result<()> {
        let container = self.pop()?;
        let item = self.pop()?;
        let found = match &container {
            Value::Str(text) => match &item {
                Value::Str(needle) => text.contains(needle.as_str()),
                other => return Err(expected(BitFlags::from_flag(TypeTag::Str), other)),
            },
            Value::List(items) => items.borrow().iter().any(|v| v.equals(&item)),
            Value::Map(map) => map.borrow().contains(&item),
            other => {
                return Err(expected(TypeTag::Str | TypeTag::List | TypeTag::Map, other))
            }
        };
        self.push(Value::Bool(found));
        Ok(())
    }

    fn list_index(&mut self) -> Result<()> {
        let index: i64 = self.pop_into()?;
        let list: Rc<RefCell<Vec<Value>>> = self.pop_into()?;
        let items = list.borrow();
        if index < 0 || index as usize >= items.len() {
            return Err(Error::IndexOutOfBounds(index));
        }
        let value = items[index as usize].clone();
        drop(items);
        self.push(value);
        Ok(())
    }

    // Indexing a string addresses UTF-8 code points and yields a
    // one-character string.
    fn string_index(&mut self) -> Result<()> {
        let index: i64 = self.pop_into()?;
        let text: Rc<String> = self.pop_into()?;
        if index < 0 {
            return Err(Error::IndexOutOfBounds(index));
        }
        match text.chars().nth(index as usize) {
            Some(c) => {
                self.push(Value::string(&c.to_string()));
                Ok(())
            }
            None => Err(Error::IndexOutOfBounds(index)),
        }
    }

    fn map_index(&mut self) -> Result<()> {
        let key = self.pop()?;
        let map: Rc<RefCell<ValueMap>> = self.pop_into()?;
        let value = match map.borrow().get(&key) {
            Some(value) => Value::some(value),
            None => Value::none(),
        };
        self.push(value);
        Ok(())
    }

    /***************************** calls *****************************/

    fn pop_values(&mut self, count: usize) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.pop()?);
        }
        Ok(values)
    }

    fn call(&mut self, argc: usize) -> Result<()> {
        let function: Rc<FunctionObject> = self.pop_into()?;
        let args = self.pop_values(argc)?;
        if function.builtin {
            let handler = builtins::handler(&function.name)
                .ok_or_else(|| Error::UnknownFunction(function.name.clone()))?;
            if let Some(value) = handler(args)? {
                self.push(value);
            }
            return Ok(());
        }
        let program = self.program.clone();
        let code = program
            .functions
            .get(&function.name)
            .ok_or_else(|| Error::UnknownFunction(function.name.clone()))?;
        let mut callee = Vm {
            program: self.program.clone(),
            stack: args,
            env: Env::chain(&self.env),
        };
        callee.execute(code)?;
        if let Some(value) = callee.stack.pop() {
            self.push(value);
        }
        Ok(())
    }

    /***************************** iteration *****************************/

    fn get_iter(&mut self) -> Result<()> {
        let collection = self.pop()?;
        let iterator = match &collection {
            Value::List(list) => Value::ListIter(Rc::new(ListIterator {
                list: list.clone(),
                index: Cell::new(0),
            })),
            Value::Str(text) => {
                let chars: Vec<Value> =
                    text.chars().map(|c| Value::string(&c.to_string())).collect();
                Value::ListIter(Rc::new(ListIterator {
                    list: Rc::new(RefCell::new(chars)),
                    index: Cell::new(0),
                }))
            }
            Value::Map(map) => Value::MapIter(Rc::new(MapIterator {
                map: map.clone(),
                bucket: Cell::new(0),
                chain: Cell::new(0),
            })),
            other => {
                return Err(expected(TypeTag::List | TypeTag::Str | TypeTag::Map, other))
            }
        };
        self.push(iterator);
        Ok(())
    }

    // Peek the iterator and advance it: push the next value (or key and
    // value for a map) and fall through, or pop the exhausted iterator
    // and jump past the loop body.
    fn for_iter(&mut self, delta: isize) -> Result<isize> {
        match self.peek()?.clone() {
            Value::ListIter(iterator) => {
                let index = iterator.index.get();
                let item = iterator.list.borrow().get(index).cloned();
                match item {
                    Some(value) => {
                        iterator.index.set(index + 1);
                        self.push(value);
                        Ok(1)
                    }
                    None => {
                        self.pop()?;
                        Ok(delta)
                    }
                }
            }
            Value::MapIter(iterator) => {
                let found = iterator
                    .map
                    .borrow()
                    .seek(iterator.bucket.get(), iterator.chain.get());
                match found {
                    Some((bucket, chain, key, value)) => {
                        iterator.bucket.set(bucket);
                        iterator.chain.set(chain + 1);
                        self.push(key);
                        self.push(value);
                        Ok(1)
                    }
                    None => {
                        self.pop()?;
                        Ok(delta)
                    }
                }
            }
            other => Err(expected(BitFlags::from_flag(TypeTag::Iterator), &other)),
        }
    }
}
