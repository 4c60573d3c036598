// The builtin function table.
//
// Every entry couples a static signature, which the compiler checks calls
// against, with a handler the VM routes CALL_BUILTIN to. Globals are keyed
// by their plain name; methods are keyed `<type>__<method>` and take the
// receiver as their first argument. Handlers re-check their argument tags
// at runtime: well-typed programs never trip those checks, but the VM does
// not trust bytecode it did not produce.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::types::{optional_of, FunctionType, Node, Type};
use crate::util;
use crate::value::{TypeTag, Value};
use crate::vm::{Error, Result};


pub type Handler = fn(Vec<Value>) -> Result<Option<Value>>;


/***************************** signatures *****************************/

fn signature(
    name: &str,
    generic_params: &[&str],
    params: Vec<Type>,
    return_type: Option<Type>,
) -> Node<FunctionType> {
    Node::new(FunctionType {
        name: String::from(name),
        public: true,
        generic_params: generic_params.iter().map(|p| String::from(*p)).collect(),
        params,
        return_type,
        builtin: true,
    })
}

fn list_of(item: Type) -> Type {
    Type::List(Node::new(item))
}

fn map_of(key: Type, value: Type) -> Type {
    Type::Map(Node::new(key), Node::new(value))
}

fn t() -> Type {
    Type::Parameter(String::from("T"))
}

fn k() -> Type {
    Type::Parameter(String::from("K"))
}

fn v() -> Type {
    Type::Parameter(String::from("V"))
}

// The global function table the compiler seeds its value symbols with.
pub fn globals() -> Vec<Node<FunctionType>> {
    vec![
        signature("print", &[], vec![Type::Any], None),
        signature(
            "length",
            &[],
            vec![Type::Union(vec![
                Type::Str,
                list_of(Type::Any),
                map_of(Type::Any, Type::Any),
            ])],
            Some(Type::Int),
        ),
        signature("range", &[], vec![Type::Int, Type::Int], Some(list_of(Type::Int))),
        signature("int", &[], vec![Type::Real], Some(Type::Int)),
        signature("real", &[], vec![Type::Int], Some(Type::Real)),
        signature(
            "string",
            &[],
            vec![Type::Union(vec![Type::Bool, Type::Char, Type::Int, Type::Str])],
            Some(Type::Str),
        ),
        signature("input", &[], vec![Type::Str], Some(optional_of(Type::Str))),
    ]
}

// Resolve a method name against the builtin tables for the receiver's
// type. The receiver is the signature's first parameter.
pub fn method(receiver: &Type, name: &str) -> Option<Node<FunctionType>> {
    match receiver {
        Type::List(_) => list_method(name),
        Type::Map(_, _) => map_method(name),
        Type::Str => string_method(name),
        _ => None,
    }
}

fn list_method(name: &str) -> Option<Node<FunctionType>> {
    let receiver = list_of(t());
    let sig = |full: &str, params: Vec<Type>, ret: Option<Type>| {
        let mut all = vec![receiver.clone()];
        all.extend(params);
        Some(signature(full, &["T"], all, ret))
    };
    match name {
        "append" => sig("list__append", vec![t()], None),
        "extend" => sig("list__extend", vec![list_of(t())], None),
        "length" => sig("list__length", vec![], Some(Type::Int)),
        "size" => sig("list__size", vec![], Some(Type::Int)),
        "remove" => sig("list__remove", vec![Type::Int], None),
        "slice" => sig("list__slice", vec![Type::Int, Type::Int], Some(list_of(t()))),
        "copy" => sig("list__copy", vec![], Some(list_of(t()))),
        "find" => sig("list__find", vec![t()], Some(optional_of(Type::Int))),
        "find_last" => sig("list__find_last", vec![t()], Some(optional_of(Type::Int))),
        "sorted" => sig("list__sorted", vec![], Some(list_of(t()))),
        "sort_in_place" => sig("list__sort_in_place", vec![], None),
        "reversed" => sig("list__reversed", vec![], Some(list_of(t()))),
        "reverse_in_place" => sig("list__reverse_in_place", vec![], None),
        "pop" => sig("list__pop", vec![], Some(t())),
        "join" => sig("list__join", vec![Type::Str], Some(Type::Str)),
        _ => None,
    }
}

fn map_method(name: &str) -> Option<Node<FunctionType>> {
    let receiver = map_of(k(), v());
    let sig = |full: &str, params: Vec<Type>, ret: Option<Type>| {
        let mut all = vec![receiver.clone()];
        all.extend(params);
        Some(signature(full, &["K", "V"], all, ret))
    };
    match name {
        "entries" => sig(
            "map__entries",
            vec![],
            Some(list_of(Type::Tuple(vec![k(), v()]))),
        ),
        "keys" => sig("map__keys", vec![], Some(list_of(k()))),
        "values" => sig("map__values", vec![], Some(list_of(v()))),
        "remove" => sig("map__remove", vec![k()], None),
        "copy" => sig("map__copy", vec![], Some(map_of(k(), v()))),
        "clear" => sig("map__clear", vec![], None),
        "size" => sig("map__size", vec![], Some(Type::Int)),
        "length" => sig("map__length", vec![], Some(Type::Int)),
        _ => None,
    }
}

fn string_method(name: &str) -> Option<Node<FunctionType>> {
    let sig = |full: &str, params: Vec<Type>, ret: Option<Type>| {
        let mut all = vec![Type::Str];
        all.extend(params);
        Some(signature(full, &[], all, ret))
    };
    match name {
        "length" => sig("string__length", vec![], Some(Type::Int)),
        "size" => sig("string__size", vec![], Some(Type::Int)),
        "to_lower" => sig("string__to_lower", vec![], Some(Type::Str)),
        "to_lowercase" => sig("string__to_lowercase", vec![], Some(Type::Str)),
        "to_upper" => sig("string__to_upper", vec![], Some(Type::Str)),
        "to_uppercase" => sig("string__to_uppercase", vec![], Some(Type::Str)),
        "slice" => sig("string__slice", vec![Type::Int, Type::Int], Some(Type::Str)),
        "split" => sig("string__split", vec![Type::Str], Some(list_of(Type::Str))),
        "split_space" => sig("string__split_space", vec![], Some(list_of(Type::Str))),
        "find" => sig("string__find", vec![Type::Str], Some(optional_of(Type::Int))),
        "find_last" => sig(
            "string__find_last",
            vec![Type::Str],
            Some(optional_of(Type::Int)),
        ),
        "starts_with" => sig("string__starts_with", vec![Type::Str], Some(Type::Bool)),
        "ends_with" => sig("string__ends_with", vec![Type::Str], Some(Type::Bool)),
        "trim" => sig("string__trim", vec![], Some(Type::Str)),
        "trim_left" => sig("string__trim_left", vec![], Some(Type::Str)),
        "trim_right" => sig("string__trim_right", vec![], Some(Type::Str)),
        "remove_prefix" => sig("string__remove_prefix", vec![Type::Str], Some(Type::Str)),
        "remove_suffix" => sig("string__remove_suffix", vec![Type::Str], Some(Type::Str)),
        "replace_all" => sig(
            "string__replace_all",
            vec![Type::Str, Type::Str],
            Some(Type::Str),
        ),
        "replace_first" => sig(
            "string__replace_first",
            vec![Type::Str, Type::Str],
            Some(Type::Str),
        ),
        "replace_last" => sig(
            "string__replace_last",
            vec![Type::Str, Type::Str],
            Some(Type::Str),
        ),
        "quoted" => sig("string__quoted", vec![], Some(Type::Str)),
        "is_letter" => sig("string__is_letter", vec![], Some(Type::Bool)),
        "is_digit" => sig("string__is_digit", vec![], Some(Type::Bool)),
        "is_whitespace" => sig("string__is_whitespace", vec![], Some(Type::Bool)),
        "is_upper" => sig("string__is_upper", vec![], Some(Type::Bool)),
        "is_lower" => sig("string__is_lower", vec![], Some(Type::Bool)),
        "is_alphanumeric" => sig("string__is_alphanumeric", vec![], Some(Type::Bool)),
        _ => None,
    }
}


/***************************** handlers *****************************/

fn expected(expect: BitFlags<TypeTag>, got: &Value) -> Error {
    Error::TypeError {
        expect,
        got: got.get_type(),
    }
}

fn arity(args: &[Value], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(Error::Arity {
            expected,
            got: args.len(),
        })
    }
}

fn want_int(value: &Value) -> Result<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(expected(BitFlags::from_flag(TypeTag::Int), other)),
    }
}

fn want_str(value: &Value) -> Result<Rc<String>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(expected(BitFlags::from_flag(TypeTag::Str), other)),
    }
}

fn want_list(value: &Value) -> Result<Rc<RefCell<Vec<Value>>>> {
    match value {
        Value::List(l) => Ok(l.clone()),
        other => Err(expected(BitFlags::from_flag(TypeTag::List), other)),
    }
}

fn want_map(value: &Value) -> Result<Rc<RefCell<crate::map::ValueMap>>> {
    match value {
        Value::Map(m) => Ok(m.clone()),
        other => Err(expected(BitFlags::from_flag(TypeTag::Map), other)),
    }
}

// Indices supplied by programs are i64; collections index by usize.
fn bounded(index: i64, len: usize) -> Result<usize> {
    if index >= 0 && (index as usize) < len {
        Ok(index as usize)
    } else {
        Err(Error::IndexOutOfBounds(index))
    }
}

fn slice_bounds(start: i64, end: i64, len: usize) -> Result<(usize, usize)> {
    if start < 0 || end < start || (end as usize) > len {
        return Err(Error::IndexOutOfBounds(if start < 0 { start } else { end }));
    }
    Ok((start as usize, end as usize))
}


fn builtin_print(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    println!("{}", args[0]);
    Ok(None)
}

fn builtin_length(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let length = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(l) => l.borrow().len(),
        Value::Map(m) => m.borrow().size(),
        other => {
            return Err(expected(
                TypeTag::Str | TypeTag::List | TypeTag::Map,
                other,
            ))
        }
    };
    Ok(Some(Value::Int(length as i64)))
}

fn builtin_range(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let start = want_int(&args[0])?;
    let end = want_int(&args[1])?;
    let items = (start..end).map(Value::Int).collect();
    Ok(Some(Value::list(items)))
}

fn builtin_int(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    match &args[0] {
        Value::Real(r) => Ok(Some(Value::Int(*r as i64))),
        other => Err(expected(BitFlags::from_flag(TypeTag::Real), other)),
    }
}

fn builtin_real(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    Ok(Some(Value::Real(want_int(&args[0])? as f64)))
}

fn builtin_string(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    match &args[0] {
        Value::Bool(_) | Value::Char(_) | Value::Int(_) | Value::Str(_) => {
            Ok(Some(Value::string(&args[0].to_string())))
        }
        other => Err(expected(
            TypeTag::Bool | TypeTag::Char | TypeTag::Int | TypeTag::Str,
            other,
        )),
    }
}

fn builtin_input(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let prompt = want_str(&args[0])?;
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => Ok(Some(Value::none())),
        Ok(_) => {
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            Ok(Some(Value::some(Value::Str(Rc::new(line)))))
        }
    }
}


fn list_append(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    want_list(&args[0])?.borrow_mut().push(args[1].clone());
    Ok(None)
}

fn list_extend(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let target = want_list(&args[0])?;
    let source = want_list(&args[1])?;
    // Snapshot first: `l.extend(l)` must not borrow twice.
    let items: Vec<Value> = source.borrow().clone();
    target.borrow_mut().extend(items);
    Ok(None)
}

fn list_length(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let length = want_list(&args[0])?.borrow().len();
    Ok(Some(Value::Int(length as i64)))
}

fn list_remove(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let list = want_list(&args[0])?;
    let index = want_int(&args[1])?;
    let index = bounded(index, list.borrow().len())?;
    list.borrow_mut().remove(index);
    Ok(None)
}

fn list_slice(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 3)?;
    let list = want_list(&args[0])?;
    let items = list.borrow();
    let (start, end) = slice_bounds(want_int(&args[1])?, want_int(&args[2])?, items.len())?;
    Ok(Some(Value::list(items[start..end].to_vec())))
}

fn list_copy(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let items = want_list(&args[0])?.borrow().clone();
    Ok(Some(Value::list(items)))
}

fn list_find(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let list = want_list(&args[0])?;
    let found = list.borrow().iter().position(|v| v.equals(&args[1]));
    Ok(Some(match found {
        Some(index) => Value::some(Value::Int(index as i64)),
        None => Value::none(),
    }))
}

fn list_find_last(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let list = want_list(&args[0])?;
    let found = list.borrow().iter().rposition(|v| v.equals(&args[1]));
    Ok(Some(match found {
        Some(index) => Value::some(Value::Int(index as i64)),
        None => Value::none(),
    }))
}

fn sort_values(items: &mut Vec<Value>) -> Result<()> {
    let mut comparable = true;
    items.sort_by(|a, b| match a.compare(b) {
        Some(order) => order,
        None => {
            comparable = false;
            Ordering::Equal
        }
    });
    if comparable {
        Ok(())
    } else {
        Err(Error::Builtin(String::from("list elements are not comparable")))
    }
}

fn list_sorted(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let mut items = want_list(&args[0])?.borrow().clone();
    sort_values(&mut items)?;
    Ok(Some(Value::list(items)))
}

fn list_sort_in_place(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let list = want_list(&args[0])?;
    let mut items = list.borrow_mut();
    sort_values(&mut items)?;
    Ok(None)
}

fn list_reversed(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let mut items = want_list(&args[0])?.borrow().clone();
    items.reverse();
    Ok(Some(Value::list(items)))
}

fn list_reverse_in_place(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    want_list(&args[0])?.borrow_mut().reverse();
    Ok(None)
}

fn list_pop(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    match want_list(&args[0])?.borrow_mut().pop() {
        Some(value) => Ok(Some(value)),
        None => Err(Error::Builtin(String::from("pop from an empty list"))),
    }
}

fn list_join(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let list = want_list(&args[0])?;
    let separator = want_str(&args[1])?;
    let mut parts = Vec::new();
    for item in list.borrow().iter() {
        parts.push(want_str(item)?.to_string());
    }
    Ok(Some(Value::string(&parts.join(&separator))))
}


fn map_entries(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let entries = want_map(&args[0])?
        .borrow()
        .entries()
        .into_iter()
        .map(|(key, value)| Value::Tuple(Rc::new(vec![key, value])))
        .collect();
    Ok(Some(Value::list(entries)))
}

fn map_keys(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let keys = want_map(&args[0])?
        .borrow()
        .entries()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    Ok(Some(Value::list(keys)))
}

fn map_values(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let values = want_map(&args[0])?
        .borrow()
        .entries()
        .into_iter()
        .map(|(_, value)| value)
        .collect();
    Ok(Some(Value::list(values)))
}

fn map_remove(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    want_map(&args[0])?.borrow_mut().remove(&args[1]);
    Ok(None)
}

fn map_copy(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let copy = want_map(&args[0])?.borrow().copy();
    Ok(Some(Value::Map(Rc::new(RefCell::new(copy)))))
}

fn map_clear(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    want_map(&args[0])?.borrow_mut().clear();
    Ok(None)
}

fn map_size(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let size = want_map(&args[0])?.borrow().size();
    Ok(Some(Value::Int(size as i64)))
}


fn string_length(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let length = want_str(&args[0])?.chars().count();
    Ok(Some(Value::Int(length as i64)))
}

fn string_to_lower(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    Ok(Some(Value::string(&want_str(&args[0])?.to_lowercase())))
}

fn string_to_upper(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    Ok(Some(Value::string(&want_str(&args[0])?.to_uppercase())))
}

fn string_slice(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 3)?;
    let chars: Vec<char> = want_str(&args[0])?.chars().collect();
    let (start, end) = slice_bounds(want_int(&args[1])?, want_int(&args[2])?, chars.len())?;
    let out: String = chars[start..end].iter().collect();
    Ok(Some(Value::string(&out)))
}

fn string_split(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let text = want_str(&args[0])?;
    let separator = want_str(&args[1])?;
    if separator.is_empty() {
        return Err(Error::Builtin(String::from("empty separator")));
    }
    let parts = text
        .split(separator.as_str())
        .map(Value::string)
        .collect();
    Ok(Some(Value::list(parts)))
}

fn string_split_space(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let parts = want_str(&args[0])?
        .split_whitespace()
        .map(Value::string)
        .collect();
    Ok(Some(Value::list(parts)))
}

// Positions reported by find are code-point indices, not byte offsets.
fn char_index(text: &str, byte: usize) -> i64 {
    text[..byte].chars().count() as i64
}

fn string_find(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let text = want_str(&args[0])?;
    let needle = want_str(&args[1])?;
    Ok(Some(match text.find(needle.as_str()) {
        Some(byte) => Value::some(Value::Int(char_index(&text, byte))),
        None => Value::none(),
    }))
}

fn string_find_last(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let text = want_str(&args[0])?;
    let needle = want_str(&args[1])?;
    Ok(Some(match text.rfind(needle.as_str()) {
        Some(byte) => Value::some(Value::Int(char_index(&text, byte))),
        None => Value::none(),
    }))
}

fn string_starts_with(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let text = want_str(&args[0])?;
    Ok(Some(Value::Bool(text.starts_with(want_str(&args[1])?.as_str()))))
}

fn string_ends_with(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let text = want_str(&args[0])?;
    Ok(Some(Value::Bool(text.ends_with(want_str(&args[1])?.as_str()))))
}

fn string_trim(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    Ok(Some(Value::string(want_str(&args[0])?.trim())))
}

fn string_trim_left(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    Ok(Some(Value::string(want_str(&args[0])?.trim_start())))
}

fn string_trim_right(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    Ok(Some(Value::string(want_str(&args[0])?.trim_end())))
}

fn string_remove_prefix(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let text = want_str(&args[0])?;
    let prefix = want_str(&args[1])?;
    Ok(Some(match text.strip_prefix(prefix.as_str()) {
        Some(rest) => Value::string(rest),
        None => Value::Str(text.clone()),
    }))
}

fn string_remove_suffix(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 2)?;
    let text = want_str(&args[0])?;
    let suffix = want_str(&args[1])?;
    Ok(Some(match text.strip_suffix(suffix.as_str()) {
        Some(rest) => Value::string(rest),
        None => Value::Str(text.clone()),
    }))
}

fn string_replace_all(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 3)?;
    let text = want_str(&args[0])?;
    let from = want_str(&args[1])?;
    let to = want_str(&args[2])?;
    if from.is_empty() {
        return Err(Error::Builtin(String::from("empty search string")));
    }
    Ok(Some(Value::string(&text.replace(from.as_str(), &to))))
}

fn string_replace_first(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 3)?;
    let text = want_str(&args[0])?;
    let from = want_str(&args[1])?;
    let to = want_str(&args[2])?;
    if from.is_empty() {
        return Err(Error::Builtin(String::from("empty search string")));
    }
    Ok(Some(Value::string(&text.replacen(from.as_str(), &to, 1))))
}

fn string_replace_last(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 3)?;
    let text = want_str(&args[0])?;
    let from = want_str(&args[1])?;
    let to = want_str(&args[2])?;
    if from.is_empty() {
        return Err(Error::Builtin(String::from("empty search string")));
    }
    Ok(Some(match text.rfind(from.as_str()) {
        Some(byte) => {
            let mut out = String::from(&text[..byte]);
            out.push_str(&to);
            out.push_str(&text[byte + from.len()..]);
            Value::string(&out)
        }
        None => Value::Str(text.clone()),
    }))
}

fn string_quoted(args: Vec<Value>) -> Result<Option<Value>> {
    arity(&args, 1)?;
    Ok(Some(Value::string(&util::quote(&want_str(&args[0])?))))
}

// A category predicate holds when the string is non-empty and every
// code point is in the category.
fn category(args: Vec<Value>, test: fn(char) -> bool) -> Result<Option<Value>> {
    arity(&args, 1)?;
    let text = want_str(&args[0])?;
    Ok(Some(Value::Bool(
        !text.is_empty() && text.chars().all(test),
    )))
}

fn string_is_letter(args: Vec<Value>) -> Result<Option<Value>> {
    category(args, char::is_alphabetic)
}

fn string_is_digit(args: Vec<Value>) -> Result<Option<Value>> {
    category(args, char::is_numeric)
}

fn string_is_whitespace(args: Vec<Value>) -> Result<Option<Value>> {
    category(args, char::is_whitespace)
}

fn string_is_upper(args: Vec<Value>) -> Result<Option<Value>> {
    category(args, char::is_uppercase)
}

fn string_is_lower(args: Vec<Value>) -> Result<Option<Value>> {
    category(args, char::is_lowercase)
}

fn string_is_alphanumeric(args: Vec<Value>) -> Result<Option<Value>> {
    category(args, char::is_alphanumeric)
}


lazy_static! {
    static ref HANDLERS: HashMap<&'static str, Handler> = {
        let mut table: HashMap<&'static str, Handler> = HashMap::new();
        table.insert("print", builtin_print);
        table.insert("length", builtin_length);
        table.insert("range", builtin_range);
        table.insert("int", builtin_int);
        table.insert("real", builtin_real);
        table.insert("string", builtin_string);
        table.insert("input", builtin_input);

        table.insert("list__append", list_append);
        table.insert("list__extend", list_extend);
        table.insert("list__length", list_length);
        table.insert("list__size", list_length);
        table.insert("list__remove", list_remove);
        table.insert("list__slice", list_slice);
        table.insert("list__copy", list_copy);
        table.insert("list__find", list_find);
        table.insert("list__find_last", list_find_last);
        table.insert("list__sorted", list_sorted);
        table.insert("list__sort_in_place", list_sort_in_place);
        table.insert("list__reversed", list_reversed);
        table.insert("list__reverse_in_place", list_reverse_in_place);
        table.insert("list__pop", list_pop);
        table.insert("list__join", list_join);

        table.insert("map__entries", map_entries);
        table.insert("map__keys", map_keys);
        table.insert("map__values", map_values);
        table.insert("map__remove", map_remove);
        table.insert("map__copy", map_copy);
        table.insert("map__clear", map_clear);
        table.insert("map__size", map_size);
        table.insert("map__length", map_size);

        table.insert("string__length", string_length);
        table.insert("string__size", string_length);
        table.insert("string__to_lower", string_to_lower);
        table.insert("string__to_lowercase", string_to_lower);
        table.insert("string__to_upper", string_to_upper);
        table.insert("string__to_uppercase", string_to_upper);
        table.insert("string__slice", string_slice);
        table.insert("string__split", string_split);
        table.insert("string__split_space", string_split_space);
        table.insert("string__find", string_find);
        table.insert("string__find_last", string_find_last);
        table.insert("string__starts_with", string_starts_with);
        table.insert("string__ends_with", string_ends_with);
        table.insert("string__trim", string_trim);
        table.insert("string__trim_left", string_trim_left);
        table.insert("string__trim_right", string_trim_right);
        table.insert("string__remove_prefix", string_remove_prefix);
        table.insert("string__remove_suffix", string_remove_suffix);
        table.insert("string__replace_all", string_replace_all);
        table.insert("string__replace_first", string_replace_first);
        table.insert("string__replace_last", string_replace_last);
        table.insert("string__quoted", string_quoted);
        table.insert("string__is_letter", string_is_letter);
        table.insert("string__is_digit", string_is_digit);
        table.insert("string__is_whitespace", string_is_whitespace);
        table.insert("string__is_upper", string_is_upper);
        table.insert("string__is_lower", string_is_lower);
        table.insert("string__is_alphanumeric", string_is_alphanumeric);
        table
    };
}

pub fn handler(name: &str) -> Option<Handler> {
    HANDLERS.get(name).copied()
}
