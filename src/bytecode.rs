// The bytecode program representation and its textual format.
//
// A program is a version integer, a list of imports, and a mapping from
// function name to an ordered instruction sequence. The entry point is the
// reserved name `main`; methods occupy `Class__method` slots and imported
// functions `module::name` slots.
//
// The text form is one `name:` header line per function followed by
// indented instruction lines. String operands are double-quoted, booleans
// are 0/1, reals always carry a decimal point, and jump deltas may be
// negative. Writing a program and re-parsing the output yields an equal
// program.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;

use crate::util;


pub const VERSION: i64 = 1;


#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    // Stack literals.
    PushConstInt(i64),
    PushConstBool(bool),
    PushConstReal(f64),
    PushConstStr(String),
    PushConstChar(u8),
    PushConstFunction(String, bool),
    // Binary operators.
    Add,
    Sub,
    Mul,
    Div,
    Modulo,
    RealAdd,
    RealSub,
    RealMul,
    RealDiv,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    In,
    ListIndex,
    StringIndex,
    MapIndex,
    // Unary operators.
    Minus,
    Not,
    // Aggregate builders.
    BuildList(usize),
    BuildMap(usize),
    BuildTuple(usize),
    BuildClass(String, usize),
    PushEnum(String, usize),
    // Access and assignment.
    PushName(String),
    StoreName(String),
    PushField(usize),
    StoreField(usize),
    PushTupleField(usize),
    StoreIndex,
    StoreMapIndex,
    LookupMethod(String),
    // Control flow. Deltas are relative to the jump's own index; a
    // delta of 1 proceeds to the next instruction.
    RelJump(isize),
    RelJumpIfFalse(isize),
    RelJumpIfFalseOrPop(isize),
    RelJumpIfTrueOrPop(isize),
    CallFunction(usize),
    CallBuiltin(usize),
    Return,
    // Iteration.
    GetIter,
    ForIter(isize),
    // Pattern dispatch.
    CheckLabel(String),
    PushEnumIndex(usize),
    // Loop placeholders. Emitted inside loop bodies and replaced by the
    // compiler's back-patching pass; the VM rejects them.
    BreakLoop,
    ContinueLoop,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Import {
    pub path: String,
    pub alias: String,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub version: i64,
    pub imports: Vec<Import>,
    pub functions: HashMap<String, Vec<Opcode>>,
}

impl Program {
    pub fn new() -> Program {
        Program {
            version: VERSION,
            imports: Vec::new(),
            functions: HashMap::new(),
        }
    }
}


impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Opcode::*;
        match self {
            PushConstInt(i) => write!(f, "PUSH_CONST_INT {}", i),
            PushConstBool(b) => write!(f, "PUSH_CONST_BOOL {}", *b as u8),
            PushConstReal(r) => write!(f, "PUSH_CONST_REAL {:?}", r),
            PushConstStr(s) => write!(f, "PUSH_CONST_STR {}", util::quote(s)),
            PushConstChar(c) => write!(f, "PUSH_CONST_CHAR {}", c),
            PushConstFunction(name, builtin) => {
                write!(f, "PUSH_CONST_FUNCTION {} {}", util::quote(name), *builtin as u8)
            }
            Add => write!(f, "ADD"),
            Sub => write!(f, "SUB"),
            Mul => write!(f, "MUL"),
            Div => write!(f, "DIV"),
            Modulo => write!(f, "MODULO"),
            RealAdd => write!(f, "REAL_ADD"),
            RealSub => write!(f, "REAL_SUB"),
            RealMul => write!(f, "REAL_MUL"),
            RealDiv => write!(f, "REAL_DIV"),
            Concat => write!(f, "CONCAT"),
            Eq => write!(f, "EQ"),
            NotEq => write!(f, "NOT_EQ"),
            Lt => write!(f, "LT"),
            LtEq => write!(f, "LT_EQ"),
            Gt => write!(f, "GT"),
            GtEq => write!(f, "GT_EQ"),
            And => write!(f, "AND"),
            Or => write!(f, "OR"),
            In => write!(f, "IN"),
            ListIndex => write!(f, "LIST_INDEX"),
            StringIndex => write!(f, "STRING_INDEX"),
            MapIndex => write!(f, "MAP_INDEX"),
            Minus => write!(f, "MINUS"),
            Not => write!(f, "NOT"),
            BuildList(n) => write!(f, "BUILD_LIST {}", n),
            BuildMap(n) => write!(f, "BUILD_MAP {}", n),
            BuildTuple(n) => write!(f, "BUILD_TUPLE {}", n),
            BuildClass(name, n) => write!(f, "BUILD_CLASS {} {}", util::quote(name), n),
            PushEnum(label, n) => write!(f, "PUSH_ENUM {} {}", util::quote(label), n),
            PushName(s) => write!(f, "PUSH_NAME {}", util::quote(s)),
            StoreName(s) => write!(f, "STORE_NAME {}", util::quote(s)),
            PushField(i) => write!(f, "PUSH_FIELD {}", i),
            StoreField(i) => write!(f, "STORE_FIELD {}", i),
            PushTupleField(i) => write!(f, "PUSH_TUPLE_FIELD {}", i),
            StoreIndex => write!(f, "STORE_INDEX"),
            StoreMapIndex => write!(f, "STORE_MAP_INDEX"),
            LookupMethod(name) => write!(f, "LOOKUP_METHOD {}", util::quote(name)),
            RelJump(d) => write!(f, "REL_JUMP {}", d),
            RelJumpIfFalse(d) => write!(f, "REL_JUMP_IF_FALSE {}", d),
            RelJumpIfFalseOrPop(d) => write!(f, "REL_JUMP_IF_FALSE_OR_POP {}", d),
            RelJumpIfTrueOrPop(d) => write!(f, "REL_JUMP_IF_TRUE_OR_POP {}", d),
            CallFunction(n) => write!(f, "CALL_FUNCTION {}", n),
            CallBuiltin(n) => write!(f, "CALL_BUILTIN {}", n),
            Return => write!(f, "RETURN"),
            GetIter => write!(f, "GET_ITER"),
            ForIter(d) => write!(f, "FOR_ITER {}", d),
            CheckLabel(s) => write!(f, "CHECK_LABEL {}", util::quote(s)),
            PushEnumIndex(i) => write!(f, "PUSH_ENUM_INDEX {}", i),
            BreakLoop => write!(f, "BREAK_LOOP"),
            ContinueLoop => write!(f, "CONTINUE_LOOP"),
        }
    }
}


impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "version {}", self.version)?;
        for import in &self.imports {
            writeln!(
                f,
                "import {} {}",
                util::quote(&import.path),
                util::quote(&import.alias)
            )?;
        }
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        for name in names {
            writeln!(f)?;
            writeln!(f, "{}:", name)?;
            for op in &self.functions[name] {
                writeln!(f, "  {}", op)?;
            }
        }
        Ok(())
    }
}


#[derive(Clone, Debug, PartialEq)]
pub struct BytecodeError {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for BytecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

type Parse<T> = Result<T, BytecodeError>;

fn error<T>(message: String, line: usize) -> Parse<T> {
    Err(BytecodeError { message, line })
}


// Split one instruction line into its opcode name and operand tokens. A
// quoted operand may contain whitespace and escaped quotes.
fn tokenize(line: &str) -> Vec<String> {
    lazy_static! {
        static ref TOKEN: Regex = Regex::new(r#""(?:[^"\\]|\\.)*"|\S+"#).unwrap();
    }
    TOKEN.find_iter(line).map(|m| String::from(m.as_str())).collect()
}

fn int_operand(token: &str, line: usize) -> Parse<i64> {
    match token.parse() {
        Ok(value) => Ok(value),
        Err(_) => error(format!("bad integer operand `{}`", token), line),
    }
}

fn count_operand(token: &str, line: usize) -> Parse<usize> {
    match token.parse() {
        Ok(value) => Ok(value),
        Err(_) => error(format!("bad count operand `{}`", token), line),
    }
}

fn delta_operand(token: &str, line: usize) -> Parse<isize> {
    match token.parse() {
        Ok(value) => Ok(value),
        Err(_) => error(format!("bad jump operand `{}`", token), line),
    }
}

fn real_operand(token: &str, line: usize) -> Parse<f64> {
    match token.parse() {
        Ok(value) => Ok(value),
        Err(_) => error(format!("bad real operand `{}`", token), line),
    }
}

fn bool_operand(token: &str, line: usize) -> Parse<bool> {
    match token {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => error(format!("bad boolean operand `{}`", token), line),
    }
}

fn str_operand(token: &str, line: usize) -> Parse<String> {
    match util::unquote(token) {
        Some(value) => Ok(value),
        None => error(format!("bad string operand `{}`", token), line),
    }
}


fn parse_opcode(tokens: &[String], line: usize) -> Parse<Opcode> {
    use Opcode::*;
    let name = tokens[0].as_str();
    let args = &tokens[1..];
    let arity = match name {
        "ADD" | "SUB" | "MUL" | "DIV" | "MODULO" | "REAL_ADD" | "REAL_SUB" | "REAL_MUL"
        | "REAL_DIV" | "CONCAT" | "EQ" | "NOT_EQ" | "LT" | "LT_EQ" | "GT" | "GT_EQ" | "AND"
        | "OR" | "IN" | "LIST_INDEX" | "STRING_INDEX" | "MAP_INDEX" | "MINUS" | "NOT"
        | "STORE_INDEX" | "STORE_MAP_INDEX" | "RETURN" | "GET_ITER" | "BREAK_LOOP"
        | "CONTINUE_LOOP" => 0,
        "PUSH_CONST_FUNCTION" | "BUILD_CLASS" | "PUSH_ENUM" => 2,
        _ => 1,
    };
    if args.len() != arity {
        return error(
            format!("opcode {} takes {} operands, got {}", name, arity, args.len()),
            line,
        );
    }
    let op = match name {
        "PUSH_CONST_INT" => PushConstInt(int_operand(&args[0], line)?),
        "PUSH_CONST_BOOL" => PushConstBool(bool_operand(&args[0], line)?),
        "PUSH_CONST_REAL" => PushConstReal(real_operand(&args[0], line)?),
        "PUSH_CONST_STR" => PushConstStr(str_operand(&args[0], line)?),
        "PUSH_CONST_CHAR" => {
            let code = int_operand(&args[0], line)?;
            if code < 0 || code > 255 {
                return error(format!("bad character operand `{}`", code), line);
            }
            PushConstChar(code as u8)
        }
        "PUSH_CONST_FUNCTION" => {
            PushConstFunction(str_operand(&args[0], line)?, bool_operand(&args[1], line)?)
        }
        "ADD" => Add,
        "SUB" => Sub,
        "MUL" => Mul,
        "DIV" => Div,
        "MODULO" => Modulo,
        "REAL_ADD" => RealAdd,
        "REAL_SUB" => RealSub,
        "REAL_MUL" => RealMul,
        "REAL_DIV" => RealDiv,
        "CONCAT" => Concat,
        "EQ" => Eq,
        "NOT_EQ" => NotEq,
        "LT" => Lt,
        "LT_EQ" => LtEq,
        "GT" => Gt,
        "GT_EQ" => GtEq,
        "AND" => And,
        "OR" => Or,
        "IN" => In,
        "LIST_INDEX" => ListIndex,
        "STRING_INDEX" => StringIndex,
        "MAP_INDEX" => MapIndex,
        "MINUS" => Minus,
        "NOT" => Not,
        "BUILD_LIST" => BuildList(count_operand(&args[0], line)?),
        "BUILD_MAP" => BuildMap(count_operand(&args[0], line)?),
        "BUILD_TUPLE" => BuildTuple(count_operand(&args[0], line)?),
        "BUILD_CLASS" => {
            BuildClass(str_operand(&args[0], line)?, count_operand(&args[1], line)?)
        }
        "PUSH_ENUM" => PushEnum(str_operand(&args[0], line)?, count_operand(&args[1], line)?),
        "PUSH_NAME" => PushName(str_operand(&args[0], line)?),
        "STORE_NAME" => StoreName(str_operand(&args[0], line)?),
        "PUSH_FIELD" => PushField(count_operand(&args[0], line)?),
        "STORE_FIELD" => StoreField(count_operand(&args[0], line)?),
        "PUSH_TUPLE_FIELD" => PushTupleField(count_operand(&args[0], line)?),
        "STORE_INDEX" => StoreIndex,
        "STORE_MAP_INDEX" => StoreMapIndex,
        "LOOKUP_METHOD" => LookupMethod(str_operand(&args[0], line)?),
        "REL_JUMP" => RelJump(delta_operand(&args[0], line)?),
        "REL_JUMP_IF_FALSE" => RelJumpIfFalse(delta_operand(&args[0], line)?),
        "REL_JUMP_IF_FALSE_OR_POP" => RelJumpIfFalseOrPop(delta_operand(&args[0], line)?),
        "REL_JUMP_IF_TRUE_OR_POP" => RelJumpIfTrueOrPop(delta_operand(&args[0], line)?),
        "CALL_FUNCTION" => CallFunction(count_operand(&args[0], line)?),
        "CALL_BUILTIN" => CallBuiltin(count_operand(&args[0], line)?),
        "RETURN" => Return,
        "GET_ITER" => GetIter,
        "FOR_ITER" => ForIter(delta_operand(&args[0], line)?),
        "CHECK_LABEL" => CheckLabel(str_operand(&args[0], line)?),
        "PUSH_ENUM_INDEX" => PushEnumIndex(count_operand(&args[0], line)?),
        "BREAK_LOOP" => BreakLoop,
        "CONTINUE_LOOP" => ContinueLoop,
        _ => return error(format!("unknown opcode `{}`", name), line),
    };
    Ok(op)
}


impl Program {
    pub fn parse(text: &str) -> Parse<Program> {
        let mut program = Program::new();
        let mut current: Option<String> = None;
        let mut seen_version = false;

        for (index, raw) in text.lines().enumerate() {
            let number = index + 1;
            let line = raw.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            if !seen_version {
                let tokens = tokenize(line);
                if tokens.len() != 2 || tokens[0] != "version" {
                    return error(String::from("expected a version header"), number);
                }
                program.version = int_operand(&tokens[1], number)?;
                seen_version = true;
                continue;
            }
            let indented = line.starts_with(' ') || line.starts_with('\t');
            let tokens = tokenize(line);
            if !indented && tokens.len() == 3 && tokens[0] == "import" {
                program.imports.push(Import {
                    path: str_operand(&tokens[1], number)?,
                    alias: str_operand(&tokens[2], number)?,
                });
                continue;
            }
            if !indented && tokens.len() == 1 && tokens[0].ends_with(':') {
                let name = String::from(&tokens[0][..tokens[0].len() - 1]);
                if name.is_empty() {
                    return error(String::from("empty function name"), number);
                }
                program.functions.insert(name.clone(), Vec::new());
                current = Some(name);
                continue;
            }
            if indented {
                let op = parse_opcode(&tokens, number)?;
                match &current {
                    Some(name) => program.functions.get_mut(name).unwrap().push(op),
                    None => {
                        return error(
                            String::from("instruction outside of a function"),
                            number,
                        )
                    }
                }
                continue;
            }
            return error(format!("unrecognised line `{}`", line), number);
        }
        if !seen_version {
            return error(String::from("expected a version header"), 1);
        }
        Ok(program)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use Opcode::*;

    fn round_trip(program: &Program) {
        let text = program.to_string();
        trace!("{}", text);
        let parsed = Program::parse(&text).unwrap();
        assert_eq!(&parsed, program);
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(PushConstInt(-3).to_string(), "PUSH_CONST_INT -3");
        assert_eq!(PushConstBool(true).to_string(), "PUSH_CONST_BOOL 1");
        assert_eq!(PushConstReal(2.0).to_string(), "PUSH_CONST_REAL 2.0");
        assert_eq!(
            PushConstStr(String::from("a\"b")).to_string(),
            "PUSH_CONST_STR \"a\\\"b\""
        );
        assert_eq!(
            PushConstFunction(String::from("f"), true).to_string(),
            "PUSH_CONST_FUNCTION \"f\" 1"
        );
        assert_eq!(RelJump(-4).to_string(), "REL_JUMP -4");
        assert_eq!(
            BuildClass(String::from("Point"), 2).to_string(),
            "BUILD_CLASS \"Point\" 2"
        );
    }

    #[test]
    fn test_simple_round_trip() {
        let mut program = Program::new();
        program.functions.insert(
            String::from("main"),
            vec![PushConstInt(1), PushConstInt(2), Add],
        );
        round_trip(&program);
    }

    #[test]
    fn test_full_round_trip() {
        let mut program = Program::new();
        program.imports.push(Import {
            path: String::from("/usr/lib/venice0.1/math.vn"),
            alias: String::from("math"),
        });
        program.functions.insert(
            String::from("main"),
            vec![
                PushConstStr(String::from("tricky \"operand\"\n")),
                PushConstReal(-0.5),
                PushConstChar(b'x'),
                PushConstFunction(String::from("math::gcd"), false),
                CallFunction(2),
                GetIter,
                ForIter(4),
                StoreName(String::from("x")),
                RelJump(-2),
                Return,
            ],
        );
        program.functions.insert(
            String::from("Point__norm"),
            vec![
                StoreName(String::from("self")),
                PushName(String::from("self")),
                PushField(0),
                Return,
            ],
        );
        program.functions.insert(
            String::from("math::gcd"),
            vec![PushEnum(String::from("Some"), 1), Return],
        );
        round_trip(&program);
    }

    // Every opcode in the inventory survives the text format.
    #[test]
    fn test_whole_inventory_round_trips() {
        let mut program = Program::new();
        program.functions.insert(
            String::from("main"),
            vec![
                PushConstInt(i64::MIN),
                PushConstBool(false),
                PushConstBool(true),
                PushConstReal(3.5),
                PushConstStr(String::new()),
                PushConstChar(0),
                PushConstFunction(String::from("list__append"), true),
                Add,
                Sub,
                Mul,
                Div,
                Modulo,
                RealAdd,
                RealSub,
                RealMul,
                RealDiv,
                Concat,
                Eq,
                NotEq,
                Lt,
                LtEq,
                Gt,
                GtEq,
                And,
                Or,
                In,
                ListIndex,
                StringIndex,
                MapIndex,
                Minus,
                Not,
                BuildList(0),
                BuildMap(3),
                BuildTuple(2),
                BuildClass(String::from("Point"), 2),
                PushEnum(String::from("None"), 0),
                PushName(String::from("x")),
                StoreName(String::from("x")),
                PushField(1),
                StoreField(1),
                PushTupleField(0),
                StoreIndex,
                StoreMapIndex,
                LookupMethod(String::from("norm")),
                RelJump(-12),
                RelJumpIfFalse(3),
                RelJumpIfFalseOrPop(2),
                RelJumpIfTrueOrPop(2),
                CallFunction(2),
                CallBuiltin(1),
                Return,
                GetIter,
                ForIter(7),
                CheckLabel(String::from("Some")),
                PushEnumIndex(0),
                BreakLoop,
                ContinueLoop,
            ],
        );
        round_trip(&program);
    }

    #[test]
    fn test_bad_operand_values() {
        assert!(Program::parse("version 1\nmain:\n  PUSH_CONST_BOOL 2\n").is_err());
        assert!(Program::parse("version 1\nmain:\n  PUSH_CONST_CHAR 300\n").is_err());
        assert!(Program::parse("version 1\nmain:\n  BUILD_LIST -1\n").is_err());
        assert!(Program::parse("version 1\nmain:\n  PUSH_CONST_STR unquoted\n").is_err());
        assert!(Program::parse("version 1\nmain:\n  REL_JUMP -3\n").is_ok());
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let text = "\n\nversion 1\n\nmain:\n\n  RETURN\n\n";
        let program = Program::parse(text).unwrap();
        assert_eq!(program.functions["main"], vec![Return]);
    }

    #[test]
    fn test_missing_version() {
        let err = Program::parse("main:\n  RETURN\n").unwrap_err();
        assert!(err.message.contains("version"));
    }

    #[test]
    fn test_unknown_opcode() {
        let err = Program::parse("version 1\nmain:\n  NO_SUCH_OP\n").unwrap_err();
        assert!(err.message.contains("unknown opcode"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_operand_arity_checked() {
        let err = Program::parse("version 1\nmain:\n  PUSH_CONST_INT\n").unwrap_err();
        assert!(err.message.contains("operands"));
    }

    #[test]
    fn test_instruction_needs_function() {
        let err = Program::parse("version 1\n  RETURN\n").unwrap_err();
        assert!(err.message.contains("outside of a function"));
    }
}
