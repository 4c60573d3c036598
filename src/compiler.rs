// The compiler: one pass over the syntax tree that type-checks and emits
// bytecode at the same time. There is no typed intermediate tree; every
// expression compiles to `(instructions, static type)` and every checker
// decision is visible in the emitted code.
//
// State carried across the walk: a value symbol table and a type symbol
// table (both parent-chained scopes), the current function's declared
// return type and whether a return has been seen, and the nesting depth
// of loops for `break`/`continue` placement.
//
// Operand order convention: subexpressions are emitted right-to-left, so
// that popping n values off the stack yields them left-to-right. The
// aggregate builders and both call opcodes rely on this.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::*;
use crate::builtins;
use crate::bytecode::{Import, Opcode, Program, VERSION};
use crate::env::Env;
use crate::lexer::Location;
use crate::parser::Parser;
use crate::types::{
    optional_of, ClassField, ClassType, EnumCase, EnumType, FunctionType, GenericBindings,
    ModuleType, Node, Type,
};


#[derive(Clone, Debug, PartialEq)]
pub struct CompileError {
    pub message: String,
    pub location: Option<Location>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.message, location),
            None => write!(f, "{}", self.message),
        }
    }
}

pub type Compile<T> = Result<T, CompileError>;

fn fail<T>(message: String, location: &Location) -> Compile<T> {
    Err(CompileError {
        message,
        location: Some(location.clone()),
    })
}


// The seam between the compiler and file I/O: imports are resolved
// through a loader so tests and the REPL can substitute their own.
pub trait ModuleLoader {
    fn load(&self, path: &str) -> Result<String, String>;
}

pub struct FsLoader;

impl ModuleLoader for FsLoader {
    fn load(&self, path: &str) -> Result<String, String> {
        std::fs::read_to_string(path).map_err(|e| e.to_string())
    }
}

struct NoLoader;

impl ModuleLoader for NoLoader {
    fn load(&self, _path: &str) -> Result<String, String> {
        Err(String::from("module loading is not available here"))
    }
}


#[derive(Clone)]
struct Binding {
    binding_type: Type,
    mutable: bool,
}

struct FunctionInfo {
    return_type: Option<Type>,
    seen_return: bool,
}


pub struct Compiler {
    symbols: Node<Env<Binding>>,
    types: Node<Env<Type>>,
    functions: HashMap<String, Vec<Opcode>>,
    imports: Vec<Import>,
    exports: Vec<(String, Node<FunctionType>)>,
    function_info: Option<FunctionInfo>,
    loop_depth: usize,
    loader: Rc<dyn ModuleLoader>,
}

impl Compiler {
    pub fn new() -> Compiler {
        Self::with_loader(Rc::new(NoLoader))
    }

    pub fn with_loader(loader: Rc<dyn ModuleLoader>) -> Compiler {
        let symbols: Node<Env<Binding>> = Env::root();
        let types: Node<Env<Type>> = Env::root();
        for (name, primitive) in &[
            ("any", Type::Any),
            ("bool", Type::Bool),
            ("char", Type::Char),
            ("int", Type::Int),
            ("real", Type::Real),
            ("string", Type::Str),
        ] {
            types.define(name, primitive.clone());
        }
        types.define("Optional", Type::Enum(crate::types::optional_enum()));
        for builtin in builtins::globals() {
            symbols.define(
                &builtin.name.clone(),
                Binding {
                    binding_type: Type::Function(builtin),
                    mutable: false,
                },
            );
        }
        Compiler {
            symbols,
            types,
            functions: HashMap::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            function_info: None,
            loop_depth: 0,
            loader,
        }
    }

    // Compile a whole source file. Declarations land in their own
    // function slots; everything else accumulates into `main`.
    pub fn compile_program(&mut self, statements: &[Statement]) -> Compile<Program> {
        let mut main = Vec::new();
        for statement in statements {
            let (code, _) = self.compile_top_statement(statement)?;
            main.extend(code);
        }
        self.functions.insert(String::from("main"), main);
        Ok(self.snapshot(Vec::new()))
    }

    // One top-level statement at a time, for the REPL. Returns the code
    // to run now (empty for declarations) and the statement's type, so
    // the caller knows whether a value is worth printing.
    pub fn compile_top_statement(
        &mut self,
        statement: &Statement,
    ) -> Compile<(Vec<Opcode>, Type)> {
        match &statement.kind {
            StatementKind::Function(decl) => {
                self.compile_function_declaration(decl, &statement.location)?;
                Ok((Vec::new(), Type::Void))
            }
            StatementKind::Class(decl) => {
                self.compile_class_declaration(decl, &statement.location)?;
                Ok((Vec::new(), Type::Void))
            }
            StatementKind::Enum(decl) => {
                self.compile_enum_declaration(decl, &statement.location)?;
                Ok((Vec::new(), Type::Void))
            }
            StatementKind::Import { path, alias } => {
                self.compile_import(path, alias, &statement.location)?;
                Ok((Vec::new(), Type::Void))
            }
            StatementKind::Expression(expr) => {
                let (code, expression_type) = self.compile_expression(expr)?;
                Ok((code, expression_type))
            }
            _ => Ok((self.compile_statement(statement)?, Type::Void)),
        }
    }

    // A program snapshot with the given code as `main`; the REPL uses
    // this to run each statement against the accumulated declarations.
    pub fn snapshot(&self, main: Vec<Opcode>) -> Program {
        let mut functions = self.functions.clone();
        if !main.is_empty() || !functions.contains_key("main") {
            functions.insert(String::from("main"), main);
        }
        Program {
            version: VERSION,
            imports: self.imports.clone(),
            functions,
        }
    }

    /***************************** statements *****************************/

    fn compile_block(&mut self, statements: &[Statement]) -> Compile<Vec<Opcode>> {
        let saved = self.symbols.clone();
        self.symbols = Env::chain(&saved);
        let mut code = Vec::new();
        let mut result = Ok(());
        for statement in statements {
            match self.compile_statement(statement) {
                Ok(statement_code) => code.extend(statement_code),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.symbols = saved;
        result.map(|_| code)
    }

    fn compile_statement(&mut self, statement: &Statement) -> Compile<Vec<Opcode>> {
        let location = &statement.location;
        match &statement.kind {
            StatementKind::Declaration {
                name,
                mutable,
                annotation,
                value,
            } => self.compile_declaration(name, *mutable, annotation.as_ref(), value, location),
            StatementKind::Assignment { target, value } => {
                self.compile_assignment(target, value, location)
            }
            StatementKind::Expression(expr) => Ok(self.compile_expression(expr)?.0),
            StatementKind::If { clauses, otherwise } => {
                self.compile_if(clauses, otherwise.as_deref())
            }
            StatementKind::While { condition, body } => self.compile_while(condition, body),
            StatementKind::For {
                variables,
                iterable,
                body,
            } => self.compile_for(variables, iterable, body, location),
            StatementKind::Break => {
                if self.loop_depth == 0 {
                    return fail(String::from("`break` outside of a loop"), location);
                }
                Ok(vec![Opcode::BreakLoop])
            }
            StatementKind::Continue => {
                if self.loop_depth == 0 {
                    return fail(String::from("`continue` outside of a loop"), location);
                }
                Ok(vec![Opcode::ContinueLoop])
            }
            StatementKind::Return(value) => self.compile_return(value.as_ref(), location),
            StatementKind::Match {
                scrutinee,
                arms,
                default,
            } => self.compile_match(scrutinee, arms, default.as_deref(), location),
            StatementKind::Function(decl) => fail(
                format!("nested function declaration `{}` is not allowed", decl.name),
                location,
            ),
            StatementKind::Class(decl) => fail(
                format!("nested class declaration `{}` is not allowed", decl.name),
                location,
            ),
            StatementKind::Enum(decl) => fail(
                format!("nested enum declaration `{}` is not allowed", decl.name),
                location,
            ),
            StatementKind::Import { .. } => {
                fail(String::from("`import` is only allowed at top level"), location)
            }
        }
    }

    fn compile_declaration(
        &mut self,
        name: &str,
        mutable: bool,
        annotation: Option<&TypeNode>,
        value: &Expression,
        location: &Location,
    ) -> Compile<Vec<Opcode>> {
        if self.symbols.defined(name) {
            return fail(format!("re-declaration of symbol `{}`", name), location);
        }
        let annotated = match annotation {
            Some(node) => Some(self.resolve_type(node)?),
            None => None,
        };
        let (mut code, value_type) =
            self.compile_expression_expecting(value, annotated.as_ref())?;
        if value_type == Type::Void {
            return fail(
                format!("cannot declare `{}` with a void value", name),
                location,
            );
        }
        if let Some(annotated) = &annotated {
            if !annotated.check(&value_type) {
                return fail(
                    format!(
                        "type mismatch in declaration of `{}`: expected {}, got {}",
                        name, annotated, value_type
                    ),
                    location,
                );
            }
        }
        let binding_type = annotated.unwrap_or(value_type);
        self.symbols.define(
            name,
            Binding {
                binding_type,
                mutable,
            },
        );
        code.push(Opcode::StoreName(String::from(name)));
        Ok(code)
    }

    fn compile_assignment(
        &mut self,
        target: &Expression,
        value: &Expression,
        location: &Location,
    ) -> Compile<Vec<Opcode>> {
        match &target.kind {
            ExpressionKind::Symbol(name) => {
                let binding = match self.symbols.get(name) {
                    Some(binding) => binding,
                    None => return fail(format!("undefined symbol `{}`", name), location),
                };
                if !binding.mutable {
                    return fail(
                        format!("cannot assign to immutable symbol `{}`", name),
                        location,
                    );
                }
                let (mut code, value_type) =
                    self.compile_expression_expecting(value, Some(&binding.binding_type))?;
                if !binding.binding_type.check(&value_type) {
                    return fail(
                        format!(
                            "type mismatch in assignment to `{}`: expected {}, got {}",
                            name, binding.binding_type, value_type
                        ),
                        location,
                    );
                }
                code.push(Opcode::StoreName(name.clone()));
                Ok(code)
            }
            ExpressionKind::FieldAccess { object, field } => {
                let (object_code, object_type) = self.compile_expression(object)?;
                let class = match &object_type {
                    Type::Class(class) => class.clone(),
                    other => {
                        return fail(format!("type {} has no field `{}`", other, field), location)
                    }
                };
                let index = match class.field_index(field) {
                    Some(index) => index,
                    None => {
                        return fail(
                            format!("no field `{}` in class `{}`", field, class.name),
                            location,
                        )
                    }
                };
                if !class.fields[index].public {
                    return fail(
                        format!("cannot assign to private field `{}`", field),
                        location,
                    );
                }
                let (value_code, value_type) = self
                    .compile_expression_expecting(value, Some(&class.fields[index].field_type))?;
                if !class.fields[index].field_type.check(&value_type) {
                    return fail(
                        format!(
                            "type mismatch in assignment to field `{}`: expected {}, got {}",
                            field, class.fields[index].field_type, value_type
                        ),
                        location,
                    );
                }
                let mut code = value_code;
                code.extend(object_code);
                code.push(Opcode::StoreField(index));
                Ok(code)
            }
            ExpressionKind::Index { object, index } => {
                let (object_code, object_type) = self.compile_expression(object)?;
                let (index_code, index_type) = self.compile_expression(index)?;
                match &object_type {
                    Type::List(item) => {
                        if index_type != Type::Int {
                            return fail(
                                format!("list index must be an int, got {}", index_type),
                                location,
                            );
                        }
                        let (value_code, value_type) =
                            self.compile_expression_expecting(value, Some(item))?;
                        if !item.check(&value_type) {
                            return fail(
                                format!(
                                    "type mismatch in list assignment: expected {}, got {}",
                                    item, value_type
                                ),
                                location,
                            );
                        }
                        let mut code = value_code;
                        code.extend(object_code);
                        code.extend(index_code);
                        code.push(Opcode::StoreIndex);
                        Ok(code)
                    }
                    Type::Map(key, value_slot) => {
                        if !key.check(&index_type) {
                            return fail(
                                format!("map key must be {}, got {}", key, index_type),
                                location,
                            );
                        }
                        let (value_code, value_type) =
                            self.compile_expression_expecting(value, Some(value_slot))?;
                        if !value_slot.check(&value_type) {
                            return fail(
                                format!(
                                    "type mismatch in map assignment: expected {}, got {}",
                                    value_slot, value_type
                                ),
                                location,
                            );
                        }
                        let mut code = value_code;
                        code.extend(object_code);
                        code.extend(index_code);
                        code.push(Opcode::StoreMapIndex);
                        Ok(code)
                    }
                    other => fail(format!("type {} cannot be index-assigned", other), location),
                }
            }
            _ => fail(String::from("invalid assignment target"), location),
        }
    }

    fn expect_bool_condition(&mut self, condition: &Expression) -> Compile<Vec<Opcode>> {
        let (code, condition_type) = self.compile_expression(condition)?;
        if condition_type != Type::Bool {
            return fail(
                format!("condition must be a bool, got {}", condition_type),
                &condition.location,
            );
        }
        Ok(code)
    }

    // Assembled back to front so every jump lands one past the code it
    // skips without a separate patching pass.
    fn compile_if(
        &mut self,
        clauses: &[(Expression, Vec<Statement>)],
        otherwise: Option<&[Statement]>,
    ) -> Compile<Vec<Opcode>> {
        let mut compiled = Vec::new();
        for (condition, body) in clauses {
            let condition_code = self.expect_bool_condition(condition)?;
            let body_code = self.compile_block(body)?;
            compiled.push((condition_code, body_code));
        }
        let mut tail: Vec<Opcode> = match otherwise {
            Some(body) => self.compile_block(body)?,
            None => Vec::new(),
        };
        for (condition_code, body_code) in compiled.into_iter().rev() {
            let mut block = condition_code;
            let jump_over = body_code.len() + if tail.is_empty() { 1 } else { 2 };
            block.push(Opcode::RelJumpIfFalse(jump_over as isize));
            block.extend(body_code);
            if !tail.is_empty() {
                block.push(Opcode::RelJump(tail.len() as isize + 1));
            }
            block.extend(tail);
            tail = block;
        }
        Ok(tail)
    }

    // Replace the placeholders this loop owns. Inner loops have already
    // consumed theirs by the time an outer loop runs its pass.
    fn patch_loop(code: &mut [Opcode], break_target: usize, continue_target: usize) {
        for index in 0..code.len() {
            match code[index] {
                Opcode::BreakLoop => {
                    code[index] = Opcode::RelJump(break_target as isize - index as isize)
                }
                Opcode::ContinueLoop => {
                    code[index] = Opcode::RelJump(continue_target as isize - index as isize)
                }
                _ => {}
            }
        }
    }

    fn compile_while(
        &mut self,
        condition: &Expression,
        body: &[Statement],
    ) -> Compile<Vec<Opcode>> {
        let condition_code = self.expect_bool_condition(condition)?;
        self.loop_depth += 1;
        let body_result = self.compile_block(body);
        self.loop_depth -= 1;
        let body_code = body_result?;

        let mut code = condition_code;
        code.push(Opcode::RelJumpIfFalse(body_code.len() as isize + 2));
        code.extend(body_code);
        let back = code.len();
        code.push(Opcode::RelJump(-(back as isize)));
        let end = code.len();
        Self::patch_loop(&mut code, end, 0);
        Ok(code)
    }

    fn compile_for(
        &mut self,
        variables: &[String],
        iterable: &Expression,
        body: &[Statement],
        location: &Location,
    ) -> Compile<Vec<Opcode>> {
        let (iterable_code, iterable_type) = self.compile_expression(iterable)?;
        let variable_types: Vec<Type> = match &iterable_type {
            Type::List(item) => vec![(**item).clone()],
            Type::Str => vec![Type::Str],
            Type::Map(key, value) => vec![(**key).clone(), (**value).clone()],
            other => return fail(format!("type {} is not iterable", other), location),
        };
        if variables.len() != variable_types.len() {
            return fail(
                format!(
                    "wrong number of loop variables: {} iteration yields {}, got {}",
                    iterable_type,
                    variable_types.len(),
                    variables.len()
                ),
                location,
            );
        }

        let saved = self.symbols.clone();
        self.symbols = Env::chain(&saved);
        for (variable, variable_type) in variables.iter().zip(&variable_types) {
            if saved.defined(variable) {
                self.symbols = saved;
                return fail(format!("re-declaration of symbol `{}`", variable), location);
            }
            self.symbols.define(
                variable,
                Binding {
                    binding_type: variable_type.clone(),
                    mutable: false,
                },
            );
        }
        self.loop_depth += 1;
        let body_result = self.compile_block(body);
        self.loop_depth -= 1;
        self.symbols = saved;
        let body_code = body_result?;

        let stores = variables.len();
        let mut code = iterable_code;
        code.push(Opcode::GetIter);
        let for_iter = code.len();
        code.push(Opcode::ForIter((stores + body_code.len() + 2) as isize));
        // The iterator pushes the key first, so the stores run reversed.
        for variable in variables.iter().rev() {
            code.push(Opcode::StoreName(variable.clone()));
        }
        code.extend(body_code);
        let back = code.len();
        code.push(Opcode::RelJump(for_iter as isize - back as isize));
        let end = code.len();
        Self::patch_loop(&mut code, end, for_iter);
        Ok(code)
    }

    fn compile_return(
        &mut self,
        value: Option<&Expression>,
        location: &Location,
    ) -> Compile<Vec<Opcode>> {
        let declared = match &self.function_info {
            Some(info) => info.return_type.clone(),
            None => return fail(String::from("`return` outside of a function"), location),
        };
        let code = match (value, declared) {
            (Some(expr), Some(declared)) => {
                let (mut code, value_type) =
                    self.compile_expression_expecting(expr, Some(&declared))?;
                if !declared.check(&value_type) {
                    return fail(
                        format!("wrong return type: expected {}, got {}", declared, value_type),
                        location,
                    );
                }
                code.push(Opcode::Return);
                code
            }
            (Some(_), None) => {
                return fail(
                    String::from("cannot return a value from a void function"),
                    location,
                )
            }
            (None, Some(declared)) => {
                return fail(
                    format!("missing return value: this function returns {}", declared),
                    location,
                )
            }
            (None, None) => vec![Opcode::Return],
        };
        if let Some(info) = self.function_info.as_mut() {
            info.seen_return = true;
        }
        Ok(code)
    }

    fn compile_match(
        &mut self,
        scrutinee: &Expression,
        arms: &[MatchArm],
        default: Option<&[Statement]>,
        location: &Location,
    ) -> Compile<Vec<Opcode>> {
        let (scrutinee_code, scrutinee_type) = self.compile_expression(scrutinee)?;
        let enum_type = match &scrutinee_type {
            Type::Enum(enum_type) => enum_type.clone(),
            other => return fail(format!("cannot match on {}", other), location),
        };

        // Each arm becomes label check, conditional jump, payload
        // bindings, body, jump to end; assembled back to front.
        let mut tail: Vec<Opcode> = match default {
            Some(body) => self.compile_block(body)?,
            None => Vec::new(),
        };
        let mut compiled_arms = Vec::new();
        for arm in arms {
            compiled_arms.push(self.compile_match_arm(arm, &enum_type)?);
        }
        for arm_code in compiled_arms.into_iter().rev() {
            match arm_code {
                ArmCode::Case { label, binds, body } => {
                    let mut block = vec![Opcode::CheckLabel(label)];
                    let inner = binds.len() + body.len() + if tail.is_empty() { 1 } else { 2 };
                    block.push(Opcode::RelJumpIfFalse(inner as isize));
                    block.extend(binds);
                    block.extend(body);
                    if !tail.is_empty() {
                        block.push(Opcode::RelJump(tail.len() as isize + 1));
                    }
                    block.extend(tail);
                    tail = block;
                }
                ArmCode::CatchAll { name, body } => {
                    // Binds the scrutinee itself and always matches, so
                    // whatever follows is unreachable.
                    let mut block = vec![Opcode::StoreName(name)];
                    block.extend(body);
                    tail = block;
                }
            }
        }
        let mut code = scrutinee_code;
        code.extend(tail);
        Ok(code)
    }

    fn compile_match_arm(&mut self, arm: &MatchArm, enum_type: &Node<EnumType>) -> Compile<ArmCode> {
        let location = &arm.pattern.location;
        match &arm.pattern.kind {
            PatternKind::Binding(name) => {
                if let Some(case) = enum_type.case(name) {
                    if !case.payload.is_empty() {
                        return fail(
                            format!(
                                "case `{}` carries a payload; bind it with sub-patterns or `...`",
                                name
                            ),
                            location,
                        );
                    }
                    let body = self.compile_block(&arm.body)?;
                    Ok(ArmCode::Case {
                        label: name.clone(),
                        binds: Vec::new(),
                        body,
                    })
                } else {
                    let saved = self.symbols.clone();
                    self.symbols = Env::chain(&saved);
                    self.symbols.define(
                        name,
                        Binding {
                            binding_type: Type::Enum(enum_type.clone()),
                            mutable: false,
                        },
                    );
                    let body = self.compile_block(&arm.body);
                    self.symbols = saved;
                    Ok(ArmCode::CatchAll {
                        name: name.clone(),
                        body: body?,
                    })
                }
            }
            PatternKind::Compound {
                label,
                fields,
                ellipsis,
            } => {
                let case = match enum_type.case(label) {
                    Some(case) => case.clone(),
                    None => {
                        return fail(
                            format!("no case `{}` in enum `{}`", label, enum_type.name),
                            location,
                        )
                    }
                };
                if fields.len() > case.payload.len()
                    || (!ellipsis && fields.len() != case.payload.len())
                {
                    return fail(
                        format!(
                            "wrong number of sub-patterns for case `{}`: expected {}, got {}",
                            label,
                            case.payload.len(),
                            fields.len()
                        ),
                        location,
                    );
                }
                let saved = self.symbols.clone();
                self.symbols = Env::chain(&saved);
                let mut binds = Vec::new();
                for (index, field) in fields.iter().enumerate() {
                    match &field.kind {
                        PatternKind::Binding(name) => {
                            self.symbols.define(
                                name,
                                Binding {
                                    binding_type: case.payload[index].clone(),
                                    mutable: false,
                                },
                            );
                            binds.push(Opcode::PushEnumIndex(index));
                            binds.push(Opcode::StoreName(name.clone()));
                        }
                        PatternKind::Compound { .. } => {
                            self.symbols = saved;
                            return fail(
                                String::from("nested patterns are not supported"),
                                &field.location,
                            );
                        }
                    }
                }
                let body = self.compile_block(&arm.body);
                self.symbols = saved;
                Ok(ArmCode::Case {
                    label: label.clone(),
                    binds,
                    body: body?,
                })
            }
        }
    }

    /***************************** declarations *****************************/

    fn compile_function_declaration(
        &mut self,
        decl: &FunctionDeclaration,
        location: &Location,
    ) -> Compile<()> {
        if self.symbols.defined(&decl.name) {
            return fail(format!("re-declaration of symbol `{}`", decl.name), location);
        }
        let function_type = self.resolve_signature(decl, &decl.name)?;
        self.symbols.define(
            &decl.name,
            Binding {
                binding_type: Type::Function(function_type.clone()),
                mutable: false,
            },
        );
        self.exports.push((decl.name.clone(), function_type.clone()));
        self.compile_function_body(decl, &function_type, decl.name.clone(), None, location)
    }

    fn resolve_signature(
        &mut self,
        decl: &FunctionDeclaration,
        slot: &str,
    ) -> Compile<Node<FunctionType>> {
        let mut params = Vec::new();
        for param in &decl.params {
            params.push(self.resolve_type(&param.annotation)?);
        }
        let return_type = match &decl.return_annotation {
            Some(node) => Some(self.resolve_type(node)?),
            None => None,
        };
        Ok(Node::new(FunctionType {
            name: String::from(slot),
            public: true,
            generic_params: Vec::new(),
            params,
            return_type,
            builtin: false,
        }))
    }

    fn compile_function_body(
        &mut self,
        decl: &FunctionDeclaration,
        function_type: &Node<FunctionType>,
        slot: String,
        self_type: Option<Type>,
        location: &Location,
    ) -> Compile<()> {
        let saved_symbols = self.symbols.clone();
        self.symbols = Env::chain(&saved_symbols);
        let saved_info = self.function_info.replace(FunctionInfo {
            return_type: function_type.return_type.clone(),
            seen_return: false,
        });
        let saved_depth = self.loop_depth;
        self.loop_depth = 0;

        let mut names = Vec::new();
        if let Some(self_type) = &self_type {
            self.symbols.define(
                "self",
                Binding {
                    binding_type: self_type.clone(),
                    mutable: false,
                },
            );
            names.push(String::from("self"));
        }
        let mut result = Ok(());
        for (param, param_type) in decl.params.iter().zip(&function_type.params) {
            if names.contains(&param.name) {
                result = fail(
                    format!("re-declaration of symbol `{}`", param.name),
                    location,
                );
                break;
            }
            self.symbols.define(
                &param.name,
                Binding {
                    binding_type: param_type.clone(),
                    mutable: false,
                },
            );
            names.push(param.name.clone());
        }

        let mut body = Vec::new();
        if result.is_ok() {
            for statement in &decl.body {
                match self.compile_statement(statement) {
                    Ok(code) => body.extend(code),
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
        }
        let seen_return = self
            .function_info
            .as_ref()
            .map_or(false, |info| info.seen_return);
        self.function_info = saved_info;
        self.loop_depth = saved_depth;
        self.symbols = saved_symbols;
        result?;

        if function_type.return_type.is_some()
            && !seen_return
            && !decl.body.last().map_or(false, terminates)
        {
            return fail(
                format!("missing return in non-void function `{}`", decl.name),
                location,
            );
        }

        // The call convention seeds the callee stack with the arguments
        // in order, so the parameters are stored back in reverse.
        let mut code = Vec::new();
        for name in names.iter().rev() {
            code.push(Opcode::StoreName(name.clone()));
        }
        code.extend(body);
        self.functions.insert(slot, code);
        Ok(())
    }

    fn compile_class_declaration(
        &mut self,
        decl: &ClassDeclaration,
        location: &Location,
    ) -> Compile<()> {
        if self.types.defined(&decl.name) {
            return fail(format!("re-declaration of type `{}`", decl.name), location);
        }
        let saved_types = self.types.clone();
        if !decl.generic_params.is_empty() {
            self.types = Env::chain(&saved_types);
            for label in &decl.generic_params {
                self.types.define(label, Type::Parameter(label.clone()));
            }
        }

        let class = (|| -> Compile<Node<ClassType>> {
            let mut fields = Vec::new();
            for field in &decl.fields {
                if fields.iter().any(|f: &ClassField| f.name == field.name) {
                    return fail(
                        format!("duplicate field `{}` in class `{}`", field.name, decl.name),
                        location,
                    );
                }
                fields.push(ClassField {
                    name: field.name.clone(),
                    public: field.public,
                    field_type: self.resolve_type(&field.annotation)?,
                });
            }
            let mut methods = Vec::new();
            for method in &decl.methods {
                let slot = format!("{}__{}", decl.name, method.name);
                let mut signature = (*self.resolve_signature(method, &slot)?).clone();
                signature.generic_params = decl.generic_params.clone();
                methods.push(Node::new(signature));
            }
            Ok(Node::new(ClassType {
                name: decl.name.clone(),
                generic_params: decl.generic_params.clone(),
                fields,
                methods,
            }))
        })();
        let class = match class {
            Ok(class) => class,
            Err(e) => {
                self.types = saved_types;
                return Err(e);
            }
        };

        // The class registers in the outer type table; the generic
        // scope stays active only while its bodies compile.
        saved_types.define(&decl.name, Type::Class(class.clone()));

        let mut result = Ok(());
        for (method, signature) in decl.methods.iter().zip(&class.methods) {
            let slot = signature.name.clone();
            result = self.compile_function_body(
                method,
                signature,
                slot,
                Some(Type::Class(class.clone())),
                location,
            );
            if result.is_err() {
                break;
            }
        }
        self.types = saved_types;
        result
    }

    fn compile_enum_declaration(
        &mut self,
        decl: &EnumDeclaration,
        location: &Location,
    ) -> Compile<()> {
        if self.types.defined(&decl.name) {
            return fail(format!("re-declaration of type `{}`", decl.name), location);
        }
        let saved_types = self.types.clone();
        if !decl.generic_params.is_empty() {
            self.types = Env::chain(&saved_types);
            for label in &decl.generic_params {
                self.types.define(label, Type::Parameter(label.clone()));
            }
        }
        let cases = (|| -> Compile<Vec<EnumCase>> {
            let mut cases: Vec<EnumCase> = Vec::new();
            for case in &decl.cases {
                if cases.iter().any(|c| c.label == case.label) {
                    return fail(
                        format!("duplicate case `{}` in enum `{}`", case.label, decl.name),
                        location,
                    );
                }
                let mut payload = Vec::new();
                for node in &case.payload {
                    payload.push(self.resolve_type(node)?);
                }
                cases.push(EnumCase {
                    label: case.label.clone(),
                    payload,
                });
            }
            Ok(cases)
        })();
        self.types = saved_types;
        let cases = cases?;
        self.types.define(
            &decl.name,
            Type::Enum(Node::new(EnumType {
                name: decl.name.clone(),
                generic_params: decl.generic_params.clone(),
                cases,
            })),
        );
        Ok(())
    }

    fn compile_import(&mut self, path: &str, alias: &str, location: &Location) -> Compile<()> {
        if self.symbols.defined(alias) {
            return fail(format!("re-declaration of symbol `{}`", alias), location);
        }
        let source = match self.loader.load(path) {
            Ok(source) => source,
            Err(e) => {
                return fail(format!("cannot load module `{}`: {}", path, e), location)
            }
        };
        let statements = match Parser::new(path, &source).parse_program() {
            Ok(statements) => statements,
            Err(e) => return fail(format!("error in module `{}`: {}", path, e), location),
        };
        let mut sub = Compiler::with_loader(self.loader.clone());
        let program = sub.compile_program(&statements)?;

        // The module's functions are inlined into this program under
        // qualified slots; method and already-qualified slots keep the
        // names their call sites were compiled against. References to
        // the renamed slots inside the module's own code move with
        // them.
        let renamed: Vec<String> = program
            .functions
            .keys()
            .filter(|name| *name != "main" && !name.contains("__") && !name.contains("::"))
            .cloned()
            .collect();
        for (name, mut code) in program.functions {
            if name == "main" {
                continue;
            }
            for op in code.iter_mut() {
                if let Opcode::PushConstFunction(target, false) = op {
                    if renamed.contains(target) {
                        *op = Opcode::PushConstFunction(
                            format!("{}::{}", alias, target),
                            false,
                        );
                    }
                }
            }
            let slot = if renamed.contains(&name) {
                format!("{}::{}", alias, name)
            } else {
                name
            };
            self.functions.insert(slot, code);
        }
        let mut types = HashMap::new();
        for (name, function_type) in &sub.exports {
            let mut qualified = (**function_type).clone();
            qualified.name = format!("{}::{}", alias, function_type.name);
            types.insert(name.clone(), Type::Function(Node::new(qualified)));
        }
        self.symbols.define(
            alias,
            Binding {
                binding_type: Type::Module(Node::new(ModuleType {
                    name: String::from(alias),
                    types,
                })),
                mutable: false,
            },
        );
        self.imports.push(Import {
            path: String::from(path),
            alias: String::from(alias),
        });
        Ok(())
    }

    /***************************** types *****************************/

    fn resolve_type(&mut self, node: &TypeNode) -> Compile<Type> {
        match &node.kind {
            TypeNodeKind::Named { name, args } => {
                let base = match self.types.get(name) {
                    Some(base) => base,
                    None => return fail(format!("undefined type `{}`", name), &node.location),
                };
                let generic_params = match &base {
                    Type::Class(class) => class.generic_params.clone(),
                    Type::Enum(enum_type) => enum_type.generic_params.clone(),
                    _ => Vec::new(),
                };
                if generic_params.len() != args.len() {
                    return fail(
                        format!(
                            "wrong number of type arguments to `{}`: expected {}, got {}",
                            name,
                            generic_params.len(),
                            args.len()
                        ),
                        &node.location,
                    );
                }
                if args.is_empty() {
                    return Ok(base);
                }
                let mut bindings = GenericBindings::new();
                for (label, arg) in generic_params.iter().zip(args) {
                    bindings.insert(label.clone(), self.resolve_type(arg)?);
                }
                Ok(base.substitute(&bindings))
            }
            TypeNodeKind::List(item) => Ok(Type::List(Node::new(self.resolve_type(item)?))),
            TypeNodeKind::Map(key, value) => Ok(Type::Map(
                Node::new(self.resolve_type(key)?),
                Node::new(self.resolve_type(value)?),
            )),
            TypeNodeKind::Tuple(items) => {
                let mut types = Vec::new();
                for item in items {
                    types.push(self.resolve_type(item)?);
                }
                Ok(Type::Tuple(types))
            }
        }
    }

    /***************************** expressions *****************************/

    pub fn compile_expression(&mut self, expr: &Expression) -> Compile<(Vec<Opcode>, Type)> {
        self.compile_expression_expecting(expr, None)
    }

    // The expected type is a hint for literals that cannot infer their
    // own type, like `[]`; it never weakens checking.
    fn compile_expression_expecting(
        &mut self,
        expr: &Expression,
        expected: Option<&Type>,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let location = &expr.location;
        match &expr.kind {
            ExpressionKind::Boolean(b) => Ok((vec![Opcode::PushConstBool(*b)], Type::Bool)),
            ExpressionKind::Integer(i) => Ok((vec![Opcode::PushConstInt(*i)], Type::Int)),
            ExpressionKind::Real(r) => Ok((vec![Opcode::PushConstReal(*r)], Type::Real)),
            ExpressionKind::Character(c) => Ok((vec![Opcode::PushConstChar(*c)], Type::Char)),
            ExpressionKind::Str(s) => Ok((vec![Opcode::PushConstStr(s.clone())], Type::Str)),
            ExpressionKind::Symbol(name) => self.compile_symbol(name, location),
            ExpressionKind::Qualified(space, member) => {
                self.compile_qualified(space, member, &[], false, location)
            }
            ExpressionKind::ListLiteral(items) => {
                self.compile_list_literal(items, expected, location)
            }
            ExpressionKind::MapLiteral(entries) => {
                self.compile_map_literal(entries, expected, location)
            }
            ExpressionKind::TupleLiteral(items) => self.compile_tuple_literal(items, expected),
            ExpressionKind::Constructor { class, fields } => {
                self.compile_named_constructor(class, fields, location)
            }
            ExpressionKind::FieldAccess { object, field } => {
                self.compile_field_access(object, field, location)
            }
            ExpressionKind::TupleIndex { object, index } => {
                self.compile_tuple_index(object, *index, location)
            }
            ExpressionKind::Index { object, index } => self.compile_index(object, index, location),
            ExpressionKind::Call { callee, args } => self.compile_call(callee, args, location),
            ExpressionKind::Unary { op, operand } => self.compile_unary(*op, operand, location),
            ExpressionKind::Binary { op, left, right } => {
                self.compile_binary(*op, left, right, location)
            }
            ExpressionKind::Ternary {
                condition,
                then,
                otherwise,
            } => self.compile_ternary(condition, then, otherwise, location),
        }
    }

    fn compile_symbol(&mut self, name: &str, location: &Location) -> Compile<(Vec<Opcode>, Type)> {
        let binding = match self.symbols.get(name) {
            Some(binding) => binding,
            None => return fail(format!("undefined symbol `{}`", name), location),
        };
        // A direct reference to a declared or builtin function is a
        // constant; anything else lives in the environment.
        let code = match &binding.binding_type {
            Type::Module(module) => {
                return fail(format!("module `{}` is not a value", module.name), location)
            }
            Type::Function(f) if f.name == name => {
                vec![Opcode::PushConstFunction(f.name.clone(), f.builtin)]
            }
            _ => vec![Opcode::PushName(String::from(name))],
        };
        Ok((code, binding.binding_type))
    }

    fn compile_qualified(
        &mut self,
        space: &str,
        member: &str,
        args: &[Expression],
        is_call: bool,
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        if let Some(Type::Enum(enum_type)) = self.types.get(space) {
            return self.compile_enum_case(&enum_type, member, args, is_call, location);
        }
        if let Some(binding) = self.symbols.get(space) {
            if let Type::Module(module) = &binding.binding_type {
                let function_type = match module.types.get(member) {
                    Some(Type::Function(f)) => f.clone(),
                    _ => {
                        return fail(
                            format!("no symbol `{}` in module `{}`", member, space),
                            location,
                        )
                    }
                };
                if !is_call {
                    return Ok((
                        vec![Opcode::PushConstFunction(function_type.name.clone(), false)],
                        Type::Function(function_type),
                    ));
                }
                let mut bindings = GenericBindings::new();
                let mut code = self.check_args(
                    &format!("`{}::{}`", space, member),
                    &function_type.params,
                    &function_type.generic_params,
                    args,
                    &mut bindings,
                    location,
                )?;
                code.push(Opcode::PushConstFunction(function_type.name.clone(), false));
                code.push(Opcode::CallFunction(args.len()));
                let return_type = Self::returned(&function_type, &bindings);
                return Ok((code, return_type));
            }
        }
        fail(format!("undefined symbol `{}`", space), location)
    }

    fn compile_enum_case(
        &mut self,
        enum_type: &Node<EnumType>,
        label: &str,
        args: &[Expression],
        is_call: bool,
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let case = match enum_type.case(label) {
            Some(case) => case.clone(),
            None => {
                return fail(
                    format!("no case `{}` in enum `{}`", label, enum_type.name),
                    location,
                )
            }
        };
        if !is_call && !case.payload.is_empty() {
            return fail(format!("enum case `{}` requires a payload", label), location);
        }
        let mut bindings = GenericBindings::new();
        let mut code = self.check_args(
            &format!("`{}::{}`", enum_type.name, label),
            &case.payload,
            &enum_type.generic_params,
            args,
            &mut bindings,
            location,
        )?;
        code.push(Opcode::PushEnum(String::from(label), args.len()));
        Self::default_unbound(&enum_type.generic_params, &mut bindings);
        Ok((code, Type::Enum(enum_type.clone()).substitute(&bindings)))
    }

    fn compile_list_literal(
        &mut self,
        items: &[Expression],
        expected: Option<&Type>,
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let item_hint = match expected {
            Some(Type::List(item)) => Some((**item).clone()),
            _ => None,
        };
        if items.is_empty() {
            return match item_hint {
                Some(item) => Ok((vec![Opcode::BuildList(0)], Type::List(Node::new(item)))),
                None => fail(
                    String::from("cannot infer the type of an empty list literal"),
                    location,
                ),
            };
        }
        let mut chunks = Vec::new();
        let mut item_type: Option<Type> = item_hint;
        for item in items {
            let (code, found) = self.compile_expression_expecting(item, item_type.as_ref())?;
            match &item_type {
                Some(item_type) => {
                    if !item_type.check(&found) {
                        return fail(
                            format!(
                                "list elements must share a type: expected {}, got {}",
                                item_type, found
                            ),
                            &item.location,
                        );
                    }
                }
                None => item_type = Some(found),
            }
            chunks.push(code);
        }
        let mut code = Vec::new();
        for chunk in chunks.into_iter().rev() {
            code.extend(chunk);
        }
        code.push(Opcode::BuildList(items.len()));
        Ok((code, Type::List(Node::new(item_type.unwrap()))))
    }

    fn compile_map_literal(
        &mut self,
        entries: &[(Expression, Expression)],
        expected: Option<&Type>,
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let (key_hint, value_hint) = match expected {
            Some(Type::Map(key, value)) => (Some((**key).clone()), Some((**value).clone())),
            _ => (None, None),
        };
        if entries.is_empty() {
            return match (key_hint, value_hint) {
                (Some(key), Some(value)) => Ok((
                    vec![Opcode::BuildMap(0)],
                    Type::Map(Node::new(key), Node::new(value)),
                )),
                _ => fail(
                    String::from("cannot infer the type of an empty map literal"),
                    location,
                ),
            };
        }
        let mut chunks = Vec::new();
        let mut key_type = key_hint;
        let mut value_type = value_hint;
        for (key, value) in entries {
            let (key_code, found_key) = self.compile_expression_expecting(key, key_type.as_ref())?;
            match &key_type {
                Some(key_type) => {
                    if !key_type.check(&found_key) {
                        return fail(
                            format!(
                                "map keys must share a type: expected {}, got {}",
                                key_type, found_key
                            ),
                            &key.location,
                        );
                    }
                }
                None => key_type = Some(found_key),
            }
            let (value_code, found_value) =
                self.compile_expression_expecting(value, value_type.as_ref())?;
            match &value_type {
                Some(value_type) => {
                    if !value_type.check(&found_value) {
                        return fail(
                            format!(
                                "map values must share a type: expected {}, got {}",
                                value_type, found_value
                            ),
                            &value.location,
                        );
                    }
                }
                None => value_type = Some(found_value),
            }
            chunks.push((key_code, value_code));
        }
        // BUILD_MAP pops each key before its value, so each entry emits
        // the value first and entries run right to left.
        let mut code = Vec::new();
        for (key_code, value_code) in chunks.into_iter().rev() {
            code.extend(value_code);
            code.extend(key_code);
        }
        code.push(Opcode::BuildMap(entries.len()));
        Ok((
            code,
            Type::Map(Node::new(key_type.unwrap()), Node::new(value_type.unwrap())),
        ))
    }

    fn compile_tuple_literal(
        &mut self,
        items: &[Expression],
        expected: Option<&Type>,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let hints: Vec<Option<&Type>> = match expected {
            Some(Type::Tuple(hint_items)) if hint_items.len() == items.len() => {
                hint_items.iter().map(Some).collect()
            }
            _ => items.iter().map(|_| None).collect(),
        };
        let mut chunks = Vec::new();
        let mut types = Vec::new();
        for (item, hint) in items.iter().zip(hints) {
            let (code, item_type) = self.compile_expression_expecting(item, hint)?;
            chunks.push(code);
            types.push(item_type);
        }
        let mut code = Vec::new();
        for chunk in chunks.into_iter().rev() {
            code.extend(chunk);
        }
        code.push(Opcode::BuildTuple(items.len()));
        Ok((code, Type::Tuple(types)))
    }

    fn compile_named_constructor(
        &mut self,
        class_name: &str,
        fields: &[(String, Expression)],
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let class = match self.types.get(class_name) {
            Some(Type::Class(class)) => class,
            Some(_) => return fail(format!("`{}` is not a class", class_name), location),
            None => return fail(format!("undefined type `{}`", class_name), location),
        };
        for (name, _) in fields {
            if class.field_index(name).is_none() {
                return fail(
                    format!("no field `{}` in class `{}`", name, class.name),
                    location,
                );
            }
            if fields.iter().filter(|(other, _)| other == name).count() > 1 {
                return fail(format!("duplicate field `{}`", name), location);
            }
        }
        let mut bindings = GenericBindings::new();
        let mut chunks = Vec::new();
        for field in &class.fields {
            let value = match fields.iter().find(|(name, _)| *name == field.name) {
                Some((_, value)) => value,
                None => {
                    return fail(
                        format!(
                            "missing field `{}` in constructor of `{}`",
                            field.name, class.name
                        ),
                        location,
                    )
                }
            };
            let hint = if class.generic_params.is_empty() {
                Some(field.field_type.clone())
            } else {
                None
            };
            let (code, value_type) = self.compile_expression_expecting(value, hint.as_ref())?;
            if field.field_type.match_generics(&value_type, &mut bindings).is_err() {
                return fail(
                    format!("conflicting generic parameter binding for field `{}`", field.name),
                    &value.location,
                );
            }
            if !field.field_type.substitute(&bindings).check(&value_type) {
                return fail(
                    format!(
                        "wrong type for field `{}`: expected {}, got {}",
                        field.name,
                        field.field_type.substitute(&bindings),
                        value_type
                    ),
                    &value.location,
                );
            }
            chunks.push(code);
        }
        // Field values pop out in declaration order.
        let mut code = Vec::new();
        for chunk in chunks.into_iter().rev() {
            code.extend(chunk);
        }
        code.push(Opcode::BuildClass(class.name.clone(), class.fields.len()));
        Self::default_unbound(&class.generic_params, &mut bindings);
        Ok((code, Type::Class(class).substitute(&bindings)))
    }

    fn compile_field_access(
        &mut self,
        object: &Expression,
        field: &str,
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let (mut code, object_type) = self.compile_expression(object)?;
        match &object_type {
            Type::Class(class) => {
                if let Some(index) = class.field_index(field) {
                    if !class.fields[index].public {
                        return fail(
                            format!("cannot access private field `{}`", field),
                            location,
                        );
                    }
                    let field_type = class.fields[index].field_type.clone();
                    code.push(Opcode::PushField(index));
                    return Ok((code, field_type));
                }
                if class.method(field).is_some() {
                    return fail(
                        format!("method `{}` must be called", field),
                        location,
                    );
                }
                fail(
                    format!("no field `{}` in class `{}`", field, class.name),
                    location,
                )
            }
            Type::List(_) | Type::Map(_, _) | Type::Str => {
                match builtins::method(&object_type, field) {
                    // The receiver stays on the stack; the call site
                    // supplies the rest.
                    Some(_) => fail(format!("method `{}` must be called", field), location),
                    None => fail(
                        format!("no method `{}` on type {}", field, object_type),
                        location,
                    ),
                }
            }
            other => fail(format!("type {} has no field `{}`", other, field), location),
        }
    }

    fn compile_tuple_index(
        &mut self,
        object: &Expression,
        index: usize,
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let (mut code, object_type) = self.compile_expression(object)?;
        match &object_type {
            Type::Tuple(items) => {
                if index >= items.len() {
                    return fail(
                        format!(
                            "tuple field {} out of bounds for {}",
                            index, object_type
                        ),
                        location,
                    );
                }
                code.push(Opcode::PushTupleField(index));
                Ok((code, items[index].clone()))
            }
            other => fail(format!("type {} is not a tuple", other), location),
        }
    }

    fn compile_index(
        &mut self,
        object: &Expression,
        index: &Expression,
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let (object_code, object_type) = self.compile_expression(object)?;
        let (index_code, index_type) = self.compile_expression(index)?;
        let (op, result) = match &object_type {
            Type::List(item) => {
                if index_type != Type::Int {
                    return fail(
                        format!("list index must be an int, got {}", index_type),
                        location,
                    );
                }
                (Opcode::ListIndex, (**item).clone())
            }
            Type::Str => {
                if index_type != Type::Int {
                    return fail(
                        format!("string index must be an int, got {}", index_type),
                        location,
                    );
                }
                (Opcode::StringIndex, Type::Str)
            }
            Type::Map(key, value) => {
                if !key.check(&index_type) {
                    return fail(
                        format!("map key must be {}, got {}", key, index_type),
                        location,
                    );
                }
                (Opcode::MapIndex, optional_of((**value).clone()))
            }
            other => return fail(format!("type {} cannot be indexed", other), location),
        };
        let mut code = object_code;
        code.extend(index_code);
        code.push(op);
        Ok((code, result))
    }

    fn compile_call(
        &mut self,
        callee: &Expression,
        args: &[Expression],
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        match &callee.kind {
            ExpressionKind::Qualified(space, member) => {
                self.compile_qualified(space, member, args, true, location)
            }
            ExpressionKind::FieldAccess { object, field } => {
                self.compile_method_call(object, field, args, location)
            }
            ExpressionKind::Symbol(name)
                if matches!(self.types.get(name), Some(Type::Class(_))) =>
            {
                self.compile_positional_constructor(name, args, location)
            }
            _ => {
                let (callee_code, callee_type) = self.compile_expression(callee)?;
                let function_type = match &callee_type {
                    Type::Function(f) => f.clone(),
                    other => return fail(format!("type {} is not callable", other), location),
                };
                let mut bindings = GenericBindings::new();
                let mut code = self.check_args(
                    &format!("`{}`", function_type.name),
                    &function_type.params,
                    &function_type.generic_params,
                    args,
                    &mut bindings,
                    location,
                )?;
                code.extend(callee_code);
                code.push(if function_type.builtin {
                    Opcode::CallBuiltin(args.len())
                } else {
                    Opcode::CallFunction(args.len())
                });
                Ok((code, Self::returned(&function_type, &bindings)))
            }
        }
    }

    fn compile_method_call(
        &mut self,
        object: &Expression,
        method: &str,
        args: &[Expression],
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let (object_code, object_type) = self.compile_expression(object)?;
        match &object_type {
            Type::Class(class) => {
                let signature = match class.method(method) {
                    Some(signature) => signature,
                    None => {
                        return fail(
                            format!("no method `{}` on class `{}`", method, class.name),
                            location,
                        )
                    }
                };
                // Bind the class's generic parameters from the receiver
                // before the declared arguments are checked.
                let mut bindings = GenericBindings::new();
                if !class.generic_params.is_empty() {
                    if let Some(Type::Class(generic)) = self.types.get(&class.name) {
                        let _ = Type::Class(generic)
                            .match_generics(&object_type, &mut bindings);
                    }
                }
                let mut code = self.check_args(
                    &format!("`{}`", signature.name),
                    &signature.params,
                    &signature.generic_params,
                    args,
                    &mut bindings,
                    location,
                )?;
                code.extend(object_code);
                code.push(Opcode::LookupMethod(String::from(method)));
                code.push(Opcode::CallFunction(args.len() + 1));
                Ok((code, Self::returned(&signature, &bindings)))
            }
            Type::List(_) | Type::Map(_, _) | Type::Str => {
                let signature = match builtins::method(&object_type, method) {
                    Some(signature) => signature,
                    None => {
                        return fail(
                            format!("no method `{}` on type {}", method, object_type),
                            location,
                        )
                    }
                };
                // The receiver is the builtin's first parameter.
                let mut bindings = GenericBindings::new();
                if signature.params[0]
                    .match_generics(&object_type, &mut bindings)
                    .is_err()
                {
                    return fail(
                        format!("conflicting generic parameter binding in `{}`", signature.name),
                        location,
                    );
                }
                let mut code = self.check_args(
                    &format!("`{}`", signature.name),
                    &signature.params[1..],
                    &signature.generic_params,
                    args,
                    &mut bindings,
                    location,
                )?;
                code.extend(object_code);
                code.push(Opcode::PushConstFunction(signature.name.clone(), true));
                code.push(Opcode::CallBuiltin(args.len() + 1));
                Ok((code, Self::returned(&signature, &bindings)))
            }
            other => fail(format!("type {} has no method `{}`", other, method), location),
        }
    }

    fn compile_positional_constructor(
        &mut self,
        class_name: &str,
        args: &[Expression],
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let class = match self.types.get(class_name) {
            Some(Type::Class(class)) => class,
            _ => return fail(format!("undefined type `{}`", class_name), location),
        };
        let params: Vec<Type> = class.fields.iter().map(|f| f.field_type.clone()).collect();
        let mut bindings = GenericBindings::new();
        let mut code = self.check_args(
            &format!("`{}`", class.name),
            &params,
            &class.generic_params,
            args,
            &mut bindings,
            location,
        )?;
        code.push(Opcode::BuildClass(class.name.clone(), args.len()));
        Self::default_unbound(&class.generic_params, &mut bindings);
        Ok((code, Type::Class(class).substitute(&bindings)))
    }

    // Check arguments against parameter types left to right, populating
    // the generic bindings, and emit their code right to left.
    fn check_args(
        &mut self,
        what: &str,
        params: &[Type],
        generic_params: &[String],
        args: &[Expression],
        bindings: &mut GenericBindings,
        location: &Location,
    ) -> Compile<Vec<Opcode>> {
        if params.len() != args.len() {
            return fail(
                format!(
                    "wrong number of arguments to {}: expected {}, got {}",
                    what,
                    params.len(),
                    args.len()
                ),
                location,
            );
        }
        let mut chunks = Vec::new();
        for (param, arg) in params.iter().zip(args) {
            let hint = if generic_params.is_empty() {
                Some(param.clone())
            } else {
                None
            };
            let (code, arg_type) = self.compile_expression_expecting(arg, hint.as_ref())?;
            if let Err(label) = param.match_generics(&arg_type, bindings) {
                return fail(
                    format!("conflicting generic parameter binding for `{}`", label),
                    &arg.location,
                );
            }
            let expected = param.substitute(bindings);
            if !expected.check(&arg_type) {
                return fail(
                    format!(
                        "wrong function parameter type: expected {}, got {}",
                        expected, arg_type
                    ),
                    &arg.location,
                );
            }
            chunks.push(code);
        }
        let mut code = Vec::new();
        for chunk in chunks.into_iter().rev() {
            code.extend(chunk);
        }
        Ok(code)
    }

    fn default_unbound(generic_params: &[String], bindings: &mut GenericBindings) {
        for label in generic_params {
            bindings.entry(label.clone()).or_insert(Type::Any);
        }
    }

    fn returned(function_type: &FunctionType, bindings: &GenericBindings) -> Type {
        let mut bindings = bindings.clone();
        Self::default_unbound(&function_type.generic_params, &mut bindings);
        match &function_type.return_type {
            Some(return_type) => return_type.substitute(&bindings),
            None => Type::Void,
        }
    }

    fn compile_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expression,
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let (mut code, operand_type) = self.compile_expression(operand)?;
        match op {
            UnaryOp::Minus => {
                if operand_type != Type::Int && operand_type != Type::Real {
                    return fail(
                        format!("operand of `-` must be int or real, got {}", operand_type),
                        location,
                    );
                }
                code.push(Opcode::Minus);
                Ok((code, operand_type))
            }
            UnaryOp::Not => {
                if operand_type != Type::Bool {
                    return fail(
                        format!("operand of `not` must be a bool, got {}", operand_type),
                        location,
                    );
                }
                code.push(Opcode::Not);
                Ok((code, Type::Bool))
            }
        }
    }

    fn compile_binary(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        // Short-circuit forms leave the deciding value on the stack and
        // jump over the right operand.
        if op == BinaryOp::And || op == BinaryOp::Or {
            let (mut code, left_type) = self.compile_expression(left)?;
            let (right_code, right_type) = self.compile_expression(right)?;
            if left_type != Type::Bool || right_type != Type::Bool {
                return fail(
                    format!(
                        "operands of `{}` must be bools, got {} and {}",
                        op.symbol(),
                        left_type,
                        right_type
                    ),
                    location,
                );
            }
            let over = right_code.len() as isize + 1;
            code.push(if op == BinaryOp::And {
                Opcode::RelJumpIfFalseOrPop(over)
            } else {
                Opcode::RelJumpIfTrueOrPop(over)
            });
            code.extend(right_code);
            return Ok((code, Type::Bool));
        }

        let (left_code, left_type) = self.compile_expression(left)?;
        let (right_code, right_type) = self.compile_expression(right)?;
        let mut code = left_code;
        code.extend(right_code);

        fn mismatch(
            op: &str,
            left: &Type,
            right: &Type,
            location: &Location,
        ) -> Compile<(Vec<Opcode>, Type)> {
            fail(
                format!("wrong operand types for `{}`: got {} and {}", op, left, right),
                location,
            )
        }

        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                let opcode = match (&left_type, &right_type, op) {
                    (Type::Int, Type::Int, BinaryOp::Add) => Opcode::Add,
                    (Type::Int, Type::Int, BinaryOp::Sub) => Opcode::Sub,
                    (Type::Int, Type::Int, BinaryOp::Mul) => Opcode::Mul,
                    (Type::Int, Type::Int, BinaryOp::Div) => Opcode::Div,
                    (Type::Real, Type::Real, BinaryOp::Add) => Opcode::RealAdd,
                    (Type::Real, Type::Real, BinaryOp::Sub) => Opcode::RealSub,
                    (Type::Real, Type::Real, BinaryOp::Mul) => Opcode::RealMul,
                    (Type::Real, Type::Real, BinaryOp::Div) => Opcode::RealDiv,
                    _ => return mismatch(op.symbol(), &left_type, &right_type, location),
                };
                code.push(opcode);
                Ok((code, left_type))
            }
            BinaryOp::Mod => {
                if left_type != Type::Int || right_type != Type::Int {
                    return mismatch("%", &left_type, &right_type, location);
                }
                code.push(Opcode::Modulo);
                Ok((code, Type::Int))
            }
            BinaryOp::Concat => match (&left_type, &right_type) {
                (Type::Str, Type::Str) => {
                    code.push(Opcode::Concat);
                    Ok((code, Type::Str))
                }
                (Type::List(a), Type::List(b)) if a.check(b) => {
                    code.push(Opcode::Concat);
                    Ok((code, left_type))
                }
                _ => mismatch("++", &left_type, &right_type, location),
            },
            BinaryOp::Eq | BinaryOp::NotEq => {
                if !left_type.check(&right_type) {
                    return mismatch(op.symbol(), &left_type, &right_type, location);
                }
                code.push(if op == BinaryOp::Eq {
                    Opcode::Eq
                } else {
                    Opcode::NotEq
                });
                Ok((code, Type::Bool))
            }
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                let numeric = (left_type == Type::Int && right_type == Type::Int)
                    || (left_type == Type::Real && right_type == Type::Real);
                if !numeric {
                    return mismatch(op.symbol(), &left_type, &right_type, location);
                }
                code.push(match op {
                    BinaryOp::Lt => Opcode::Lt,
                    BinaryOp::LtEq => Opcode::LtEq,
                    BinaryOp::Gt => Opcode::Gt,
                    _ => Opcode::GtEq,
                });
                Ok((code, Type::Bool))
            }
            BinaryOp::In => {
                let admitted = match &right_type {
                    Type::Str => left_type == Type::Str,
                    Type::List(item) => item.check(&left_type),
                    Type::Map(key, _) => key.check(&left_type),
                    _ => false,
                };
                if !admitted {
                    return mismatch("in", &left_type, &right_type, location);
                }
                code.push(Opcode::In);
                Ok((code, Type::Bool))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit handled above"),
        }
    }

    fn compile_ternary(
        &mut self,
        condition: &Expression,
        then: &Expression,
        otherwise: &Expression,
        location: &Location,
    ) -> Compile<(Vec<Opcode>, Type)> {
        let condition_code = self.expect_bool_condition(condition)?;
        let (then_code, then_type) = self.compile_expression(then)?;
        let (otherwise_code, otherwise_type) = self.compile_expression(otherwise)?;
        if !then_type.check(&otherwise_type) {
            return fail(
                format!(
                    "ternary branches must have the same type: got {} and {}",
                    then_type, otherwise_type
                ),
                location,
            );
        }
        let mut code = condition_code;
        code.push(Opcode::RelJumpIfFalse(then_code.len() as isize + 2));
        code.extend(then_code);
        code.push(Opcode::RelJump(otherwise_code.len() as isize + 1));
        code.extend(otherwise_code);
        Ok((code, then_type))
    }
}


enum ArmCode {
    Case {
        label: String,
        binds: Vec<Opcode>,
        body: Vec<Opcode>,
    },
    CatchAll {
        name: String,
        body: Vec<Opcode>,
    },
}


// Whether a statement returns on every branch. Syntactic: an `if` needs
// an `else`, a `match` needs a `default`.
fn terminates(statement: &Statement) -> bool {
    fn block_terminates(body: &[Statement]) -> bool {
        body.last().map_or(false, terminates)
    }
    match &statement.kind {
        StatementKind::Return(_) => true,
        StatementKind::If {
            clauses,
            otherwise: Some(otherwise),
        } => {
            clauses.iter().all(|(_, body)| block_terminates(body))
                && block_terminates(otherwise)
        }
        StatementKind::Match {
            arms,
            default: Some(default),
            ..
        } => {
            arms.iter().all(|arm| block_terminates(&arm.body)) && block_terminates(default)
        }
        _ => false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use Opcode::*;

    pub fn compile_source(source: &str) -> Compile<Program> {
        let statements = Parser::new("<test>", source)
            .parse_program()
            .unwrap_or_else(|e| panic!("parse error: {}", e));
        Compiler::new().compile_program(&statements)
    }

    fn main_code(source: &str) -> Vec<Opcode> {
        let program = compile_source(source).unwrap_or_else(|e| panic!("{}", e));
        program.functions["main"].clone()
    }

    fn compile_error(source: &str) -> String {
        compile_source(source).unwrap_err().message
    }

    #[test]
    fn test_literal_emission() {
        assert_eq!(main_code("42\n"), vec![PushConstInt(42)]);
        assert_eq!(main_code("1 + 2\n"), vec![PushConstInt(1), PushConstInt(2), Add]);
        assert_eq!(
            main_code("1.5 * 2.0\n"),
            vec![PushConstReal(1.5), PushConstReal(2.0), RealMul]
        );
        assert_eq!(main_code("7 % 3\n"), vec![PushConstInt(7), PushConstInt(3), Modulo]);
    }

    #[test]
    fn test_list_literal_is_emitted_right_to_left() {
        assert_eq!(
            main_code("[1, 2, 3]\n"),
            vec![
                PushConstInt(3),
                PushConstInt(2),
                PushConstInt(1),
                BuildList(3)
            ]
        );
    }

    #[test]
    fn test_short_circuit_emission() {
        assert_eq!(
            main_code("true and false\n"),
            vec![
                PushConstBool(true),
                RelJumpIfFalseOrPop(2),
                PushConstBool(false)
            ]
        );
        assert_eq!(
            main_code("true or false\n"),
            vec![
                PushConstBool(true),
                RelJumpIfTrueOrPop(2),
                PushConstBool(false)
            ]
        );
    }

    #[test]
    fn test_while_loop_shape() {
        let code = main_code("var i = 0\nwhile i < 3 { i += 1 }\n");
        assert_eq!(
            code,
            vec![
                PushConstInt(0),
                StoreName(String::from("i")),
                PushName(String::from("i")),
                PushConstInt(3),
                Lt,
                RelJumpIfFalse(6),
                PushName(String::from("i")),
                PushConstInt(1),
                Add,
                StoreName(String::from("i")),
                RelJump(-8),
            ]
        );
    }

    #[test]
    fn test_break_and_continue_are_patched() {
        let code = main_code("while true { break }\n");
        assert_eq!(
            code,
            vec![PushConstBool(true), RelJumpIfFalse(3), RelJump(2), RelJump(-3)]
        );
        let code = main_code("while true { continue }\n");
        assert_eq!(
            code,
            vec![PushConstBool(true), RelJumpIfFalse(3), RelJump(-2), RelJump(-3)]
        );
        assert!(!code.contains(&BreakLoop));
        assert!(!code.contains(&ContinueLoop));
    }

    #[test]
    fn test_function_parameters_store_in_reverse() {
        let program =
            compile_source("func add(x: int, y: int) -> int { return x + y }\n").unwrap();
        let code = &program.functions["add"];
        assert_eq!(code[0], StoreName(String::from("y")));
        assert_eq!(code[1], StoreName(String::from("x")));
        assert_eq!(code.last(), Some(&Return));
    }

    #[test]
    fn test_redeclaration_is_rejected() {
        assert!(compile_error("let x = 10\nlet x = 11\n").contains("re-declaration of symbol"));
        // Shadowing in a nested scope is also rejected.
        assert!(compile_error("let x = 1\nif true { let x = 2 }\n")
            .contains("re-declaration of symbol"));
    }

    #[test]
    fn test_wrong_parameter_type() {
        let message = compile_error(
            "func f(x: int) -> int { return x + 1 }\nf(\"not an integer\")\n",
        );
        assert!(message.contains("wrong function parameter type"), "{}", message);
    }

    #[test]
    fn test_arity_mismatch() {
        let message = compile_error("func f(x: int) -> int { return x }\nf(1, 2)\n");
        assert!(message.contains("wrong number of arguments"), "{}", message);
    }

    #[test]
    fn test_assignment_rules() {
        assert!(compile_error("let x = 1\nx = 2\n").contains("immutable"));
        assert!(compile_error("var x = 1\nx = \"s\"\n").contains("type mismatch"));
        assert!(compile_error("y = 1\n").contains("undefined symbol"));
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(compile_error("break\n").contains("`break` outside of a loop"));
        assert!(compile_error("continue\n").contains("`continue` outside of a loop"));
    }

    #[test]
    fn test_missing_return() {
        let message = compile_error("func f(x: int) -> int { let y = x }\n");
        assert!(message.contains("missing return"), "{}", message);
        // A return inside both branches of an if/else suffices.
        assert!(compile_source(
            "func f(x: int) -> int { if x > 0 { return 1 } else { return 0 } }\n"
        )
        .is_ok());
    }

    #[test]
    fn test_empty_list_needs_annotation() {
        assert!(compile_error("let l = []\n").contains("empty list"));
        assert!(compile_source("let l: [int] = []\n").is_ok());
        assert!(compile_source("let m: {string, int} = {}\n").is_ok());
    }

    #[test]
    fn test_list_elements_must_agree() {
        assert!(compile_error("let l = [1, \"two\"]\n").contains("share a type"));
    }

    #[test]
    fn test_condition_must_be_bool() {
        assert!(compile_error("if 1 { }\n").contains("condition must be a bool"));
        assert!(compile_error("while 1 { }\n").contains("condition must be a bool"));
    }

    #[test]
    fn test_private_field_access() {
        let source = "\
class Secret {
  private value: int
}
let s = new Secret(value: 1)
print(s.value)
";
        assert!(compile_error(source).contains("private field"));
    }

    #[test]
    fn test_match_on_non_enum() {
        assert!(compile_error("match 1 { case Some(x) { } }\n").contains("cannot match"));
    }

    #[test]
    fn test_match_unknown_case() {
        let message = compile_error(
            "match Optional::Some(1) { case Missing(x) { } }\n",
        );
        assert!(message.contains("no case `Missing`"), "{}", message);
    }

    #[test]
    fn test_match_shape() {
        let code = main_code(
            "var a = 0\nmatch Optional::Some(42) { case Some(x) { a = x } case None { a = -1 } }\n",
        );
        assert_eq!(
            code,
            vec![
                PushConstInt(0),
                StoreName(String::from("a")),
                PushConstInt(42),
                PushEnum(String::from("Some"), 1),
                CheckLabel(String::from("Some")),
                RelJumpIfFalse(6),
                PushEnumIndex(0),
                StoreName(String::from("x")),
                PushName(String::from("x")),
                StoreName(String::from("a")),
                RelJump(6),
                CheckLabel(String::from("None")),
                RelJumpIfFalse(4),
                PushConstInt(1),
                Minus,
                StoreName(String::from("a")),
            ]
        );
    }

    #[test]
    fn test_enum_case_payload_required() {
        assert!(compile_error("let x = Optional::Some\n").contains("requires a payload"));
        assert!(compile_source("let x = Optional::None\n").is_ok());
    }

    #[test]
    fn test_optional_annotation_accepts_none() {
        assert!(compile_source("let x: Optional<int> = Optional::None\n").is_ok());
    }

    #[test]
    fn test_generic_class() {
        let source = "\
class Box<T> {
  public value: T
}
let b = new Box(value: 42)
let v: int = b.value
";
        assert!(compile_source(source).is_ok());
        let bad = "\
class Box<T> {
  public value: T
}
let b = new Box(value: 42)
let v: string = b.value
";
        assert!(compile_error(bad).contains("type mismatch"));
    }

    #[test]
    fn test_conflicting_generic_binding() {
        let source = "\
class Pair<T> {
  public first: T
  public second: T
}
let p = new Pair(first: 1, second: \"two\")
";
        let message = compile_error(source);
        assert!(message.contains("conflicting generic"), "{}", message);
    }

    #[test]
    fn test_method_call_emission() {
        let source = "\
class Point {
  public x: int

  func double(n: int) -> int {
    return self.x * n
  }
}
let p = new Point(x: 21)
p.double(2)
";
        let program = compile_source(source).unwrap();
        assert!(program.functions.contains_key("Point__double"));
        let main = &program.functions["main"];
        assert!(main.contains(&LookupMethod(String::from("double"))));
        assert!(main.contains(&CallFunction(2)));
        let method = &program.functions["Point__double"];
        assert_eq!(method[0], StoreName(String::from("n")));
        assert_eq!(method[1], StoreName(String::from("self")));
    }

    #[test]
    fn test_builtin_method_call_emission() {
        let code = main_code("let l = [1]\nl.append(2)\n");
        assert!(code.contains(&PushConstFunction(String::from("list__append"), true)));
        assert!(code.contains(&CallBuiltin(2)));
    }

    #[test]
    fn test_builtin_method_type_checking() {
        assert!(compile_error("let l = [1]\nl.append(\"x\")\n")
            .contains("wrong function parameter type"));
        assert!(compile_source("let l = [1]\nlet i = l.find(2)\n").is_ok());
        assert!(compile_error("let s = \"x\"\ns.missing()\n").contains("no method"));
    }

    #[test]
    fn test_map_index_yields_optional() {
        let source = "\
let m = {\"a\": 1}
let v: Optional<int> = m[\"a\"]
";
        assert!(compile_source(source).is_ok());
    }

    #[test]
    fn test_nested_declarations_rejected() {
        assert!(compile_error("if true { func f() { } }\n").contains("nested function"));
    }

    #[test]
    fn test_void_in_expressions() {
        assert!(compile_error("let x = print(1)\n").contains("void"));
    }

    #[test]
    fn test_ternary_types() {
        assert!(compile_source("let x = 1 if true else 2\n").is_ok());
        assert!(compile_error("let x = 1 if true else \"two\"\n").contains("same type"));
        assert!(compile_error("let x = 1 if 5 else 2\n").contains("condition must be a bool"));
    }

    #[test]
    fn test_for_loop_variables() {
        assert!(compile_source("for x in [1, 2] { print(x) }\n").is_ok());
        assert!(compile_source("for k, v in {\"a\": 1} { print(k) }\n").is_ok());
        assert!(compile_error("for x in {\"a\": 1} { }\n").contains("loop variables"));
        assert!(compile_error("for x in 5 { }\n").contains("not iterable"));
    }

    #[test]
    fn test_string_iteration_binds_string() {
        assert!(compile_source("for c in \"abc\" { let u = c.to_upper() }\n").is_ok());
    }

    #[test]
    fn test_import_through_loader() {
        struct Stub;
        impl ModuleLoader for Stub {
            fn load(&self, path: &str) -> Result<String, String> {
                assert_eq!(path, "/usr/lib/venice0.1/math.vn");
                Ok(String::from("func double(x: int) -> int { return x * 2 }\n"))
            }
        }
        let statements = Parser::new("<test>", "import \"math\" as math\nmath::double(21)\n")
            .parse_program()
            .unwrap();
        let mut compiler = Compiler::with_loader(Rc::new(Stub));
        let program = compiler.compile_program(&statements).unwrap();
        assert!(program.functions.contains_key("math::double"));
        assert_eq!(program.imports.len(), 1);
        let main = &program.functions["main"];
        assert!(main.contains(&PushConstFunction(String::from("math::double"), false)));
    }

    #[test]
    fn test_fs_loader_reads_relative_imports() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lib.vn"),
            "func inc(x: int) -> int { return x + 1 }\n",
        )
        .unwrap();
        let main_path = dir.path().join("main.vn");
        let source = "import \"./lib.vn\" as lib\nlet x = lib::inc(1)\n";
        let statements = Parser::new(main_path.to_str().unwrap(), source)
            .parse_program()
            .unwrap();
        let program = Compiler::with_loader(Rc::new(FsLoader))
            .compile_program(&statements)
            .unwrap();
        assert!(program.functions.contains_key("lib::inc"));
    }

    #[test]
    fn test_missing_module_is_reported() {
        let statements = Parser::new("<test>", "import \"nowhere\" as nowhere\n")
            .parse_program()
            .unwrap();
        let error = Compiler::with_loader(Rc::new(FsLoader))
            .compile_program(&statements)
            .unwrap_err();
        assert!(error.message.contains("cannot load module"));
    }

    #[test]
    fn test_chained_comparison_compiles() {
        // `0 <= x < 10` re-reads as `0 <= x and x < 10`, which needs x
        // to be comparable on both sides.
        assert!(compile_source("let x = 5\nlet ok = 0 <= x < 10\n").is_ok());
    }

    #[test]
    fn test_tuple_access() {
        assert!(compile_source("let t = (1, \"a\")\nlet x: int = t.0\n").is_ok());
        assert!(compile_error("let t = (1, \"a\")\nlet x = t.2\n").contains("out of bounds"));
    }

    #[test]
    fn test_in_operator_types() {
        assert!(compile_source("let ok = 1 in [1, 2]\n").is_ok());
        assert!(compile_source("let ok = \"a\" in \"abc\"\n").is_ok());
        assert!(compile_source("let ok = \"k\" in {\"k\": 1}\n").is_ok());
        assert!(compile_error("let ok = 1 in \"abc\"\n").contains("wrong operand types"));
    }

    #[test]
    fn test_chained_comparison_emission_short_circuits() {
        let code = main_code("let x = 5\nlet ok = 0 <= x < 10\n");
        assert!(code.contains(&RelJumpIfFalseOrPop(4)));
        assert!(code.contains(&LtEq));
        assert!(code.contains(&Lt));
    }

    #[test]
    fn test_if_else_shape() {
        let code = main_code("var x = 0\nif true { x = 1 } else { x = 2 }\n");
        assert_eq!(
            code,
            vec![
                PushConstInt(0),
                StoreName(String::from("x")),
                PushConstBool(true),
                RelJumpIfFalse(4),
                PushConstInt(1),
                StoreName(String::from("x")),
                RelJump(3),
                PushConstInt(2),
                StoreName(String::from("x")),
            ]
        );
    }

    #[test]
    fn test_else_if_chain_shape() {
        let code = main_code(
            "var x = 0\nif false { x = 1 } else if true { x = 2 } else { x = 3 }\n",
        );
        assert_eq!(
            code,
            vec![
                PushConstInt(0),
                StoreName(String::from("x")),
                PushConstBool(false),
                RelJumpIfFalse(4),
                PushConstInt(1),
                StoreName(String::from("x")),
                RelJump(8),
                PushConstBool(true),
                RelJumpIfFalse(4),
                PushConstInt(2),
                StoreName(String::from("x")),
                RelJump(3),
                PushConstInt(3),
                StoreName(String::from("x")),
            ]
        );
    }

    #[test]
    fn test_ternary_shape() {
        assert_eq!(
            main_code("let x = 1 if true else 2\n"),
            vec![
                PushConstBool(true),
                RelJumpIfFalse(3),
                PushConstInt(1),
                RelJump(2),
                PushConstInt(2),
                StoreName(String::from("x")),
            ]
        );
    }

    #[test]
    fn test_for_loop_shape() {
        let code = main_code("for x in [7] { print(x) }\n");
        assert_eq!(
            code,
            vec![
                PushConstInt(7),
                BuildList(1),
                GetIter,
                ForIter(6),
                StoreName(String::from("x")),
                PushName(String::from("x")),
                PushConstFunction(String::from("print"), true),
                CallBuiltin(1),
                RelJump(-5),
            ]
        );
    }

    #[test]
    fn test_map_loop_stores_value_then_key() {
        let code = main_code("for k, v in {\"a\": 1} { print(k) }\n");
        let for_iter = code
            .iter()
            .position(|op| matches!(op, ForIter(_)))
            .expect("no FOR_ITER emitted");
        assert_eq!(code[for_iter + 1], StoreName(String::from("v")));
        assert_eq!(code[for_iter + 2], StoreName(String::from("k")));
    }

    #[test]
    fn test_map_literal_emission_order() {
        assert_eq!(
            main_code("let m = {\"a\": 1, \"b\": 2}\n"),
            vec![
                PushConstInt(2),
                PushConstStr(String::from("b")),
                PushConstInt(1),
                PushConstStr(String::from("a")),
                BuildMap(2),
                StoreName(String::from("m")),
            ]
        );
    }

    #[test]
    fn test_constructor_emits_declaration_order() {
        let source = "\
class Point {
  public x: int
  public y: int
}
let p = new Point(y: 2, x: 1)
";
        let code = main_code(source);
        assert_eq!(
            code,
            vec![
                PushConstInt(2),
                PushConstInt(1),
                BuildClass(String::from("Point"), 2),
                StoreName(String::from("p")),
            ]
        );
    }

    #[test]
    fn test_field_assignment_rules() {
        let source = "\
class Secret {
  private value: int
}
let s = new Secret(value: 1)
s.value = 2
";
        assert!(compile_error(source).contains("private field"));
        let missing = "\
class Point {
  public x: int
}
let p = new Point(x: 1)
p.y = 2
";
        assert!(compile_error(missing).contains("no field `y`"));
    }

    #[test]
    fn test_constructor_field_coverage() {
        let source = "\
class Point {
  public x: int
  public y: int
}
let p = new Point(x: 1)
";
        assert!(compile_error(source).contains("missing field `y`"));
        let extra = "\
class Point {
  public x: int
}
let p = new Point(x: 1, z: 2)
";
        assert!(compile_error(extra).contains("no field `z`"));
    }

    #[test]
    fn test_return_rules() {
        assert!(compile_error("return 1\n").contains("outside of a function"));
        assert!(
            compile_error("func f() -> int { return \"s\" }\n").contains("wrong return type")
        );
        assert!(compile_error("func f() { return 1 }\n").contains("void function"));
        assert!(compile_error("func f() -> int { return }\n").contains("missing return value"));
    }

    #[test]
    fn test_undefined_type() {
        assert!(compile_error("let x: Widget = 1\n").contains("undefined type `Widget`"));
        assert!(compile_error("func f(x: Widget) { }\n").contains("undefined type `Widget`"));
    }

    #[test]
    fn test_wrong_type_argument_count() {
        assert!(
            compile_error("let x: Optional<int, int> = Optional::None\n")
                .contains("wrong number of type arguments")
        );
        assert!(compile_error("let x: Optional = Optional::None\n")
            .contains("wrong number of type arguments"));
    }

    #[test]
    fn test_qualified_errors() {
        assert!(compile_error("ghost::f()\n").contains("undefined symbol `ghost`"));
        assert!(
            compile_error("let x = Optional::Missing\n").contains("no case `Missing`")
        );
    }

    #[test]
    fn test_method_reference_without_call() {
        assert!(compile_error("let l = [1]\nlet f = l.append\n")
            .contains("method `append` must be called"));
    }

    #[test]
    fn test_tuple_errors() {
        assert!(compile_error("let x = 1\nlet y = x.0\n").contains("not a tuple"));
    }

    #[test]
    fn test_match_sub_pattern_rules() {
        let wrong_arity = "\
match Optional::Some(1) {
  case Some(a, b) { }
}
";
        assert!(compile_error(wrong_arity).contains("wrong number of sub-patterns"));
        let nested = "\
match Optional::Some(Optional::Some(1)) {
  case Some(Some(x)) { }
}
";
        assert!(compile_error(nested).contains("nested patterns are not supported"));
        let ellipsis = "\
enum Wide { Three(int, int, int) }
var first = 0
match Wide::Three(1, 2, 3) {
  case Three(a, ...) { first = a }
}
";
        assert!(compile_source(ellipsis).is_ok());
    }

    #[test]
    fn test_payload_case_needs_sub_patterns() {
        let source = "\
match Optional::Some(1) {
  case Some { }
}
";
        assert!(compile_error(source).contains("carries a payload"));
    }

    #[test]
    fn test_duplicate_declarations() {
        assert!(compile_error("enum E { A, A }\n").contains("duplicate case"));
        let dup_field = "\
class C {
  public x: int
  public x: int
}
";
        assert!(compile_error(dup_field).contains("duplicate field"));
        assert!(compile_error("enum E { A }\nenum E { B }\n").contains("re-declaration of type"));
        assert!(
            compile_error("class C { public x: int }\nclass C { public y: int }\n")
                .contains("re-declaration of type")
        );
        assert!(compile_error("func f(x: int, x: int) { }\n")
            .contains("re-declaration of symbol"));
    }

    #[test]
    fn test_self_outside_method() {
        assert!(compile_error("let x = self\n").contains("undefined symbol `self`"));
    }

    #[test]
    fn test_string_index_must_be_int() {
        assert!(compile_error("\"abc\"[\"x\"]\n").contains("string index must be an int"));
        assert!(compile_error("let l = [1]\nl[\"x\"]\n").contains("list index must be an int"));
    }

    #[test]
    fn test_modules_are_not_values() {
        struct Stub;
        impl ModuleLoader for Stub {
            fn load(&self, _path: &str) -> Result<String, String> {
                Ok(String::from("func f() { }\n"))
            }
        }
        let statements = Parser::new("<test>", "import \"m\" as m\nlet x = m\n")
            .parse_program()
            .unwrap();
        let error = Compiler::with_loader(Rc::new(Stub))
            .compile_program(&statements)
            .unwrap_err();
        assert!(error.message.contains("module `m` is not a value"));
    }

    #[test]
    fn test_intra_module_calls_are_requalified() {
        struct Stub;
        impl ModuleLoader for Stub {
            fn load(&self, _path: &str) -> Result<String, String> {
                Ok(String::from(
                    "func helper(x: int) -> int { return x + 1 }\n\
                     func public_face(x: int) -> int { return helper(x) * 2 }\n",
                ))
            }
        }
        let statements = Parser::new("<test>", "import \"m\" as m\nm::public_face(1)\n")
            .parse_program()
            .unwrap();
        let program = Compiler::with_loader(Rc::new(Stub))
            .compile_program(&statements)
            .unwrap();
        let face = &program.functions["m::public_face"];
        assert!(face.contains(&PushConstFunction(String::from("m::helper"), false)));
    }

    #[test]
    fn test_errors_carry_locations() {
        let error = compile_source("let x = 1\nlet x = 2\n").unwrap_err();
        let location = error.location.expect("no location attached");
        assert_eq!(location.line, 2);
    }
}
