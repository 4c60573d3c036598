// Parsing: token stream to syntax tree.
//
// Expressions use a Pratt design. Every token kind has an optional prefix
// parse and an optional infix precedence; the expression entry point
// takes a minimum precedence and keeps consuming infix operators that
// bind more tightly than its caller. Statements, types and patterns are
// plain recursive descent, dispatched on the leading token.
//
// Two details matter to callers. Unexpected end-of-input errors begin
// with the literal phrase "premature end of input" so the REPL can keep
// reading continuation lines. And the parser tells the lexer when it
// enters and leaves `( [ {` contexts so newlines inside them do not
// terminate statements.

use std::fmt;
use std::path::Path;

use crate::ast::*;
use crate::lexer::{Kind, Lexer, Location, Token};


#[derive(Clone, Debug, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub location: Option<Location>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.message, location),
            None => write!(f, "{}", self.message),
        }
    }
}

pub type Parse<T> = Result<T, ParseError>;


// The precedence ladder, low to high. Infix operators bind when their
// level strictly exceeds the minimum the caller passes down.
mod precedence {
    pub const LOWEST: u8 = 0;
    pub const TERNARY: u8 = 1;
    pub const OR: u8 = 2;
    pub const AND: u8 = 3;
    pub const COMPARISON: u8 = 4;
    pub const ADDITIVE: u8 = 5;
    pub const MULTIPLICATIVE: u8 = 6;
    pub const PREFIX: u8 = 7;
    pub const CALL: u8 = 8;
    pub const MEMBER: u8 = 9;
}

fn infix_precedence(kind: Kind) -> Option<u8> {
    match kind {
        Kind::If => Some(precedence::TERNARY),
        Kind::Or => Some(precedence::OR),
        Kind::And => Some(precedence::AND),
        Kind::Equals
        | Kind::NotEquals
        | Kind::LessThan
        | Kind::LessThanEquals
        | Kind::GreaterThan
        | Kind::GreaterThanEquals
        | Kind::In
        | Kind::Not => Some(precedence::COMPARISON),
        Kind::Plus | Kind::Minus | Kind::Concat => Some(precedence::ADDITIVE),
        Kind::Star | Kind::Slash | Kind::Percent => Some(precedence::MULTIPLICATIVE),
        Kind::LeftParen | Kind::LeftBracket => Some(precedence::CALL),
        Kind::Dot => Some(precedence::MEMBER),
        _ => None,
    }
}

fn binary_op(kind: Kind) -> BinaryOp {
    match kind {
        Kind::Plus => BinaryOp::Add,
        Kind::Minus => BinaryOp::Sub,
        Kind::Star => BinaryOp::Mul,
        Kind::Slash => BinaryOp::Div,
        Kind::Percent => BinaryOp::Mod,
        Kind::Concat => BinaryOp::Concat,
        Kind::Equals => BinaryOp::Eq,
        Kind::NotEquals => BinaryOp::NotEq,
        Kind::LessThan => BinaryOp::Lt,
        Kind::LessThanEquals => BinaryOp::LtEq,
        Kind::GreaterThan => BinaryOp::Gt,
        Kind::GreaterThanEquals => BinaryOp::GtEq,
        Kind::And => BinaryOp::And,
        Kind::Or => BinaryOp::Or,
        Kind::In => BinaryOp::In,
        _ => panic!("token {:?} is not a binary operator", kind),
    }
}

fn is_order_comparison(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::LessThan | Kind::LessThanEquals | Kind::GreaterThan | Kind::GreaterThanEquals
    )
}


// Resolve an import path the way the loader will see it: `./` paths are
// relative to the importing file's directory, anything else names a file
// in the system library.
pub fn resolve_import_path(current: &str, import: &str) -> String {
    if let Some(rest) = import.strip_prefix("./") {
        let directory = Path::new(current).parent().unwrap_or_else(|| Path::new("."));
        directory.join(rest).to_string_lossy().into_owned()
    } else {
        format!("/usr/lib/venice0.1/{}.vn", import)
    }
}


pub struct Parser {
    lexer: Lexer,
    token: Token,
}

impl Parser {
    pub fn new(path: &str, source: &str) -> Parser {
        let mut lexer = Lexer::new(path, source);
        let token = lexer.next_token();
        Parser { lexer, token }
    }

    // Parse a whole source file.
    pub fn parse_program(&mut self) -> Parse<Vec<Statement>> {
        let mut statements = Vec::new();
        self.skip_newlines()?;
        while self.token.kind != Kind::Eof {
            statements.push(self.parse_statement()?);
            self.skip_newlines()?;
        }
        Ok(statements)
    }

    fn location(&self) -> Location {
        self.token.location.clone()
    }

    fn advance(&mut self) -> Parse<()> {
        self.token = self.lexer.next_token();
        if self.token.kind == Kind::Error {
            return Err(ParseError {
                message: self.token.value.clone(),
                location: Some(self.token.location.clone()),
            });
        }
        Ok(())
    }

    fn skip_newlines(&mut self) -> Parse<()> {
        while self.token.kind == Kind::Newline {
            self.advance()?;
        }
        Ok(())
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        let message = match self.token.kind {
            Kind::Eof => format!("premature end of input: expected {}", wanted),
            Kind::Error => self.token.value.clone(),
            _ => format!("expected {}, got {}", wanted, self.token.describe()),
        };
        ParseError {
            message,
            location: Some(self.token.location.clone()),
        }
    }

    fn expect(&mut self, kind: Kind, wanted: &str) -> Parse<Token> {
        if self.token.kind == kind {
            let token = self.token.clone();
            self.advance()?;
            Ok(token)
        } else {
            Err(self.unexpected(wanted))
        }
    }

    // Consume an opening bracket and tell the lexer newlines are now
    // insignificant. The depth change must precede the advance so the
    // token after the bracket is read under the new rules.
    fn open(&mut self, kind: Kind, wanted: &str) -> Parse<()> {
        self.lexer.enter_bracket();
        self.expect(kind, wanted)?;
        Ok(())
    }

    // The mirror image: restore the outer depth before reading the
    // token that follows the closing bracket.
    fn close(&mut self, kind: Kind, wanted: &str) -> Parse<()> {
        self.lexer.exit_bracket();
        self.expect(kind, wanted)?;
        Ok(())
    }

    fn symbol_name(&mut self) -> Parse<String> {
        Ok(self.expect(Kind::Symbol, "a name")?.value)
    }

    // Every statement ends on a newline, a semicolon, end-of-input, or
    // the closing brace of the enclosing block.
    fn end_of_statement(&mut self) -> Parse<()> {
        match self.token.kind {
            Kind::Newline | Kind::Semicolon => self.advance(),
            Kind::Eof | Kind::RightBrace => Ok(()),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    /***************************** statements *****************************/

    pub fn parse_statement(&mut self) -> Parse<Statement> {
        let location = self.location();
        let kind = match self.token.kind {
            Kind::Let => self.parse_declaration(false)?,
            Kind::Var => self.parse_declaration(true)?,
            Kind::Func => StatementKind::Function(self.parse_function()?),
            Kind::Class => self.parse_class()?,
            Kind::Enum => self.parse_enum()?,
            Kind::If => self.parse_if()?,
            Kind::While => self.parse_while()?,
            Kind::For => self.parse_for()?,
            Kind::Match => self.parse_match()?,
            Kind::Return => self.parse_return()?,
            Kind::Break => {
                self.advance()?;
                self.end_of_statement()?;
                StatementKind::Break
            }
            Kind::Continue => {
                self.advance()?;
                self.end_of_statement()?;
                StatementKind::Continue
            }
            Kind::Import => self.parse_import()?,
            Kind::Error => return Err(self.unexpected("a statement")),
            _ => self.parse_expression_statement()?,
        };
        Ok(Statement { kind, location })
    }

    fn parse_declaration(&mut self, mutable: bool) -> Parse<StatementKind> {
        self.advance()?;
        let name = self.symbol_name()?;
        let annotation = if self.token.kind == Kind::Colon {
            self.advance()?;
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(Kind::Assign, "`=`")?;
        let value = self.parse_expression(precedence::LOWEST)?;
        self.end_of_statement()?;
        Ok(StatementKind::Declaration {
            name,
            mutable,
            annotation,
            value,
        })
    }

    fn parse_expression_statement(&mut self) -> Parse<StatementKind> {
        let target = self.parse_expression(precedence::LOWEST)?;
        let kind = match self.token.kind {
            Kind::Assign => {
                self.advance()?;
                let value = self.parse_expression(precedence::LOWEST)?;
                StatementKind::Assignment { target, value }
            }
            Kind::PlusAssign | Kind::MinusAssign | Kind::StarAssign | Kind::SlashAssign => {
                let op = match self.token.kind {
                    Kind::PlusAssign => BinaryOp::Add,
                    Kind::MinusAssign => BinaryOp::Sub,
                    Kind::StarAssign => BinaryOp::Mul,
                    _ => BinaryOp::Div,
                };
                self.advance()?;
                let rhs = self.parse_expression(precedence::LOWEST)?;
                let location = target.location.clone();
                // `x += e` reads as `x = x + e`.
                let value = Expression {
                    kind: ExpressionKind::Binary {
                        op,
                        left: Node::new(target.clone()),
                        right: Node::new(rhs),
                    },
                    location,
                };
                StatementKind::Assignment { target, value }
            }
            _ => StatementKind::Expression(target),
        };
        self.end_of_statement()?;
        Ok(kind)
    }

    fn parse_function(&mut self) -> Parse<FunctionDeclaration> {
        self.advance()?;
        let name = self.symbol_name()?;
        self.open(Kind::LeftParen, "`(`")?;
        let mut params = Vec::new();
        while self.token.kind != Kind::RightParen {
            let param_name = self.symbol_name()?;
            self.expect(Kind::Colon, "`:`")?;
            let annotation = self.parse_type()?;
            params.push(Parameter {
                name: param_name,
                annotation,
            });
            if self.token.kind == Kind::Comma {
                self.advance()?;
            } else {
                break;
            }
        }
        self.close(Kind::RightParen, "`)`")?;
        let return_annotation = if self.token.kind == Kind::Arrow {
            self.advance()?;
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(FunctionDeclaration {
            name,
            params,
            return_annotation,
            body,
        })
    }

    fn parse_class(&mut self) -> Parse<StatementKind> {
        self.advance()?;
        let name = self.symbol_name()?;
        let generic_params = self.parse_generic_params()?;
        self.expect(Kind::LeftBrace, "`{`")?;
        self.skip_newlines()?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while self.token.kind != Kind::RightBrace {
            match self.token.kind {
                Kind::Public | Kind::Private => {
                    let public = self.token.kind == Kind::Public;
                    self.advance()?;
                    let field_name = self.symbol_name()?;
                    self.expect(Kind::Colon, "`:`")?;
                    let annotation = self.parse_type()?;
                    self.end_of_statement()?;
                    fields.push(FieldDeclaration {
                        name: field_name,
                        public,
                        annotation,
                    });
                }
                Kind::Func => methods.push(self.parse_function()?),
                _ => return Err(self.unexpected("a field or method declaration")),
            }
            self.skip_newlines()?;
        }
        self.expect(Kind::RightBrace, "`}`")?;
        self.end_of_statement()?;
        Ok(StatementKind::Class(ClassDeclaration {
            name,
            generic_params,
            fields,
            methods,
        }))
    }

    fn parse_enum(&mut self) -> Parse<StatementKind> {
        self.advance()?;
        let name = self.symbol_name()?;
        let generic_params = self.parse_generic_params()?;
        self.expect(Kind::LeftBrace, "`{`")?;
        self.skip_newlines()?;
        let mut cases = Vec::new();
        while self.token.kind != Kind::RightBrace {
            let label = self.symbol_name()?;
            let mut payload = Vec::new();
            if self.token.kind == Kind::LeftParen {
                self.open(Kind::LeftParen, "`(`")?;
                loop {
                    payload.push(self.parse_type()?);
                    if self.token.kind == Kind::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.close(Kind::RightParen, "`)`")?;
            }
            cases.push(CaseDeclaration { label, payload });
            self.skip_newlines()?;
            if self.token.kind == Kind::Comma {
                self.advance()?;
                self.skip_newlines()?;
            } else {
                break;
            }
        }
        self.expect(Kind::RightBrace, "`}`")?;
        self.end_of_statement()?;
        Ok(StatementKind::Enum(EnumDeclaration {
            name,
            generic_params,
            cases,
        }))
    }

    fn parse_generic_params(&mut self) -> Parse<Vec<String>> {
        let mut params = Vec::new();
        if self.token.kind == Kind::LessThan {
            self.advance()?;
            loop {
                params.push(self.symbol_name()?);
                if self.token.kind == Kind::Comma {
                    self.advance()?;
                } else {
                    break;
                }
            }
            self.expect(Kind::GreaterThan, "`>`")?;
        }
        Ok(params)
    }

    fn parse_if(&mut self) -> Parse<StatementKind> {
        self.advance()?;
        let condition = self.parse_expression(precedence::LOWEST)?;
        let body = self.parse_block()?;
        let mut clauses = vec![(condition, body)];
        let mut otherwise = None;
        while self.token.kind == Kind::Else {
            self.advance()?;
            if self.token.kind == Kind::If {
                self.advance()?;
                let condition = self.parse_expression(precedence::LOWEST)?;
                let body = self.parse_block()?;
                clauses.push((condition, body));
            } else {
                otherwise = Some(self.parse_block()?);
                break;
            }
        }
        self.end_of_statement()?;
        Ok(StatementKind::If { clauses, otherwise })
    }

    fn parse_while(&mut self) -> Parse<StatementKind> {
        self.advance()?;
        let condition = self.parse_expression(precedence::LOWEST)?;
        let body = self.parse_block()?;
        self.end_of_statement()?;
        Ok(StatementKind::While { condition, body })
    }

    fn parse_for(&mut self) -> Parse<StatementKind> {
        self.advance()?;
        let mut variables = vec![self.symbol_name()?];
        if self.token.kind == Kind::Comma {
            self.advance()?;
            variables.push(self.symbol_name()?);
        }
        self.expect(Kind::In, "`in`")?;
        let iterable = self.parse_expression(precedence::LOWEST)?;
        let body = self.parse_block()?;
        self.end_of_statement()?;
        Ok(StatementKind::For {
            variables,
            iterable,
            body,
        })
    }

    fn parse_match(&mut self) -> Parse<StatementKind> {
        self.advance()?;
        let scrutinee = self.parse_expression(precedence::LOWEST)?;
        self.expect(Kind::LeftBrace, "`{`")?;
        self.skip_newlines()?;
        let mut arms = Vec::new();
        let mut default = None;
        while self.token.kind != Kind::RightBrace {
            match self.token.kind {
                Kind::Case => {
                    self.advance()?;
                    let pattern = self.parse_pattern()?;
                    let body = self.parse_block()?;
                    arms.push(MatchArm { pattern, body });
                }
                Kind::Default => {
                    self.advance()?;
                    default = Some(self.parse_block()?);
                }
                _ => return Err(self.unexpected("`case` or `default`")),
            }
            self.skip_newlines()?;
        }
        self.expect(Kind::RightBrace, "`}`")?;
        self.end_of_statement()?;
        Ok(StatementKind::Match {
            scrutinee,
            arms,
            default,
        })
    }

    fn parse_pattern(&mut self) -> Parse<Pattern> {
        let location = self.location();
        let name = self.symbol_name()?;
        if self.token.kind != Kind::LeftParen {
            return Ok(Pattern {
                kind: PatternKind::Binding(name),
                location,
            });
        }
        self.open(Kind::LeftParen, "`(`")?;
        let mut fields = Vec::new();
        let mut ellipsis = false;
        while self.token.kind != Kind::RightParen {
            if self.token.kind == Kind::Ellipsis {
                self.advance()?;
                ellipsis = true;
                break;
            }
            fields.push(self.parse_pattern()?);
            if self.token.kind == Kind::Comma {
                self.advance()?;
            } else {
                break;
            }
        }
        self.close(Kind::RightParen, "`)`")?;
        Ok(Pattern {
            kind: PatternKind::Compound {
                label: name,
                fields,
                ellipsis,
            },
            location,
        })
    }

    fn parse_return(&mut self) -> Parse<StatementKind> {
        self.advance()?;
        let value = match self.token.kind {
            Kind::Newline | Kind::Semicolon | Kind::Eof | Kind::RightBrace => None,
            _ => Some(self.parse_expression(precedence::LOWEST)?),
        };
        self.end_of_statement()?;
        Ok(StatementKind::Return(value))
    }

    fn parse_import(&mut self) -> Parse<StatementKind> {
        self.advance()?;
        let path_token = self.expect(Kind::Str, "a quoted import path")?;
        self.expect(Kind::As, "`as`")?;
        let alias = self.symbol_name()?;
        self.end_of_statement()?;
        let path = resolve_import_path(&self.lexer.path(), &path_token.value);
        Ok(StatementKind::Import { path, alias })
    }

    fn parse_block(&mut self) -> Parse<Vec<Statement>> {
        self.expect(Kind::LeftBrace, "`{`")?;
        self.skip_newlines()?;
        let mut statements = Vec::new();
        while self.token.kind != Kind::RightBrace {
            if self.token.kind == Kind::Eof {
                return Err(self.unexpected("`}`"));
            }
            statements.push(self.parse_statement()?);
            self.skip_newlines()?;
        }
        self.expect(Kind::RightBrace, "`}`")?;
        Ok(statements)
    }

    /***************************** types *****************************/

    pub fn parse_type(&mut self) -> Parse<TypeNode> {
        let location = self.location();
        match self.token.kind {
            Kind::Symbol => {
                let name = self.symbol_name()?;
                let mut args = Vec::new();
                if self.token.kind == Kind::LessThan {
                    self.advance()?;
                    loop {
                        args.push(self.parse_type()?);
                        if self.token.kind == Kind::Comma {
                            self.advance()?;
                        } else {
                            break;
                        }
                    }
                    self.expect(Kind::GreaterThan, "`>`")?;
                }
                Ok(TypeNode {
                    kind: TypeNodeKind::Named { name, args },
                    location,
                })
            }
            Kind::LeftBracket => {
                self.open(Kind::LeftBracket, "`[`")?;
                let item = self.parse_type()?;
                self.close(Kind::RightBracket, "`]`")?;
                Ok(TypeNode {
                    kind: TypeNodeKind::List(Node::new(item)),
                    location,
                })
            }
            Kind::LeftBrace => {
                self.open(Kind::LeftBrace, "`{`")?;
                let key = self.parse_type()?;
                self.expect(Kind::Comma, "`,`")?;
                let value = self.parse_type()?;
                self.close(Kind::RightBrace, "`}`")?;
                Ok(TypeNode {
                    kind: TypeNodeKind::Map(Node::new(key), Node::new(value)),
                    location,
                })
            }
            Kind::LeftParen => {
                self.open(Kind::LeftParen, "`(`")?;
                let mut items = vec![self.parse_type()?];
                while self.token.kind == Kind::Comma {
                    self.advance()?;
                    items.push(self.parse_type()?);
                }
                self.close(Kind::RightParen, "`)`")?;
                Ok(TypeNode {
                    kind: TypeNodeKind::Tuple(items),
                    location,
                })
            }
            _ => Err(self.unexpected("a type")),
        }
    }

    /***************************** expressions *****************************/

    pub fn parse_expression(&mut self, min: u8) -> Parse<Expression> {
        let mut left = self.parse_prefix()?;
        while let Some(level) = infix_precedence(self.token.kind) {
            if level <= min {
                break;
            }
            left = self.parse_infix(left, level)?;
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Parse<Expression> {
        let location = self.location();
        let kind = match self.token.kind {
            Kind::True | Kind::False => {
                let value = self.token.kind == Kind::True;
                self.advance()?;
                ExpressionKind::Boolean(value)
            }
            Kind::Integer => {
                let value: i64 = match self.token.value.parse() {
                    Ok(value) => value,
                    Err(_) => {
                        return Err(ParseError {
                            message: format!(
                                "integer literal `{}` out of range",
                                self.token.value
                            ),
                            location: Some(location),
                        })
                    }
                };
                self.advance()?;
                ExpressionKind::Integer(value)
            }
            Kind::Real => {
                let value: f64 = self.token.value.parse().unwrap_or(0.0);
                self.advance()?;
                ExpressionKind::Real(value)
            }
            Kind::Str => {
                let value = self.token.value.clone();
                self.advance()?;
                ExpressionKind::Str(value)
            }
            Kind::Character => {
                let value = self.token.value.chars().next().unwrap_or('\0') as u8;
                self.advance()?;
                ExpressionKind::Character(value)
            }
            Kind::Symbol => {
                let name = self.token.value.clone();
                self.advance()?;
                if self.token.kind == Kind::ColonColon {
                    self.advance()?;
                    let member = self.symbol_name()?;
                    ExpressionKind::Qualified(name, member)
                } else {
                    ExpressionKind::Symbol(name)
                }
            }
            Kind::SelfKeyword => {
                self.advance()?;
                ExpressionKind::Symbol(String::from("self"))
            }
            Kind::LeftParen => {
                self.open(Kind::LeftParen, "`(`")?;
                let first = self.parse_expression(precedence::LOWEST)?;
                if self.token.kind == Kind::Comma {
                    let mut items = vec![first];
                    while self.token.kind == Kind::Comma {
                        self.advance()?;
                        items.push(self.parse_expression(precedence::LOWEST)?);
                    }
                    self.close(Kind::RightParen, "`)`")?;
                    ExpressionKind::TupleLiteral(items)
                } else {
                    self.close(Kind::RightParen, "`)`")?;
                    return Ok(first);
                }
            }
            Kind::LeftBracket => {
                self.open(Kind::LeftBracket, "`[`")?;
                let mut items = Vec::new();
                while self.token.kind != Kind::RightBracket {
                    items.push(self.parse_expression(precedence::LOWEST)?);
                    if self.token.kind == Kind::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.close(Kind::RightBracket, "`]`")?;
                ExpressionKind::ListLiteral(items)
            }
            Kind::LeftBrace => {
                self.open(Kind::LeftBrace, "`{`")?;
                let mut entries = Vec::new();
                while self.token.kind != Kind::RightBrace {
                    let key = self.parse_expression(precedence::LOWEST)?;
                    self.expect(Kind::Colon, "`:`")?;
                    let value = self.parse_expression(precedence::LOWEST)?;
                    entries.push((key, value));
                    if self.token.kind == Kind::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.close(Kind::RightBrace, "`}`")?;
                ExpressionKind::MapLiteral(entries)
            }
            Kind::Minus => {
                self.advance()?;
                let operand = self.parse_expression(precedence::PREFIX)?;
                ExpressionKind::Unary {
                    op: UnaryOp::Minus,
                    operand: Node::new(operand),
                }
            }
            Kind::Not => {
                self.advance()?;
                let operand = self.parse_expression(precedence::PREFIX)?;
                ExpressionKind::Unary {
                    op: UnaryOp::Not,
                    operand: Node::new(operand),
                }
            }
            Kind::New => {
                self.advance()?;
                let class = self.symbol_name()?;
                self.open(Kind::LeftParen, "`(`")?;
                let mut fields = Vec::new();
                while self.token.kind != Kind::RightParen {
                    let field = self.symbol_name()?;
                    self.expect(Kind::Colon, "`:`")?;
                    let value = self.parse_expression(precedence::LOWEST)?;
                    fields.push((field, value));
                    if self.token.kind == Kind::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.close(Kind::RightParen, "`)`")?;
                ExpressionKind::Constructor { class, fields }
            }
            _ => return Err(self.unexpected("an expression")),
        };
        Ok(Expression { kind, location })
    }

    fn parse_infix(&mut self, left: Expression, level: u8) -> Parse<Expression> {
        let location = left.location.clone();
        let kind = match self.token.kind {
            Kind::If => {
                self.advance()?;
                let condition = self.parse_expression(precedence::TERNARY)?;
                self.expect(Kind::Else, "`else`")?;
                let otherwise = self.parse_expression(precedence::LOWEST)?;
                ExpressionKind::Ternary {
                    condition: Node::new(condition),
                    then: Node::new(left),
                    otherwise: Node::new(otherwise),
                }
            }
            Kind::Not => {
                // `a not in b` is a single compound operator.
                self.advance()?;
                self.expect(Kind::In, "`in`")?;
                let right = self.parse_expression(level)?;
                ExpressionKind::Unary {
                    op: UnaryOp::Not,
                    operand: Node::new(Expression {
                        kind: ExpressionKind::Binary {
                            op: BinaryOp::In,
                            left: Node::new(left),
                            right: Node::new(right),
                        },
                        location: location.clone(),
                    }),
                }
            }
            kind if is_order_comparison(kind) => {
                return self.parse_comparison(left, level);
            }
            Kind::Equals | Kind::NotEquals | Kind::In | Kind::Or | Kind::And | Kind::Plus
            | Kind::Minus | Kind::Concat | Kind::Star | Kind::Slash | Kind::Percent => {
                let op = binary_op(self.token.kind);
                self.advance()?;
                let right = self.parse_expression(level)?;
                ExpressionKind::Binary {
                    op,
                    left: Node::new(left),
                    right: Node::new(right),
                }
            }
            Kind::LeftParen => {
                self.open(Kind::LeftParen, "`(`")?;
                let mut args = Vec::new();
                while self.token.kind != Kind::RightParen {
                    args.push(self.parse_expression(precedence::LOWEST)?);
                    if self.token.kind == Kind::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.close(Kind::RightParen, "`)`")?;
                ExpressionKind::Call {
                    callee: Node::new(left),
                    args,
                }
            }
            Kind::LeftBracket => {
                self.open(Kind::LeftBracket, "`[`")?;
                let index = self.parse_expression(precedence::LOWEST)?;
                self.close(Kind::RightBracket, "`]`")?;
                ExpressionKind::Index {
                    object: Node::new(left),
                    index: Node::new(index),
                }
            }
            Kind::Dot => {
                self.advance()?;
                match self.token.kind {
                    Kind::Symbol => {
                        let field = self.token.value.clone();
                        self.advance()?;
                        ExpressionKind::FieldAccess {
                            object: Node::new(left),
                            field,
                        }
                    }
                    Kind::Integer => {
                        let index: usize = match self.token.value.parse() {
                            Ok(index) => index,
                            Err(_) => {
                                return Err(ParseError {
                                    message: format!(
                                        "tuple index `{}` out of range",
                                        self.token.value
                                    ),
                                    location: Some(self.location()),
                                })
                            }
                        };
                        self.advance()?;
                        ExpressionKind::TupleIndex {
                            object: Node::new(left),
                            index,
                        }
                    }
                    _ => return Err(self.unexpected("a field name or tuple index")),
                }
            }
            _ => return Err(self.unexpected("an operator")),
        };
        Ok(Expression { kind, location })
    }

    // Order comparisons chain: `a < b < c` reads as `(a < b) and (b < c)`.
    fn parse_comparison(&mut self, left: Expression, level: u8) -> Parse<Expression> {
        let location = left.location.clone();
        let op = binary_op(self.token.kind);
        self.advance()?;
        let right = self.parse_expression(level)?;
        let mut previous = right.clone();
        let mut result = Expression {
            kind: ExpressionKind::Binary {
                op,
                left: Node::new(left),
                right: Node::new(right),
            },
            location: location.clone(),
        };
        while is_order_comparison(self.token.kind) {
            let op = binary_op(self.token.kind);
            self.advance()?;
            let next = self.parse_expression(level)?;
            let link = Expression {
                kind: ExpressionKind::Binary {
                    op,
                    left: Node::new(previous),
                    right: Node::new(next.clone()),
                },
                location: location.clone(),
            };
            result = Expression {
                kind: ExpressionKind::Binary {
                    op: BinaryOp::And,
                    left: Node::new(result),
                    right: Node::new(link),
                },
                location: location.clone(),
            };
            previous = next;
        }
        Ok(result)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Location;
    use std::rc::Rc;

    fn dummy() -> Location {
        Location {
            path: Rc::new(String::from("<test>")),
            line: 0,
            column: 0,
        }
    }

    fn e(kind: ExpressionKind) -> Expression {
        Expression {
            kind,
            location: dummy(),
        }
    }

    fn int(i: i64) -> Expression {
        e(ExpressionKind::Integer(i))
    }

    fn sym(name: &str) -> Expression {
        e(ExpressionKind::Symbol(String::from(name)))
    }

    fn bin(op: BinaryOp, left: Expression, right: Expression) -> Expression {
        e(ExpressionKind::Binary {
            op,
            left: Node::new(left),
            right: Node::new(right),
        })
    }

    // Blank out locations so structural assertions stay readable.
    fn strip(expr: &mut Expression) {
        expr.location = dummy();
        match &mut expr.kind {
            ExpressionKind::ListLiteral(items) | ExpressionKind::TupleLiteral(items) => {
                for item in items {
                    strip(item);
                }
            }
            ExpressionKind::MapLiteral(entries) => {
                for (key, value) in entries {
                    strip(key);
                    strip(value);
                }
            }
            ExpressionKind::Constructor { fields, .. } => {
                for (_, value) in fields {
                    strip(value);
                }
            }
            ExpressionKind::FieldAccess { object, .. }
            | ExpressionKind::TupleIndex { object, .. } => strip(object),
            ExpressionKind::Index { object, index } => {
                strip(object);
                strip(index);
            }
            ExpressionKind::Call { callee, args } => {
                strip(callee);
                for arg in args {
                    strip(arg);
                }
            }
            ExpressionKind::Unary { operand, .. } => strip(operand),
            ExpressionKind::Binary { left, right, .. } => {
                strip(left);
                strip(right);
            }
            ExpressionKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                strip(condition);
                strip(then);
                strip(otherwise);
            }
            _ => {}
        }
    }

    fn parse_expr(source: &str) -> Expression {
        let mut parser = Parser::new("<test>", source);
        let mut expr = parser.parse_expression(precedence::LOWEST).unwrap();
        strip(&mut expr);
        expr
    }

    fn assert_parses_to(source: &str, expected: Expression) {
        assert_eq!(parse_expr(source), expected);
    }

    fn parse_stmts(source: &str) -> Vec<Statement> {
        Parser::new("<test>", source).parse_program().unwrap()
    }

    fn parse_error(source: &str) -> ParseError {
        Parser::new("<test>", source).parse_program().unwrap_err()
    }

    #[test]
    fn test_terms() {
        assert_parses_to("42", int(42));
        assert_parses_to("(42)", int(42));
        assert_parses_to("42.5", e(ExpressionKind::Real(42.5)));
        assert_parses_to("true", e(ExpressionKind::Boolean(true)));
        assert_parses_to("foo", sym("foo"));
        assert_parses_to("\"hi\"", e(ExpressionKind::Str(String::from("hi"))));
        assert_parses_to("'a'", e(ExpressionKind::Character(b'a')));
        assert_parses_to("self", sym("self"));
        assert_parses_to(
            "Optional::None",
            e(ExpressionKind::Qualified(
                String::from("Optional"),
                String::from("None"),
            )),
        );
    }

    #[test]
    fn test_precedence() {
        assert_parses_to(
            "1 + 2 * 3",
            bin(BinaryOp::Add, int(1), bin(BinaryOp::Mul, int(2), int(3))),
        );
        assert_parses_to(
            "1 * 2 + 3",
            bin(BinaryOp::Add, bin(BinaryOp::Mul, int(1), int(2)), int(3)),
        );
        assert_parses_to(
            "1 + 2 == 3 and b",
            bin(
                BinaryOp::And,
                bin(BinaryOp::Eq, bin(BinaryOp::Add, int(1), int(2)), int(3)),
                sym("b"),
            ),
        );
        assert_parses_to(
            "a or b and c",
            bin(BinaryOp::Or, sym("a"), bin(BinaryOp::And, sym("b"), sym("c"))),
        );
        assert_parses_to(
            "(1 + 2) * 3",
            bin(BinaryOp::Mul, bin(BinaryOp::Add, int(1), int(2)), int(3)),
        );
    }

    #[test]
    fn test_left_associativity() {
        assert_parses_to(
            "1 - 2 - 3",
            bin(BinaryOp::Sub, bin(BinaryOp::Sub, int(1), int(2)), int(3)),
        );
    }

    #[test]
    fn test_unary() {
        assert_parses_to(
            "-x + 1",
            bin(
                BinaryOp::Add,
                e(ExpressionKind::Unary {
                    op: UnaryOp::Minus,
                    operand: Node::new(sym("x")),
                }),
                int(1),
            ),
        );
        assert_parses_to(
            "not a or b",
            bin(
                BinaryOp::Or,
                e(ExpressionKind::Unary {
                    op: UnaryOp::Not,
                    operand: Node::new(sym("a")),
                }),
                sym("b"),
            ),
        );
    }

    #[test]
    fn test_chained_comparison() {
        assert_parses_to(
            "0 <= x < 10",
            bin(
                BinaryOp::And,
                bin(BinaryOp::LtEq, int(0), sym("x")),
                bin(BinaryOp::Lt, sym("x"), int(10)),
            ),
        );
        assert_parses_to(
            "a < b < c < d",
            bin(
                BinaryOp::And,
                bin(
                    BinaryOp::And,
                    bin(BinaryOp::Lt, sym("a"), sym("b")),
                    bin(BinaryOp::Lt, sym("b"), sym("c")),
                ),
                bin(BinaryOp::Lt, sym("c"), sym("d")),
            ),
        );
        // Equality does not chain.
        assert_parses_to(
            "a == b == c",
            bin(BinaryOp::Eq, bin(BinaryOp::Eq, sym("a"), sym("b")), sym("c")),
        );
    }

    #[test]
    fn test_not_in() {
        assert_parses_to(
            "a not in b",
            e(ExpressionKind::Unary {
                op: UnaryOp::Not,
                operand: Node::new(bin(BinaryOp::In, sym("a"), sym("b"))),
            }),
        );
    }

    #[test]
    fn test_ternary() {
        assert_parses_to(
            "1 if c else 2",
            e(ExpressionKind::Ternary {
                condition: Node::new(sym("c")),
                then: Node::new(int(1)),
                otherwise: Node::new(int(2)),
            }),
        );
    }

    #[test]
    fn test_calls_and_indexing() {
        assert_parses_to(
            "f(1, 2)",
            e(ExpressionKind::Call {
                callee: Node::new(sym("f")),
                args: vec![int(1), int(2)],
            }),
        );
        assert_parses_to(
            "l[0].x",
            e(ExpressionKind::FieldAccess {
                object: Node::new(e(ExpressionKind::Index {
                    object: Node::new(sym("l")),
                    index: Node::new(int(0)),
                })),
                field: String::from("x"),
            }),
        );
        assert_parses_to(
            "t.0",
            e(ExpressionKind::TupleIndex {
                object: Node::new(sym("t")),
                index: 0,
            }),
        );
        assert_parses_to(
            "l.append(1)",
            e(ExpressionKind::Call {
                callee: Node::new(e(ExpressionKind::FieldAccess {
                    object: Node::new(sym("l")),
                    field: String::from("append"),
                })),
                args: vec![int(1)],
            }),
        );
    }

    #[test]
    fn test_collection_literals() {
        assert_parses_to(
            "[1, 2, 3]",
            e(ExpressionKind::ListLiteral(vec![int(1), int(2), int(3)])),
        );
        assert_parses_to("[]", e(ExpressionKind::ListLiteral(vec![])));
        assert_parses_to(
            "(1, true)",
            e(ExpressionKind::TupleLiteral(vec![
                int(1),
                e(ExpressionKind::Boolean(true)),
            ])),
        );
        assert_parses_to(
            "{\"a\": 1}",
            e(ExpressionKind::MapLiteral(vec![(
                e(ExpressionKind::Str(String::from("a"))),
                int(1),
            )])),
        );
    }

    #[test]
    fn test_constructor() {
        assert_parses_to(
            "new Point(x: 1, y: 2)",
            e(ExpressionKind::Constructor {
                class: String::from("Point"),
                fields: vec![
                    (String::from("x"), int(1)),
                    (String::from("y"), int(2)),
                ],
            }),
        );
    }

    #[test]
    fn test_newlines_inside_brackets() {
        assert_parses_to(
            "[\n  1,\n  2\n]",
            e(ExpressionKind::ListLiteral(vec![int(1), int(2)])),
        );
        let statements = parse_stmts("let x = f(\n1,\n2\n)\nlet y = 2\n");
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn test_declaration_statements() {
        let statements = parse_stmts("let x = 1\nvar y: [int] = []\n");
        match &statements[0].kind {
            StatementKind::Declaration {
                name,
                mutable,
                annotation,
                ..
            } => {
                assert_eq!(name, "x");
                assert!(!mutable);
                assert!(annotation.is_none());
            }
            other => panic!("expected a declaration, got {:?}", other),
        }
        match &statements[1].kind {
            StatementKind::Declaration {
                name,
                mutable,
                annotation,
                ..
            } => {
                assert_eq!(name, "y");
                assert!(*mutable);
                assert!(matches!(
                    annotation.as_ref().unwrap().kind,
                    TypeNodeKind::List(_)
                ));
            }
            other => panic!("expected a declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_compound_assignment_desugars() {
        let statements = parse_stmts("i += 1\n");
        match &statements[0].kind {
            StatementKind::Assignment { target, value } => {
                assert_eq!(target.kind, ExpressionKind::Symbol(String::from("i")));
                match &value.kind {
                    ExpressionKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::Add),
                    other => panic!("expected a binary expression, got {:?}", other),
                }
            }
            other => panic!("expected an assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_function_declaration() {
        let statements = parse_stmts("func add(x: int, y: int) -> int { return x + y }\n");
        match &statements[0].kind {
            StatementKind::Function(decl) => {
                assert_eq!(decl.name, "add");
                assert_eq!(decl.params.len(), 2);
                assert_eq!(decl.params[0].name, "x");
                assert!(decl.return_annotation.is_some());
                assert_eq!(decl.body.len(), 1);
            }
            other => panic!("expected a function, got {:?}", other),
        }
    }

    #[test]
    fn test_class_declaration() {
        let source = "\
class Box<T> {
  public value: T
  private tag: int

  func get(n: int) -> T {
    return self.value
  }
}
";
        let statements = parse_stmts(source);
        match &statements[0].kind {
            StatementKind::Class(decl) => {
                assert_eq!(decl.name, "Box");
                assert_eq!(decl.generic_params, vec![String::from("T")]);
                assert_eq!(decl.fields.len(), 2);
                assert!(decl.fields[0].public);
                assert!(!decl.fields[1].public);
                assert_eq!(decl.methods.len(), 1);
                assert_eq!(decl.methods[0].name, "get");
            }
            other => panic!("expected a class, got {:?}", other),
        }
    }

    #[test]
    fn test_enum_declaration() {
        let source = "\
enum Shape {
  Circle(real),
  Rect(real, real),
  Empty
}
";
        let statements = parse_stmts(source);
        match &statements[0].kind {
            StatementKind::Enum(decl) => {
                assert_eq!(decl.name, "Shape");
                assert_eq!(decl.cases.len(), 3);
                assert_eq!(decl.cases[0].label, "Circle");
                assert_eq!(decl.cases[0].payload.len(), 1);
                assert_eq!(decl.cases[1].payload.len(), 2);
                assert_eq!(decl.cases[2].payload.len(), 0);
            }
            other => panic!("expected an enum, got {:?}", other),
        }
    }

    #[test]
    fn test_match_statement() {
        let source = "\
match opt {
  case Some(x, ...) {
    y = x
  }
  case None {
    y = 0
  }
  default {
    y = -1
  }
}
";
        let statements = parse_stmts(source);
        match &statements[0].kind {
            StatementKind::Match { arms, default, .. } => {
                assert_eq!(arms.len(), 2);
                match &arms[0].pattern.kind {
                    PatternKind::Compound {
                        label,
                        fields,
                        ellipsis,
                    } => {
                        assert_eq!(label, "Some");
                        assert_eq!(fields.len(), 1);
                        assert!(*ellipsis);
                    }
                    other => panic!("expected a compound pattern, got {:?}", other),
                }
                assert!(matches!(&arms[1].pattern.kind, PatternKind::Binding(n) if n == "None"));
                assert!(default.is_some());
            }
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_if_chain() {
        let statements = parse_stmts("if a { x = 1 } else if b { x = 2 } else { x = 3 }\n");
        match &statements[0].kind {
            StatementKind::If { clauses, otherwise } => {
                assert_eq!(clauses.len(), 2);
                assert!(otherwise.is_some());
            }
            other => panic!("expected an if, got {:?}", other),
        }
    }

    #[test]
    fn test_for_loops() {
        let statements = parse_stmts("for x in l { print(x) }\nfor k, v in m { print(k) }\n");
        match &statements[0].kind {
            StatementKind::For { variables, .. } => {
                assert_eq!(variables, &vec![String::from("x")])
            }
            other => panic!("expected a for, got {:?}", other),
        }
        match &statements[1].kind {
            StatementKind::For { variables, .. } => {
                assert_eq!(variables, &vec![String::from("k"), String::from("v")])
            }
            other => panic!("expected a for, got {:?}", other),
        }
    }

    #[test]
    fn test_import_resolution() {
        assert_eq!(
            resolve_import_path("/home/me/main.vn", "./lib.vn"),
            "/home/me/lib.vn"
        );
        assert_eq!(
            resolve_import_path("/home/me/main.vn", "math"),
            "/usr/lib/venice0.1/math.vn"
        );
        let statements = parse_stmts("import \"math\" as math\n");
        match &statements[0].kind {
            StatementKind::Import { path, alias } => {
                assert_eq!(path, "/usr/lib/venice0.1/math.vn");
                assert_eq!(alias, "math");
            }
            other => panic!("expected an import, got {:?}", other),
        }
    }

    fn parse_type_node(source: &str) -> TypeNode {
        Parser::new("<test>", source).parse_type().unwrap()
    }

    #[test]
    fn test_type_annotations() {
        match parse_type_node("int").kind {
            TypeNodeKind::Named { name, args } => {
                assert_eq!(name, "int");
                assert!(args.is_empty());
            }
            other => panic!("expected a named type, got {:?}", other),
        }
        match parse_type_node("Box<int>").kind {
            TypeNodeKind::Named { name, args } => {
                assert_eq!(name, "Box");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected a named type, got {:?}", other),
        }
        assert!(matches!(parse_type_node("[[int]]").kind, TypeNodeKind::List(_)));
        match parse_type_node("{string, [int]}").kind {
            TypeNodeKind::Map(key, value) => {
                assert!(matches!(key.kind, TypeNodeKind::Named { .. }));
                assert!(matches!(value.kind, TypeNodeKind::List(_)));
            }
            other => panic!("expected a map type, got {:?}", other),
        }
        match parse_type_node("(int, string, bool)").kind {
            TypeNodeKind::Tuple(items) => assert_eq!(items.len(), 3),
            other => panic!("expected a tuple type, got {:?}", other),
        }
        // Nested generic arguments close with two separate `>` tokens.
        match parse_type_node("Box<Optional<int>>").kind {
            TypeNodeKind::Named { name, args } => {
                assert_eq!(name, "Box");
                assert!(matches!(
                    &args[0].kind,
                    TypeNodeKind::Named { name, .. } if name == "Optional"
                ));
            }
            other => panic!("expected a named type, got {:?}", other),
        }
    }

    #[test]
    fn test_ternary_nests_rightward() {
        assert_parses_to(
            "1 if a else 2 if b else 3",
            e(ExpressionKind::Ternary {
                condition: Node::new(sym("a")),
                then: Node::new(int(1)),
                otherwise: Node::new(e(ExpressionKind::Ternary {
                    condition: Node::new(sym("b")),
                    then: Node::new(int(2)),
                    otherwise: Node::new(int(3)),
                })),
            }),
        );
    }

    #[test]
    fn test_member_chains() {
        assert_parses_to(
            "a.b.c",
            e(ExpressionKind::FieldAccess {
                object: Node::new(e(ExpressionKind::FieldAccess {
                    object: Node::new(sym("a")),
                    field: String::from("b"),
                })),
                field: String::from("c"),
            }),
        );
    }

    #[test]
    fn test_in_binds_like_comparison() {
        assert_parses_to(
            "x in l and y in l",
            bin(
                BinaryOp::And,
                bin(BinaryOp::In, sym("x"), sym("l")),
                bin(BinaryOp::In, sym("y"), sym("l")),
            ),
        );
    }

    #[test]
    fn test_concat_is_additive() {
        assert_parses_to(
            "a ++ b ++ c",
            bin(
                BinaryOp::Concat,
                bin(BinaryOp::Concat, sym("a"), sym("b")),
                sym("c"),
            ),
        );
    }

    #[test]
    fn test_return_statements() {
        let statements = parse_stmts("func f() -> int { return 1 }\nfunc g() { return }\n");
        match &statements[0].kind {
            StatementKind::Function(decl) => match &decl.body[0].kind {
                StatementKind::Return(value) => assert!(value.is_some()),
                other => panic!("expected a return, got {:?}", other),
            },
            other => panic!("expected a function, got {:?}", other),
        }
        match &statements[1].kind {
            StatementKind::Function(decl) => match &decl.body[0].kind {
                StatementKind::Return(value) => assert!(value.is_none()),
                other => panic!("expected a return, got {:?}", other),
            },
            other => panic!("expected a function, got {:?}", other),
        }
    }

    #[test]
    fn test_while_and_break_statements() {
        let statements = parse_stmts("while true {\n  break\n  continue\n}\n");
        match &statements[0].kind {
            StatementKind::While { body, .. } => {
                assert!(matches!(body[0].kind, StatementKind::Break));
                assert!(matches!(body[1].kind, StatementKind::Continue));
            }
            other => panic!("expected a while, got {:?}", other),
        }
    }

    #[test]
    fn test_newline_is_not_premature_end() {
        let err = parse_error("1 +\n");
        assert!(err.message.contains("expected an expression"));
        assert!(!err.message.starts_with("premature end of input"));
    }

    #[test]
    fn test_semicolon_terminator() {
        let statements = parse_stmts("let x = 1; let y = 2\n");
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn test_premature_end_of_input() {
        for source in &["let x = ", "func f(", "if a {", "1 +", "match x {"] {
            let err = parse_error(source);
            assert!(
                err.message.starts_with("premature end of input"),
                "source {:?} gave {:?}",
                source,
                err.message
            );
        }
    }

    #[test]
    fn test_expected_got_messages() {
        let err = parse_error("let 1 = 2\n");
        assert!(err.message.contains("expected a name"));
        let err = parse_error("let x 2\n");
        assert!(err.message.contains("expected `=`"));
    }

    #[test]
    fn test_lex_errors_surface() {
        let err = parse_error("let x = \"unterminated\n");
        assert!(err.message.contains("unterminated string literal"));
    }
}
