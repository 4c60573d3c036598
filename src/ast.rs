// Syntax tree definitions. Pure data: the parser builds these, the
// compiler consumes them, and nothing here carries behaviour beyond
// construction. Every node records the source location it began at.

use crate::lexer::Location;


pub type Node<T> = Box<T>;


#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
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
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => "++",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::In => "in",
        }
    }
}


#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UnaryOp {
    Minus,
    Not,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionKind {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Character(u8),
    Str(String),
    Symbol(String),
    // `Enum::Case` or `module::symbol`.
    Qualified(String, String),
    ListLiteral(Vec<Expression>),
    MapLiteral(Vec<(Expression, Expression)>),
    TupleLiteral(Vec<Expression>),
    // `new Name(field: expr, ...)`
    Constructor {
        class: String,
        fields: Vec<(String, Expression)>,
    },
    FieldAccess {
        object: Node<Expression>,
        field: String,
    },
    TupleIndex {
        object: Node<Expression>,
        index: usize,
    },
    Index {
        object: Node<Expression>,
        index: Node<Expression>,
    },
    Call {
        callee: Node<Expression>,
        args: Vec<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Node<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Node<Expression>,
        right: Node<Expression>,
    },
    // `value if condition else other`
    Ternary {
        condition: Node<Expression>,
        then: Node<Expression>,
        otherwise: Node<Expression>,
    },
}


#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatementKind {
    Declaration {
        name: String,
        mutable: bool,
        annotation: Option<TypeNode>,
        value: Expression,
    },
    // Compound assignments are desugared by the parser, so `value`
    // already contains the combining operation.
    Assignment {
        target: Expression,
        value: Expression,
    },
    Expression(Expression),
    If {
        clauses: Vec<(Expression, Vec<Statement>)>,
        otherwise: Option<Vec<Statement>>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    For {
        variables: Vec<String>,
        iterable: Expression,
        body: Vec<Statement>,
    },
    Break,
    Continue,
    Return(Option<Expression>),
    Function(FunctionDeclaration),
    Class(ClassDeclaration),
    Enum(EnumDeclaration),
    Match {
        scrutinee: Expression,
        arms: Vec<MatchArm>,
        default: Option<Vec<Statement>>,
    },
    Import {
        path: String,
        alias: String,
    },
}


#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub params: Vec<Parameter>,
    pub return_annotation: Option<TypeNode>,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub annotation: TypeNode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassDeclaration {
    pub name: String,
    pub generic_params: Vec<String>,
    pub fields: Vec<FieldDeclaration>,
    pub methods: Vec<FunctionDeclaration>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDeclaration {
    pub name: String,
    pub public: bool,
    pub annotation: TypeNode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumDeclaration {
    pub name: String,
    pub generic_params: Vec<String>,
    pub cases: Vec<CaseDeclaration>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaseDeclaration {
    pub label: String,
    pub payload: Vec<TypeNode>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Vec<Statement>,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    pub kind: PatternKind,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PatternKind {
    // `Label(sub, patterns, ...)`; the flag records a trailing ellipsis.
    Compound {
        label: String,
        fields: Vec<Pattern>,
        ellipsis: bool,
    },
    // A bare symbol. Resolves to a payload-less case when the name is
    // one of the scrutinee's labels, and to a binding otherwise.
    Binding(String),
}


#[derive(Clone, Debug, PartialEq)]
pub struct TypeNode {
    pub kind: TypeNodeKind,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeNodeKind {
    Named {
        name: String,
        args: Vec<TypeNode>,
    },
    List(Node<TypeNode>),
    Map(Node<TypeNode>, Node<TypeNode>),
    Tuple(Vec<TypeNode>),
}
