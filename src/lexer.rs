// Lexical analysis: source text to a stream of located tokens.
//
// The lexer is consumed once, token by token. Two read operations are
// exposed: `next_token` and `next_skipping_newlines`. The parser signals
// entry and exit of bracketed contexts so that newlines inside `( [ {`
// never terminate a statement.
//
// Lexical errors do not abort the stream; they surface as `Kind::Error`
// tokens whose value is the message, and the parser turns them into
// parse errors with the right location attached.

use std::fmt;
use std::rc::Rc;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    // Keywords.
    Let,
    Var,
    Func,
    Class,
    Enum,
    If,
    Else,
    While,
    For,
    In,
    Match,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Import,
    As,
    New,
    SelfKeyword,
    Public,
    Private,
    No,
    Constructor,
    And,
    Or,
    Not,
    True,
    False,
    // Punctuation and operators.
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Colon,
    ColonColon,
    Semicolon,
    Dot,
    Ellipsis,
    Arrow,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Concat,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Equals,
    NotEquals,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
    // Literals and names.
    Symbol,
    Integer,
    Real,
    Str,
    Character,
    // Structure.
    Newline,
    Eof,
    Error,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    pub path: Rc<String>,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path, self.line, self.column)
    }
}


#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: Kind,
    pub value: String,
    pub location: Location,
}

impl Token {
    // Human-readable form for "expected X, got Y" messages.
    pub fn describe(&self) -> String {
        match self.kind {
            Kind::Symbol => format!("symbol `{}`", self.value),
            Kind::Integer | Kind::Real => format!("number `{}`", self.value),
            Kind::Str => String::from("string literal"),
            Kind::Character => String::from("character literal"),
            Kind::Newline => String::from("end of line"),
            Kind::Eof => String::from("end of input"),
            Kind::Error => self.value.clone(),
            _ => format!("`{}`", self.value),
        }
    }
}


fn keyword(word: &str) -> Option<Kind> {
    match word {
        "let" => Some(Kind::Let),
        "var" => Some(Kind::Var),
        "func" => Some(Kind::Func),
        "class" => Some(Kind::Class),
        "enum" => Some(Kind::Enum),
        "if" => Some(Kind::If),
        "else" => Some(Kind::Else),
        "while" => Some(Kind::While),
        "for" => Some(Kind::For),
        "in" => Some(Kind::In),
        "match" => Some(Kind::Match),
        "case" => Some(Kind::Case),
        "default" => Some(Kind::Default),
        "break" => Some(Kind::Break),
        "continue" => Some(Kind::Continue),
        "return" => Some(Kind::Return),
        "import" => Some(Kind::Import),
        "as" => Some(Kind::As),
        "new" => Some(Kind::New),
        "self" => Some(Kind::SelfKeyword),
        "public" => Some(Kind::Public),
        "private" => Some(Kind::Private),
        "no" => Some(Kind::No),
        "constructor" => Some(Kind::Constructor),
        "and" => Some(Kind::And),
        "or" => Some(Kind::Or),
        "not" => Some(Kind::Not),
        "true" => Some(Kind::True),
        "false" => Some(Kind::False),
        _ => None,
    }
}


pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    path: Rc<String>,
    bracket_depth: usize,
}

impl Lexer {
    pub fn new(path: &str, source: &str) -> Lexer {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            path: Rc::new(String::from(path)),
            bracket_depth: 0,
        }
    }

    pub fn path(&self) -> Rc<String> {
        self.path.clone()
    }

    // The parser calls these around `( [ {` contexts where newlines are
    // insignificant. Block braces do not count; newlines separate the
    // statements inside them.
    pub fn enter_bracket(&mut self) {
        self.bracket_depth += 1;
    }

    pub fn exit_bracket(&mut self) {
        if self.bracket_depth > 0 {
            self.bracket_depth -= 1;
        }
    }

    pub fn next_token(&mut self) -> Token {
        loop {
            let token = self.read_token();
            if token.kind == Kind::Newline && self.bracket_depth > 0 {
                continue;
            }
            return token;
        }
    }

    pub fn next_skipping_newlines(&mut self) -> Token {
        loop {
            let token = self.next_token();
            if token.kind != Kind::Newline {
                return token;
            }
        }
    }

    fn location(&self) -> Location {
        Location {
            path: self.path.clone(),
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn token(&self, kind: Kind, value: &str, location: Location) -> Token {
        Token {
            kind,
            value: String::from(value),
            location,
        }
    }

    fn error(&self, message: String, location: Location) -> Token {
        Token {
            kind: Kind::Error,
            value: message,
            location,
        }
    }

    // Consume spaces, tabs, carriage returns and comments, stopping
    // before newlines (they are tokens of their own).
    fn skip_blank(&mut self) -> Option<Token> {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('#') => {
                    if self.peek_at(1) == Some('#') && self.peek_at(2) == Some('#') {
                        if let Some(err) = self.skip_block_comment() {
                            return Some(err);
                        }
                    } else {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    }
                }
                _ => return None,
            }
        }
    }

    fn skip_block_comment(&mut self) -> Option<Token> {
        let location = self.location();
        self.advance();
        self.advance();
        self.advance();
        loop {
            match self.peek() {
                None => {
                    return Some(self.error(String::from("unterminated block comment"), location))
                }
                Some('#') if self.peek_at(1) == Some('#') && self.peek_at(2) == Some('#') => {
                    self.advance();
                    self.advance();
                    self.advance();
                    return None;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn read_token(&mut self) -> Token {
        if let Some(err) = self.skip_blank() {
            return err;
        }
        let location = self.location();
        let c = match self.peek() {
            Some(c) => c,
            None => return self.token(Kind::Eof, "", location),
        };

        if c == '\n' {
            self.advance();
            return self.token(Kind::Newline, "\n", location);
        }
        if c.is_ascii_digit() {
            return self.read_number(location);
        }
        if c.is_alphabetic() || c == '_' {
            return self.read_word(location);
        }
        if c == '"' {
            return self.read_string(location);
        }
        if c == '\'' {
            return self.read_character(location);
        }
        self.read_operator(location)
    }

    fn read_number(&mut self, location: Location) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        // A dot makes it a real literal, but only when digits follow;
        // otherwise the dot belongs to a tuple-field access.
        if self.peek() == Some('.') && self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            return self.token(Kind::Real, &text, location);
        }
        self.token(Kind::Integer, &text, location)
    }

    fn read_word(&mut self, location: Location) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        match keyword(&text) {
            Some(kind) => self.token(kind, &text, location),
            None => self.token(Kind::Symbol, &text, location),
        }
    }

    fn read_escape(&mut self) -> Result<char, String> {
        match self.advance() {
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('t') => Ok('\t'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some(c) => Err(format!("bad escape sequence `\\{}`", c)),
            None => Err(String::from("unterminated escape sequence")),
        }
    }

    fn read_string(&mut self, location: Location) -> Token {
        self.advance();
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return self.error(String::from("unterminated string literal"), location);
                }
                Some('"') => {
                    self.advance();
                    return self.token(Kind::Str, &text, location);
                }
                Some('\\') => {
                    self.advance();
                    match self.read_escape() {
                        Ok(c) => text.push(c),
                        Err(message) => return self.error(message, location),
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
    }

    fn read_character(&mut self, location: Location) -> Token {
        self.advance();
        let c = match self.peek() {
            None | Some('\n') => {
                return self.error(String::from("unterminated character literal"), location);
            }
            Some('\\') => {
                self.advance();
                match self.read_escape() {
                    Ok(c) => c,
                    Err(message) => return self.error(message, location),
                }
            }
            Some(c) => {
                self.advance();
                c
            }
        };
        if self.peek() != Some('\'') {
            return self.error(String::from("unterminated character literal"), location);
        }
        self.advance();
        if !c.is_ascii() {
            return self.error(
                String::from("character literal must be a single byte"),
                location,
            );
        }
        let mut value = String::new();
        value.push(c);
        self.token(Kind::Character, &value, location)
    }

    fn read_operator(&mut self, location: Location) -> Token {
        // Multi-character operators are matched before their prefixes.
        let two: String = self.chars[self.pos..self.chars.len().min(self.pos + 2)]
            .iter()
            .collect();
        let three: String = self.chars[self.pos..self.chars.len().min(self.pos + 3)]
            .iter()
            .collect();
        if three == "..." {
            self.advance();
            self.advance();
            self.advance();
            return self.token(Kind::Ellipsis, "...", location);
        }
        let kind = match two.as_str() {
            "==" => Some(Kind::Equals),
            "!=" => Some(Kind::NotEquals),
            "<=" => Some(Kind::LessThanEquals),
            ">=" => Some(Kind::GreaterThanEquals),
            "++" => Some(Kind::Concat),
            "+=" => Some(Kind::PlusAssign),
            "-=" => Some(Kind::MinusAssign),
            "*=" => Some(Kind::StarAssign),
            "/=" => Some(Kind::SlashAssign),
            "->" => Some(Kind::Arrow),
            "::" => Some(Kind::ColonColon),
            _ => None,
        };
        if let Some(kind) = kind {
            self.advance();
            self.advance();
            return self.token(kind, &two, location);
        }
        let c = self.advance().unwrap();
        let kind = match c {
            '(' => Kind::LeftParen,
            ')' => Kind::RightParen,
            '[' => Kind::LeftBracket,
            ']' => Kind::RightBracket,
            '{' => Kind::LeftBrace,
            '}' => Kind::RightBrace,
            ',' => Kind::Comma,
            ':' => Kind::Colon,
            ';' => Kind::Semicolon,
            '.' => Kind::Dot,
            '+' => Kind::Plus,
            '-' => Kind::Minus,
            '*' => Kind::Star,
            '/' => Kind::Slash,
            '%' => Kind::Percent,
            '=' => Kind::Assign,
            '<' => Kind::LessThan,
            '>' => Kind::GreaterThan,
            c => return self.error(format!("unexpected character `{}`", c), location),
        };
        let mut value = String::new();
        value.push(c);
        self.token(kind, &value, location)
    }
}
