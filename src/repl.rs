// The interactive loop.
//
// Lines accumulate in a buffer until they parse. A parse error whose
// message starts with the literal phrase "premature end of input" means
// the statement continues on the next line; any other error is printed
// and the buffer dropped. Compiled statements run against a persistent
// compiler and a persistent environment, so declarations and variables
// survive from line to line, and non-void expression results print.

use std::io::{self, BufRead, Write};
use std::rc::Rc;

use crate::compiler::{Compiler, FsLoader};
use crate::env::{Env, Node};
use crate::parser::Parser;
use crate::types::Type;
use crate::value::Value;
use crate::vm::Vm;


// What a buffered chunk of input did.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    // The input ends mid-statement; feed more lines.
    Incomplete,
    // Everything ran; the values the session printed.
    Done(Vec<String>),
    // A parse, compile, or execution error; the session survives.
    Failed(String),
}


pub struct Repl {
    compiler: Compiler,
    env: Node<Env<Value>>,
}

impl Repl {
    pub fn new() -> Repl {
        Repl {
            compiler: Compiler::with_loader(Rc::new(FsLoader)),
            env: Env::root(),
        }
    }

    // Compile and run one buffered chunk of source.
    pub fn feed(&mut self, source: &str) -> Outcome {
        let statements = match Parser::new("<repl>", source).parse_program() {
            Ok(statements) => statements,
            Err(e) if e.message.starts_with("premature end of input") => {
                return Outcome::Incomplete;
            }
            Err(e) => return Outcome::Failed(format!("parse error: {}", e)),
        };
        let mut printed = Vec::new();
        for statement in &statements {
            let (code, result_type) = match self.compiler.compile_top_statement(statement) {
                Ok(compiled) => compiled,
                Err(e) => return Outcome::Failed(format!("compile error: {}", e)),
            };
            if code.is_empty() {
                continue;
            }
            let program = self.compiler.snapshot(code);
            let mut vm = Vm::with_env(program, self.env.clone());
            match vm.run() {
                Ok(result) => {
                    if result_type != Type::Void {
                        if let Some(value) = result {
                            printed.push(value.to_string());
                        }
                    }
                }
                Err(e) => return Outcome::Failed(format!("execution error: {}", e)),
            }
        }
        Outcome::Done(printed)
    }
}


pub fn run() {
    let stdin = io::stdin();
    let mut repl = Repl::new();
    let mut buffer = String::new();
    prompt(">>> ");
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        buffer.push_str(&line);
        buffer.push('\n');
        match repl.feed(&buffer) {
            Outcome::Incomplete => {
                prompt("... ");
                continue;
            }
            Outcome::Done(printed) => {
                for value in printed {
                    println!("{}", value);
                }
            }
            Outcome::Failed(message) => eprintln!("{}", message),
        }
        buffer.clear();
        prompt(">>> ");
    }
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = io::stdout().flush();
}


#[cfg(test)]
mod tests {
    use super::*;

    fn done(repl: &mut Repl, source: &str) -> Vec<String> {
        match repl.feed(source) {
            Outcome::Done(printed) => printed,
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn test_expression_results_print() {
        let mut repl = Repl::new();
        assert_eq!(done(&mut repl, "1 + 1\n"), vec![String::from("2")]);
    }

    #[test]
    fn test_declarations_are_silent_and_persist() {
        let mut repl = Repl::new();
        assert_eq!(done(&mut repl, "let x = 40\n"), Vec::<String>::new());
        assert_eq!(done(&mut repl, "x + 2\n"), vec![String::from("42")]);
    }

    #[test]
    fn test_functions_persist() {
        let mut repl = Repl::new();
        done(&mut repl, "func double(x: int) -> int { return x * 2 }\n");
        assert_eq!(done(&mut repl, "double(21)\n"), vec![String::from("42")]);
    }

    #[test]
    fn test_mutation_persists() {
        let mut repl = Repl::new();
        done(&mut repl, "var i = 0\n");
        done(&mut repl, "i += 5\n");
        assert_eq!(done(&mut repl, "i\n"), vec![String::from("5")]);
    }

    #[test]
    fn test_incomplete_input_continues() {
        let mut repl = Repl::new();
        assert_eq!(repl.feed("func f(x: int) -> int {\n"), Outcome::Incomplete);
        assert_eq!(
            repl.feed("func f(x: int) -> int {\n  return x\n}\n"),
            Outcome::Done(vec![])
        );
        assert_eq!(done(&mut repl, "f(7)\n"), vec![String::from("7")]);
    }

    #[test]
    fn test_errors_do_not_end_the_session() {
        let mut repl = Repl::new();
        match repl.feed("missing\n") {
            Outcome::Failed(message) => assert!(message.contains("undefined symbol")),
            other => panic!("expected Failed, got {:?}", other),
        }
        match repl.feed("let $ = 1\n") {
            Outcome::Failed(message) => assert!(message.contains("parse error")),
            other => panic!("expected Failed, got {:?}", other),
        }
        match repl.feed("[1, 2][9]\n") {
            Outcome::Failed(message) => assert!(message.contains("index out of bounds")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(done(&mut repl, "2 + 2\n"), vec![String::from("4")]);
    }

    #[test]
    fn test_multi_line_class_definition() {
        let mut repl = Repl::new();
        assert_eq!(repl.feed("class Point {\n"), Outcome::Incomplete);
        assert_eq!(
            repl.feed("class Point {\n  public x: int\n}\n"),
            Outcome::Done(vec![])
        );
        assert_eq!(
            done(&mut repl, "new Point(x: 7).x\n"),
            vec![String::from("7")]
        );
    }

    #[test]
    fn test_multi_line_match() {
        let mut repl = Repl::new();
        done(&mut repl, "var hit = 0\n");
        assert_eq!(repl.feed("match Optional::Some(3) {\n"), Outcome::Incomplete);
        assert_eq!(
            repl.feed("match Optional::Some(3) {\n  case Some(x) { hit = x }\n  case None { }\n}\n"),
            Outcome::Done(vec![])
        );
        assert_eq!(done(&mut repl, "hit\n"), vec![String::from("3")]);
    }

    #[test]
    fn test_several_statements_in_one_chunk() {
        let mut repl = Repl::new();
        assert_eq!(
            done(&mut repl, "let a = 1; let b = 2\na + b\n"),
            vec![String::from("3")]
        );
    }

    #[test]
    fn test_void_results_do_not_print() {
        let mut repl = Repl::new();
        done(&mut repl, "var l = [1]\n");
        assert_eq!(done(&mut repl, "l.append(2)\n"), Vec::<String>::new());
        assert_eq!(done(&mut repl, "l\n"), vec![String::from("[1, 2]")]);
    }
}
