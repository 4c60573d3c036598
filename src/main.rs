// venice: a small statically-typed imperative language.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

use std::env::args;
use std::fs;
use std::path::Path;
use std::process::exit;
use std::rc::Rc;

use venice::bytecode::Program;
use venice::compiler::{Compiler, FsLoader};
use venice::parser::Parser;
use venice::repl;
use venice::vm::Vm;


fn main() {
    let arguments: Vec<String> = args().collect();
    let status = match arguments.get(1).map(String::as_str) {
        Some("compile") => compile_command(&arguments[2..]),
        Some("run") => run_command(&arguments[2..]),
        Some("repl") => {
            repl::run();
            0
        }
        _ => {
            eprintln!("usage: venice compile <source> [-o <out>] | run <file> | repl");
            1
        }
    };
    exit(status);
}


fn compile_source(path: &str) -> Result<Program, String> {
    let source = fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
    let statements = Parser::new(path, &source)
        .parse_program()
        .map_err(|e| format!("parse error: {}", e))?;
    Compiler::with_loader(Rc::new(FsLoader))
        .compile_program(&statements)
        .map_err(|e| format!("compile error: {}", e))
}

fn compile_command(arguments: &[String]) -> i32 {
    let source = match arguments.get(0) {
        Some(source) => source,
        None => {
            eprintln!("usage: venice compile <source> [-o <out>]");
            return 1;
        }
    };
    let out = match arguments.get(1).map(String::as_str) {
        Some("-o") => match arguments.get(2) {
            Some(out) => out.clone(),
            None => {
                eprintln!("-o needs a path");
                return 1;
            }
        },
        _ => Path::new(source)
            .with_extension("vnb")
            .to_string_lossy()
            .into_owned(),
    };
    let program = match compile_source(source) {
        Ok(program) => program,
        Err(message) => {
            eprintln!("{}", message);
            return 1;
        }
    };
    if let Err(e) = fs::write(&out, program.to_string()) {
        eprintln!("{}: {}", out, e);
        return 1;
    }
    0
}

fn run_command(arguments: &[String]) -> i32 {
    let path = match arguments.get(0) {
        Some(path) => path,
        None => {
            eprintln!("usage: venice run <file>");
            return 1;
        }
    };
    // Bytecode runs directly; source compiles first.
    let program = if path.ends_with(".vnb") {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("{}: {}", path, e);
                return 1;
            }
        };
        match Program::parse(&text) {
            Ok(program) => program,
            Err(e) => {
                eprintln!("bytecode error: {}", e);
                return 1;
            }
        }
    } else {
        match compile_source(path) {
            Ok(program) => program,
            Err(message) => {
                eprintln!("{}", message);
                return 1;
            }
        }
    };
    match Vm::new(program).run() {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("execution error: {}", e);
            1
        }
    }
}
