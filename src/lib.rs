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
//
// Source text flows one way through the crate: lexer -> parser -> ast,
// then compiler (type check + emit) -> bytecode, then vm -> value.

#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod util;

pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod env;
pub mod lexer;
pub mod map;
pub mod parser;
pub mod repl;
pub mod types;
pub mod value;
pub mod vm;
