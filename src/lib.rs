//! Front-end for the kaleidoscope toy language: source text is lexed,
//! parsed into an AST, lowered into an in-memory IR module and, for
//! top-level expressions, evaluated.

pub mod ast;
pub mod codegen;
pub mod diagnostics;
pub mod driver;
pub mod engine;
pub mod ir;
pub mod lexer;
pub mod parser;

pub use driver::{Compiled, Session};
