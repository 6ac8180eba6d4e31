//! Syntax substrate: tokenizer, parser and syntax tree for the script grammar.
//!
//! # Modules
//!
//! - [`diagnostic`]: `Span` and `Diagnostic`
//! - [`token`]: token kinds, keywords, operator spellings
//! - [`lexer`]: `tokenize()` with indentation tracking
//! - [`ast`]: the unrestricted syntax tree
//! - [`parser`]: `parse()` (recursive descent)

pub mod ast;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod token;

pub use diagnostic::{Diagnostic, Span};
pub use parser::parse;
