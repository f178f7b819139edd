//! The restricted expression language used by option and order rules.

pub mod analysis;
pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod value;

pub use analysis::{analyze_option_syntax, analyze_order_syntax, free_names, OptionSyntax, OrderSyntax};
pub use ast::Expr;
pub use eval::{eval_str, evaluate, is_builtin, PRIMITIVE_CASTS, SAFE_FUNCTIONS};
pub use parser::parse;
pub use value::{Bindings, Value};
