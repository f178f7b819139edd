//! # dse-space
//!
//! The design space model: a restricted expression language for option and
//! order rules, parameters built from user definitions, dependency analysis,
//! and partitioning into independently explorable sub-spaces.

pub mod expr;
pub mod parameter;
pub mod partition;
pub mod space;

pub use expr::{analyze_option_syntax, analyze_order_syntax, Bindings, Value};
pub use parameter::{create_parameter, list_literal, OrderRule, ParamType, Parameter, ParameterConfig};
pub use partition::partition;
pub use space::{compile_design_space, DesignSpace};
