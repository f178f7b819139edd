//! Static analysis of expressions. Nothing here evaluates an expression.

use super::ast::Expr;
use super::eval::is_builtin;
use super::parser::parse;
use dse_types::ExprError;

/// A parsed option expression and the parameters it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSyntax {
    pub ast: Expr,
    pub deps: Vec<String>,
}

/// A parsed order expression and its single variable.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSyntax {
    pub ast: Expr,
    pub var: String,
}

/// Parses an option expression and extracts its dependencies: every free name
/// other than comprehension variables, safe functions and casts, in order of
/// first appearance.
pub fn analyze_option_syntax(source: &str) -> Result<OptionSyntax, ExprError> {
    let ast = parse(source)?;
    let deps = free_names(&ast);
    Ok(OptionSyntax { ast, deps })
}

/// Parses an order expression, which must reference exactly one free name.
pub fn analyze_order_syntax(source: &str) -> Result<OrderSyntax, ExprError> {
    let ast = parse(source)?;
    let mut names = free_names(&ast);
    if names.len() != 1 {
        return Err(ExprError::Syntax {
            expr: source.to_string(),
            message: format!(
                "order should have one and only one variable but found {}",
                names.len()
            ),
        });
    }
    let var = names.remove(0);
    Ok(OrderSyntax { ast, var })
}

/// Free names of `expr`. Calls to unknown functions count as free names.
pub fn free_names(expr: &Expr) -> Vec<String> {
    let mut collector = NameCollector::default();
    collector.visit(expr);
    collector.names
}

#[derive(Default)]
struct NameCollector {
    bound: Vec<String>,
    names: Vec<String>,
}

impl NameCollector {
    fn record(&mut self, name: &str) {
        if self.bound.iter().any(|b| b == name) || self.names.iter().any(|n| n == name) {
            return;
        }
        self.names.push(name.to_string());
    }

    fn visit(&mut self, expr: &Expr) {
        match expr {
            Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Bool(_) => {}
            Expr::Name(name) => {
                if !is_builtin(name) {
                    self.record(name);
                }
            }
            Expr::List(items) => items.iter().for_each(|item| self.visit(item)),
            Expr::ListComp {
                elt,
                var,
                iter,
                conds,
            } => {
                // The iterable is evaluated outside the comprehension scope.
                self.visit(iter);
                self.bound.push(var.clone());
                conds.iter().for_each(|cond| self.visit(cond));
                self.visit(elt);
                self.bound.pop();
            }
            Expr::Unary { operand, .. } => self.visit(operand),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.visit(left);
                self.visit(right);
            }
            Expr::Compare { left, rest } => {
                self.visit(left);
                rest.iter().for_each(|(_, operand)| self.visit(operand));
            }
            Expr::IfElse { body, cond, orelse } => {
                self.visit(body);
                self.visit(cond);
                self.visit(orelse);
            }
            Expr::Call { func, args } => {
                if !is_builtin(func) {
                    self.record(func);
                }
                args.iter().for_each(|arg| self.visit(arg));
            }
            Expr::Subscript { value, index } => {
                self.visit(value);
                self.visit(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_dependencies() {
        let syntax =
            analyze_option_syntax("[x for x in range(10) if x==0 or B!='flatten' and C!='flatten']")
                .unwrap();
        assert_eq!(syntax.deps, vec!["B".to_string(), "C".to_string()]);

        let syntax = analyze_option_syntax("[x for x in ['off', '', 'flatten']]").unwrap();
        assert!(syntax.deps.is_empty());
    }

    #[test]
    fn test_casts_and_functions_are_not_dependencies() {
        let syntax =
            analyze_option_syntax("[int(x) for x in range(ceil(log10(N)), floor(sqrt(M)))]")
                .unwrap();
        assert_eq!(syntax.deps, vec!["N".to_string(), "M".to_string()]);
    }

    #[test]
    fn test_unknown_function_is_a_dependency() {
        let syntax = analyze_option_syntax("[sin(x) for x in range(4)]").unwrap();
        assert_eq!(syntax.deps, vec!["sin".to_string()]);
    }

    #[test]
    fn test_option_syntax_errors() {
        assert!(analyze_option_syntax("[x, y for x in range(3)]").is_err());
        assert!(analyze_option_syntax("[ for x in range(3)]").is_err());
    }

    #[test]
    fn test_order_single_variable() {
        let syntax = analyze_order_syntax("0 if x!='flatten' else 1").unwrap();
        assert_eq!(syntax.var, "x");

        assert!(analyze_order_syntax("0 if x==1 and y==2 else 1").is_err());
        assert!(analyze_order_syntax("0").is_err());
        assert!(analyze_order_syntax("0 if x!='flatten'").is_err());
    }
}
