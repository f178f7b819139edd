//! Tree-walking interpreter over a closed symbol table.
//!
//! The only names an expression can reach are its bindings, the loop variables
//! of enclosing comprehensions, the math functions in [`SAFE_FUNCTIONS`] and the
//! casts in [`PRIMITIVE_CASTS`].

use super::ast::{BinOp, BoolOp, CmpOp, Expr, UnaryOp};
use super::parser::parse;
use super::value::{Bindings, Value};
use dse_types::ExprError;
use std::cmp::Ordering;

/// Pure numeric functions callable from expressions.
pub const SAFE_FUNCTIONS: &[&str] = &[
    "range", "ceil", "floor", "pow", "log", "log10", "fabs", "fmod", "exp", "frexp", "sqrt",
];

/// Primitive type casts callable from expressions.
pub const PRIMITIVE_CASTS: &[&str] = &["int", "str", "float"];

pub fn is_builtin(name: &str) -> bool {
    SAFE_FUNCTIONS.contains(&name) || PRIMITIVE_CASTS.contains(&name)
}

/// Evaluates a parsed expression against `bindings`.
pub fn evaluate(expr: &Expr, bindings: &Bindings) -> Result<Value, ExprError> {
    Interpreter {
        bindings,
        locals: Vec::new(),
    }
    .eval(expr)
}

/// Parses and evaluates `source` in one step.
pub fn eval_str(source: &str, bindings: &Bindings) -> Result<Value, ExprError> {
    evaluate(&parse(source)?, bindings)
}

fn type_error(message: impl Into<String>) -> ExprError {
    ExprError::Type {
        message: message.into(),
    }
}

fn domain_error(func: &str, message: &str) -> ExprError {
    ExprError::Domain {
        func: func.to_string(),
        message: message.to_string(),
    }
}

fn overflow() -> ExprError {
    type_error("integer overflow")
}

/// Longest string or list an expression may build.
pub const MAX_SEQUENCE_LEN: usize = 1 << 20;

fn repeated_len(len: usize, times: usize) -> Result<usize, ExprError> {
    len.checked_mul(times)
        .filter(|total| *total <= MAX_SEQUENCE_LEN)
        .ok_or_else(|| type_error(format!("sequence repetition exceeds {MAX_SEQUENCE_LEN} items")))
}

struct Interpreter<'a> {
    bindings: &'a Bindings,
    /// Comprehension variables, innermost last.
    locals: Vec<(String, Value)>,
}

impl<'a> Interpreter<'a> {
    fn lookup(&self, name: &str) -> Result<Value, ExprError> {
        if let Some((_, value)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.bindings.get(name) {
            return Ok(value.clone());
        }
        if is_builtin(name) {
            return Err(type_error(format!("function `{name}` cannot be used as a value")));
        }
        Err(ExprError::UndefinedName {
            name: name.to_string(),
        })
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Str(v) => Ok(Value::Str(v.clone())),
            Expr::Bool(v) => Ok(Value::Bool(*v)),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::ListComp {
                elt,
                var,
                iter,
                conds,
            } => {
                let source = self.eval(iter)?;
                self.locals.push((var.clone(), Value::Int(0)));
                let out = self.comprehension(elt, source, conds);
                self.locals.pop();
                out
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, value)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary(*op, l, r)
            }
            Expr::Logical { op, left, right } => {
                let l = self.eval(left)?;
                match (op, l.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(l),
                    _ => self.eval(right),
                }
            }
            Expr::Compare { left, rest } => {
                let mut lhs = self.eval(left)?;
                for (op, operand) in rest {
                    let rhs = self.eval(operand)?;
                    if !compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse { body, cond, orelse } => {
                if self.eval(cond)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                call(func, &args)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                let index = self.eval(index)?;
                subscript(container, &index)
            }
        }
    }

    fn comprehension(
        &mut self,
        elt: &Expr,
        source: Value,
        conds: &[Expr],
    ) -> Result<Value, ExprError> {
        let items = match source {
            Value::List(items) => items,
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            other => return Err(type_error(format!("'{}' object is not iterable", other.type_name()))),
        };
        let mut out = Vec::new();
        'items: for item in items {
            if let Some(slot) = self.locals.last_mut() {
                slot.1 = item;
            }
            for cond in conds {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            out.push(self.eval(elt)?);
        }
        Ok(Value::List(out))
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, ExprError> {
    match (op, &value) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Pos, Value::Float(v)) => Ok(Value::Float(*v)),
        (UnaryOp::Neg, _) => value
            .as_int()
            .ok_or_else(|| type_error(format!("bad operand type for unary -: '{}'", value.type_name())))?
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOp::Pos, _) => value
            .as_int()
            .map(Value::Int)
            .ok_or_else(|| type_error(format!("bad operand type for unary +: '{}'", value.type_name()))),
        (UnaryOp::Invert, _) => value
            .as_int()
            .map(|v| Value::Int(!v))
            .ok_or_else(|| type_error(format!("bad operand type for unary ~: '{}'", value.type_name()))),
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn py_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, ExprError> {
    let unsupported = |l: &Value, r: &Value| {
        type_error(format!(
            "unsupported operand type(s) for {op:?}: '{}' and '{}'",
            l.type_name(),
            r.type_name()
        ))
    };

    match (op, &l, &r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let times = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
            repeated_len(s.len(), times)?;
            return Ok(Value::Str(s.repeat(times)));
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            let times = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
            let mut out = Vec::with_capacity(repeated_len(items.len(), times)?);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            return Ok(Value::List(out));
        }
        _ => {}
    }

    if !l.is_numeric() || !r.is_numeric() {
        return Err(unsupported(&l, &r));
    }

    if let (Some(a), Some(b)) = (l.as_int(), r.as_int()) {
        return match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div if b == 0 => Err(ExprError::ZeroDivision),
            BinOp::Div => Ok(Value::Float(a as f64 / b as f64)),
            BinOp::FloorDiv | BinOp::Mod if b == 0 => Err(ExprError::ZeroDivision),
            BinOp::FloorDiv => floor_div(a, b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mod => py_mod(a, b).map(Value::Int).ok_or_else(overflow),
            BinOp::Pow if b < 0 => {
                if a == 0 {
                    Err(ExprError::ZeroDivision)
                } else {
                    Ok(Value::Float((a as f64).powf(b as f64)))
                }
            }
            BinOp::Pow => u32::try_from(b)
                .ok()
                .and_then(|e| a.checked_pow(e))
                .map(Value::Int)
                .ok_or_else(overflow),
            BinOp::BitAnd => Ok(Value::Int(a & b)),
            BinOp::BitOr => Ok(Value::Int(a | b)),
            BinOp::BitXor => Ok(Value::Int(a ^ b)),
            BinOp::Shl | BinOp::Shr if b < 0 => Err(type_error("negative shift count")),
            BinOp::Shl => u32::try_from(b)
                .ok()
                .and_then(|s| a.checked_shl(s))
                .filter(|v| v >> b == a)
                .map(Value::Int)
                .ok_or_else(overflow),
            BinOp::Shr => Ok(Value::Int(if b >= 64 {
                if a < 0 {
                    -1
                } else {
                    0
                }
            } else {
                a >> b
            })),
        };
    }

    let (a, b) = match (l.as_float(), r.as_float()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(unsupported(&l, &r)),
    };
    match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => Err(ExprError::ZeroDivision),
        BinOp::Div => Ok(Value::Float(a / b)),
        BinOp::FloorDiv => Ok(Value::Float((a / b).floor())),
        BinOp::Mod => Ok(Value::Float(a - b * (a / b).floor())),
        BinOp::Pow if a == 0.0 && b < 0.0 => Err(ExprError::ZeroDivision),
        BinOp::Pow if a < 0.0 && b.fract() != 0.0 => {
            Err(domain_error("pow", "negative base with fractional exponent"))
        }
        BinOp::Pow => Ok(Value::Float(a.powf(b))),
        _ => Err(unsupported(&l, &r)),
    }
}

fn ordering(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b) {
                if !x.loose_eq(y) {
                    return ordering(x, y);
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => a.as_float()?.partial_cmp(&b.as_float()?),
        },
        _ => None,
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, ExprError> {
    let order = |test: fn(Ordering) -> bool| -> Result<bool, ExprError> {
        if !(l.is_numeric() && r.is_numeric())
            && std::mem::discriminant(l) != std::mem::discriminant(r)
        {
            return Err(type_error(format!(
                "comparison not supported between instances of '{}' and '{}'",
                l.type_name(),
                r.type_name()
            )));
        }
        // NaN compares false under every ordering.
        Ok(ordering(l, r).map(test).unwrap_or(false))
    };

    match op {
        CmpOp::Eq => Ok(l.loose_eq(r)),
        CmpOp::NotEq => Ok(!l.loose_eq(r)),
        CmpOp::Lt => order(|o| o == Ordering::Less),
        CmpOp::LtEq => order(|o| o != Ordering::Greater),
        CmpOp::Gt => order(|o| o == Ordering::Greater),
        CmpOp::GtEq => order(|o| o != Ordering::Less),
        CmpOp::In => contains(r, l),
        CmpOp::NotIn => contains(r, l).map(|found| !found),
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, ExprError> {
    match (container, needle) {
        (Value::List(items), _) => Ok(items.iter().any(|item| item.loose_eq(needle))),
        (Value::Str(haystack), Value::Str(n)) => Ok(haystack.contains(n.as_str())),
        (Value::Str(_), other) => Err(type_error(format!(
            "'in <string>' requires string as left operand, not {}",
            other.type_name()
        ))),
        (other, _) => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn subscript(container: Value, index: &Value) -> Result<Value, ExprError> {
    let idx = index.as_int().ok_or_else(|| {
        type_error(format!("indices must be integers, not {}", index.type_name()))
    })?;
    let resolve = |len: usize| -> Result<usize, ExprError> {
        let len = i64::try_from(len).map_err(|_| overflow())?;
        let pos = if idx < 0 { idx + len } else { idx };
        if (0..len).contains(&pos) {
            usize::try_from(pos).map_err(|_| overflow())
        } else {
            Err(type_error("index out of range"))
        }
    };
    match container {
        Value::List(mut items) => {
            let pos = resolve(items.len())?;
            Ok(items.swap_remove(pos))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let pos = resolve(chars.len())?;
            Ok(Value::Str(chars[pos].to_string()))
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn expect_arity(func: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExprError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    Err(ExprError::Arity {
        func: func.to_string(),
        expected: if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        },
        found: args.len(),
    })
}

fn int_arg(func: &str, value: &Value) -> Result<i64, ExprError> {
    value.as_int().ok_or_else(|| {
        type_error(format!(
            "{func}(): '{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn float_arg(func: &str, value: &Value) -> Result<f64, ExprError> {
    value
        .as_float()
        .ok_or_else(|| type_error(format!("{func}(): must be real number, not {}", value.type_name())))
}

fn float_to_int(func: &str, value: f64) -> Result<i64, ExprError> {
    if !value.is_finite() {
        return Err(domain_error(func, "cannot convert non-finite float to integer"));
    }
    if value < i64::MIN as f64 || value >= i64::MAX as f64 {
        return Err(overflow());
    }
    Ok(value as i64)
}

fn checked_float(func: &str, input: f64, output: f64) -> Result<Value, ExprError> {
    if output.is_infinite() && input.is_finite() {
        return Err(domain_error(func, "math range error"));
    }
    Ok(Value::Float(output))
}

fn frexp(x: f64) -> (f64, i64) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let mut exp = x.abs().log2().floor() as i64 + 1;
    let mut mantissa = x / 2f64.powi(exp as i32);
    if mantissa.abs() >= 1.0 {
        mantissa /= 2.0;
        exp += 1;
    } else if mantissa.abs() < 0.5 {
        mantissa *= 2.0;
        exp -= 1;
    }
    (mantissa, exp)
}

fn call(func: &str, args: &[Value]) -> Result<Value, ExprError> {
    match func {
        "range" => {
            expect_arity(func, args, 1, 3)?;
            let ints = args
                .iter()
                .map(|arg| int_arg(func, arg))
                .collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(type_error("range() expects 1 to 3 integer arguments")),
            };
            if step == 0 {
                return Err(domain_error(func, "arg 3 must not be zero"));
            }
            let mut out = Vec::new();
            let mut current = start;
            while (step > 0 && current < stop) || (step < 0 && current > stop) {
                if out.len() == MAX_SEQUENCE_LEN {
                    return Err(type_error(format!("range() exceeds {MAX_SEQUENCE_LEN} items")));
                }
                out.push(Value::Int(current));
                current = match current.checked_add(step) {
                    Some(next) => next,
                    None => break,
                };
            }
            Ok(Value::List(out))
        }
        "ceil" | "floor" => {
            expect_arity(func, args, 1, 1)?;
            if let Some(v) = args[0].as_int() {
                return Ok(Value::Int(v));
            }
            let x = float_arg(func, &args[0])?;
            let rounded = if func == "ceil" { x.ceil() } else { x.floor() };
            float_to_int(func, rounded).map(Value::Int)
        }
        "pow" => {
            expect_arity(func, args, 2, 2)?;
            let x = float_arg(func, &args[0])?;
            let y = float_arg(func, &args[1])?;
            if (x == 0.0 && y < 0.0) || (x < 0.0 && y.fract() != 0.0) {
                return Err(domain_error(func, "math domain error"));
            }
            checked_float(func, x, x.powf(y))
        }
        "log" => {
            expect_arity(func, args, 1, 2)?;
            let x = float_arg(func, &args[0])?;
            if x <= 0.0 {
                return Err(domain_error(func, "math domain error"));
            }
            match args.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(base) => {
                    let base = float_arg(func, base)?;
                    if base <= 0.0 {
                        return Err(domain_error(func, "math domain error"));
                    }
                    if base == 1.0 {
                        return Err(ExprError::ZeroDivision);
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
            }
        }
        "log10" => {
            expect_arity(func, args, 1, 1)?;
            let x = float_arg(func, &args[0])?;
            if x <= 0.0 {
                return Err(domain_error(func, "math domain error"));
            }
            Ok(Value::Float(x.log10()))
        }
        "fabs" => {
            expect_arity(func, args, 1, 1)?;
            Ok(Value::Float(float_arg(func, &args[0])?.abs()))
        }
        "fmod" => {
            expect_arity(func, args, 2, 2)?;
            let x = float_arg(func, &args[0])?;
            let y = float_arg(func, &args[1])?;
            if y == 0.0 {
                return Err(domain_error(func, "math domain error"));
            }
            Ok(Value::Float(x % y))
        }
        "exp" => {
            expect_arity(func, args, 1, 1)?;
            let x = float_arg(func, &args[0])?;
            checked_float(func, x, x.exp())
        }
        "frexp" => {
            expect_arity(func, args, 1, 1)?;
            let (mantissa, exp) = frexp(float_arg(func, &args[0])?);
            Ok(Value::List(vec![Value::Float(mantissa), Value::Int(exp)]))
        }
        "sqrt" => {
            expect_arity(func, args, 1, 1)?;
            let x = float_arg(func, &args[0])?;
            if x < 0.0 {
                return Err(domain_error(func, "math domain error"));
            }
            Ok(Value::Float(x.sqrt()))
        }
        "int" => {
            expect_arity(func, args, 1, 1)?;
            match &args[0] {
                Value::Float(v) => float_to_int(func, v.trunc()).map(Value::Int),
                Value::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| type_error(format!("invalid literal for int(): '{s}'"))),
                other => other
                    .as_int()
                    .map(Value::Int)
                    .ok_or_else(|| type_error(format!("int() argument must not be {}", other.type_name()))),
            }
        }
        "float" => {
            expect_arity(func, args, 1, 1)?;
            match &args[0] {
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| type_error(format!("could not convert string to float: '{s}'"))),
                other => float_arg(func, other).map(Value::Float),
            }
        }
        "str" => {
            expect_arity(func, args, 1, 1)?;
            Ok(Value::Str(args[0].to_string()))
        }
        _ => Err(ExprError::UndefinedName {
            name: func.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(pairs: &[(&str, Value)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn ints(values: &[i64]) -> Value {
        Value::List(values.iter().map(|v| Value::Int(*v)).collect())
    }

    fn strs(values: &[&str]) -> Value {
        Value::List(values.iter().map(|v| Value::Str(v.to_string())).collect())
    }

    #[test]
    fn test_option_comprehension_with_bindings() {
        let expr = "[x for x in range(10) if x==0 or B!='flatten' and C!='flatten']";
        let open = bind(&[("B", Value::Str("off".into())), ("C", Value::Str("".into()))]);
        assert_eq!(eval_str(expr, &open).unwrap(), ints(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]));

        let closed = bind(&[("B", Value::Str("flatten".into())), ("C", Value::Str("off".into()))]);
        assert_eq!(eval_str(expr, &closed).unwrap(), ints(&[0]));
    }

    #[test]
    fn test_power_of_two_filter() {
        let expr = "[x for x in ['off', '', 'flatten'] if x=='off' or A&(A-1)==0]";
        assert_eq!(
            eval_str(expr, &bind(&[("A", Value::Int(4))])).unwrap(),
            strs(&["off", "", "flatten"])
        );
        assert_eq!(
            eval_str(expr, &bind(&[("A", Value::Int(3))])).unwrap(),
            strs(&["off"])
        );
    }

    #[test]
    fn test_arithmetic_semantics() {
        let empty = Bindings::new();
        assert_eq!(eval_str("7 // 2", &empty).unwrap(), Value::Int(3));
        assert_eq!(eval_str("-7 // 2", &empty).unwrap(), Value::Int(-4));
        assert_eq!(eval_str("-7 % 3", &empty).unwrap(), Value::Int(2));
        assert_eq!(eval_str("7 / 2", &empty).unwrap(), Value::Float(3.5));
        assert_eq!(eval_str("-2**2", &empty).unwrap(), Value::Int(-4));
        assert_eq!(eval_str("2**-1", &empty).unwrap(), Value::Float(0.5));
        assert_eq!(eval_str("1 << 4 | 1", &empty).unwrap(), Value::Int(17));
        assert_eq!(eval_str("1 < 2 < 3", &empty).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("3 > 2 > 2", &empty).unwrap(), Value::Bool(false));
        assert_eq!(eval_str("0 or 'x'", &empty).unwrap(), Value::Str("x".into()));
        assert_eq!(eval_str("1 / 0", &empty), Err(ExprError::ZeroDivision));
    }

    #[test]
    fn test_safe_functions() {
        let empty = Bindings::new();
        assert_eq!(eval_str("ceil(2.1)", &empty).unwrap(), Value::Int(3));
        assert_eq!(eval_str("floor(-2.1)", &empty).unwrap(), Value::Int(-3));
        assert_eq!(eval_str("pow(2, 10)", &empty).unwrap(), Value::Float(1024.0));
        assert_eq!(eval_str("sqrt(16)", &empty).unwrap(), Value::Float(4.0));
        assert_eq!(eval_str("fmod(7, 3)", &empty).unwrap(), Value::Float(1.0));
        assert_eq!(eval_str("log(8, 2)", &empty).unwrap(), Value::Float(3.0));
        assert_eq!(
            eval_str("frexp(8)", &empty).unwrap(),
            Value::List(vec![Value::Float(0.5), Value::Int(4)])
        );
        assert_eq!(
            eval_str("[2**x for x in range(1, 4)]", &empty).unwrap(),
            ints(&[2, 4, 8])
        );
        assert_eq!(eval_str("range(10, 0, -3)", &empty).unwrap(), ints(&[10, 7, 4, 1]));
        assert!(matches!(eval_str("sqrt(-1)", &empty), Err(ExprError::Domain { .. })));
        assert!(matches!(eval_str("range(1, 2, 3, 4)", &empty), Err(ExprError::Arity { .. })));
    }

    #[test]
    fn test_casts() {
        let empty = Bindings::new();
        assert_eq!(eval_str("int('42')", &empty).unwrap(), Value::Int(42));
        assert_eq!(eval_str("int(2.9)", &empty).unwrap(), Value::Int(2));
        assert_eq!(eval_str("float(3)", &empty).unwrap(), Value::Float(3.0));
        assert_eq!(eval_str("str(2.0)", &empty).unwrap(), Value::Str("2.0".into()));
        assert_eq!(
            eval_str("[str(x) for x in [1, 2]]", &empty).unwrap(),
            strs(&["1", "2"])
        );
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let empty = Bindings::new();
        assert_eq!(
            eval_str("[x for x in range(B)]", &empty),
            Err(ExprError::UndefinedName { name: "B".into() })
        );
        assert_eq!(
            eval_str("sin(1)", &empty),
            Err(ExprError::UndefinedName { name: "sin".into() })
        );
        assert!(matches!(eval_str("__import__('os')", &empty), Err(ExprError::UndefinedName { .. })));
    }

    #[test]
    fn test_comprehension_variable_does_not_leak() {
        let bindings = bind(&[("x", Value::Int(100))]);
        assert_eq!(
            eval_str("[x for x in range(2)] + [x]", &bindings).unwrap(),
            ints(&[0, 1, 100])
        );
    }

    #[test]
    fn test_membership_and_subscript() {
        let bindings = bind(&[("P", Value::Str("flatten".into()))]);
        assert_eq!(eval_str("P in ['off', 'flatten']", &bindings).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("P not in ['off']", &bindings).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("[1, 2, 3][-1]", &bindings).unwrap(), Value::Int(3));
        assert!(matches!(eval_str("'a' < 1", &bindings), Err(ExprError::Type { .. })));
    }

    #[test]
    fn test_huge_sequences_are_rejected() {
        let empty = Bindings::new();
        assert_eq!(eval_str("'ab' * 2", &empty).unwrap(), Value::Str("abab".into()));
        assert_eq!(eval_str("2 * [1]", &empty).unwrap(), ints(&[1, 1]));
        assert_eq!(eval_str("[1] * -3", &empty).unwrap(), ints(&[]));
        for source in [
            "'ab' * 9223372036854775807",
            "[1, 2] * 4611686018427387904",
            "[0] * 1048577",
            "range(2000000)",
        ] {
            assert!(
                matches!(eval_str(source, &empty), Err(ExprError::Type { .. })),
                "`{source}` should be rejected"
            );
        }
    }
}
