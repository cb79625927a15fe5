//! Binary and unary operators.

use crate::error::EvalErrorKind;
use crate::types::Type;
use crate::value::{map_key, Value};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Pow,
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    UShr,
    Lt,
    Gt,
    Le,
    Ge,
    InstanceOf,
    Is,
    Contains,
    RegexMatch,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl Operator {
    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        use Operator::*;
        match self {
            Pow => 12,
            Mul | Div | Rem => 11,
            Add | Sub => 10,
            Shl | Shr | UShr => 9,
            Lt | Gt | Le | Ge | InstanceOf | Is | Contains | RegexMatch => 8,
            Eq | Ne => 7,
            BitAnd => 6,
            BitXor => 5,
            BitOr => 4,
            And => 3,
            Or => 2,
        }
    }

    pub fn is_right_assoc(self) -> bool {
        self == Operator::Pow
    }

    /// `&&` and `||`, folded in the second pass.
    pub fn is_logical(self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }

    pub fn is_comparison(self) -> bool {
        use Operator::*;
        matches!(
            self,
            Lt | Gt | Le | Ge | Eq | Ne | InstanceOf | Is | Contains | RegexMatch
        )
    }

    /// Word operators written as identifiers.
    pub fn from_word(word: &str) -> Option<Operator> {
        match word {
            "instanceof" => Some(Operator::InstanceOf),
            "is" => Some(Operator::Is),
            "contains" => Some(Operator::Contains),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        use Operator::*;
        match self {
            Pow => "**",
            Mul => "*",
            Div => "/",
            Rem => "%",
            Add => "+",
            Sub => "-",
            Shl => "<<",
            Shr => ">>",
            UShr => ">>>",
            Lt => "<",
            Gt => ">",
            Le => "<=",
            Ge => ">=",
            InstanceOf => "instanceof",
            Is => "is",
            Contains => "contains",
            RegexMatch => "~=",
            Eq => "==",
            Ne => "!=",
            BitAnd => "&",
            BitXor => "^",
            BitOr => "|",
            And => "&&",
            Or => "||",
        }
    }

    /// Static result type for operands of the given types.
    pub fn result_type(self, lhs: &Type, rhs: &Type) -> Type {
        use Operator::*;
        match self {
            _ if self.is_comparison() || self.is_logical() => Type::Bool,
            Add if *lhs == Type::Str || *rhs == Type::Str => Type::Str,
            Add | Sub | Mul | Div | Rem => lhs.promote(rhs),
            Pow => match (lhs, rhs) {
                (Type::Int, Type::Int) => Type::Any,
                _ if lhs.is_numeric() && rhs.is_numeric() => Type::Float,
                _ => Type::Any,
            },
            Shl | Shr | UShr => Type::Int,
            BitAnd | BitXor | BitOr => match (lhs, rhs) {
                (Type::Bool, Type::Bool) => Type::Bool,
                (Type::Int, Type::Int) => Type::Int,
                _ => Type::Any,
            },
            _ => Type::Any,
        }
    }

    /// Applies a non-short-circuit binary operator.
    ///
    /// `&&`, `||` and `~=` are evaluated by their own nodes and rejected here.
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Result<Value, EvalErrorKind> {
        use Operator::*;
        let invalid = || EvalErrorKind::invalid_op(self.symbol(), lhs.type_of(), rhs.type_of());
        match self {
            Eq => Ok(Value::Bool(lhs.loose_eq(rhs))),
            Ne => Ok(Value::Bool(!lhs.loose_eq(rhs))),
            Lt | Gt | Le | Ge => {
                let ord = lhs.compare(rhs).ok_or_else(invalid)?;
                Ok(Value::Bool(match self {
                    Lt => ord == Ordering::Less,
                    Gt => ord == Ordering::Greater,
                    Le => ord != Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            Add => add(lhs, rhs).ok_or_else(invalid)?,
            Sub | Mul | Div | Rem => arithmetic(self, lhs, rhs).ok_or_else(invalid)?,
            Pow => power(lhs, rhs).ok_or_else(invalid)?,
            Shl | Shr | UShr => {
                let (a, b) = int_pair(lhs, rhs).ok_or_else(invalid)?;
                let n = (b & 63) as u32;
                Ok(Value::Int(match self {
                    Shl => a.wrapping_shl(n),
                    Shr => a >> n,
                    _ => ((a as u64) >> n) as i64,
                }))
            }
            BitAnd | BitXor | BitOr => match (lhs, rhs) {
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(match self {
                    BitAnd => a & b,
                    BitXor => a ^ b,
                    _ => a | b,
                })),
                _ => {
                    let (a, b) = int_pair(lhs, rhs).ok_or_else(invalid)?;
                    Ok(Value::Int(match self {
                        BitAnd => a & b,
                        BitXor => a ^ b,
                        _ => a | b,
                    }))
                }
            },
            InstanceOf | Is => match rhs {
                Value::Class(class) => Ok(Value::Bool(instance_of(lhs, class.name()))),
                _ => Err(invalid()),
            },
            Contains => contains(lhs, rhs).map(Value::Bool).ok_or_else(invalid),
            RegexMatch | And | Or => Err(invalid()),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub fn apply(self, operand: &Value) -> Result<Value, EvalErrorKind> {
        match (self, operand) {
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, Value::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| EvalErrorKind::Arithmetic("integer overflow".into())),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (op, v) => Err(EvalErrorKind::invalid_op(
                if op == UnaryOp::Not { "!" } else { "-" },
                v.type_of(),
                "nothing",
            )),
        }
    }
}

fn overflow() -> EvalErrorKind {
    EvalErrorKind::Arithmetic("integer overflow".into())
}

/// Char operands take part in integer arithmetic by code point.
fn as_int_operand(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Char(c) => Some(*c as i64),
        _ => None,
    }
}

fn int_pair(lhs: &Value, rhs: &Value) -> Option<(i64, i64)> {
    Some((as_int_operand(lhs)?, as_int_operand(rhs)?))
}

fn add(lhs: &Value, rhs: &Value) -> Option<Result<Value, EvalErrorKind>> {
    match (lhs, rhs) {
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            Some(Ok(Value::from(format!("{}{}", lhs, rhs))))
        }
        (Value::Char(a), Value::Char(b)) => Some(Ok(Value::from(format!("{}{}", a, b)))),
        _ => arithmetic(Operator::Add, lhs, rhs),
    }
}

fn arithmetic(op: Operator, lhs: &Value, rhs: &Value) -> Option<Result<Value, EvalErrorKind>> {
    if let Some((a, b)) = int_pair(lhs, rhs) {
        let out = match op {
            Operator::Add => a.checked_add(b).ok_or_else(overflow),
            Operator::Sub => a.checked_sub(b).ok_or_else(overflow),
            Operator::Mul => a.checked_mul(b).ok_or_else(overflow),
            Operator::Div if b == 0 => Err(EvalErrorKind::Arithmetic("division by zero".into())),
            Operator::Div => a.checked_div(b).ok_or_else(overflow),
            Operator::Rem if b == 0 => Err(EvalErrorKind::Arithmetic("division by zero".into())),
            _ => a.checked_rem(b).ok_or_else(overflow),
        };
        return Some(out.map(Value::Int));
    }
    let (a, b) = (lhs.as_float()?, rhs.as_float()?);
    let out = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mul => a * b,
        Operator::Div => a / b,
        _ => a % b,
    };
    Some(Ok(Value::Float(out)))
}

fn power(lhs: &Value, rhs: &Value) -> Option<Result<Value, EvalErrorKind>> {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        if let Ok(exp) = u32::try_from(*b) {
            return Some(a.checked_pow(exp).map(Value::Int).ok_or_else(overflow));
        }
    }
    Some(Ok(Value::Float(lhs.as_float()?.powf(rhs.as_float()?))))
}

fn contains(lhs: &Value, rhs: &Value) -> Option<bool> {
    match lhs {
        Value::Str(s) => Some(s.contains(rhs.to_string().as_str())),
        Value::List(l) => Some(l.read().iter().any(|v| v.loose_eq(rhs))),
        Value::Array(a) => Some(a.read().iter().any(|v| v.loose_eq(rhs))),
        Value::Map(m) => Some(m.read().contains_key(&map_key(rhs))),
        Value::Null => Some(false),
        _ => None,
    }
}

/// Whether `value` is an instance of the class called `class_name`.
pub fn instance_of(value: &Value, class_name: &str) -> bool {
    if value.is_null() {
        return false;
    }
    let ty = value.type_of();
    if class_name == "Object" || ty.to_string() == class_name {
        return true;
    }
    match Type::from_name(class_name) {
        Some(Type::Any) => true,
        Some(expected) => expected == ty,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(Operator::Add.apply(&Value::Int(2), &Value::Int(3)), Ok(Value::Int(5)));
        assert_eq!(Operator::Div.apply(&Value::Int(7), &Value::Int(2)), Ok(Value::Int(3)));
        assert_eq!(Operator::Rem.apply(&Value::Int(-7), &Value::Int(2)), Ok(Value::Int(-1)));
        assert_eq!(Operator::Pow.apply(&Value::Int(2), &Value::Int(10)), Ok(Value::Int(1024)));
        assert!(matches!(
            Operator::Div.apply(&Value::Int(1), &Value::Int(0)),
            Err(EvalErrorKind::Arithmetic(_))
        ));
        assert!(matches!(
            Operator::Mul.apply(&Value::Int(i64::MAX), &Value::Int(2)),
            Err(EvalErrorKind::Arithmetic(_))
        ));
    }

    #[test]
    fn test_mixed_and_string_operands() {
        assert_eq!(Operator::Add.apply(&Value::Int(1), &Value::Float(0.5)), Ok(Value::Float(1.5)));
        assert_eq!(
            Operator::Add.apply(&Value::from("n="), &Value::Int(3)),
            Ok(Value::from("n=3"))
        );
        assert_eq!(Operator::Pow.apply(&Value::Int(2), &Value::Int(-1)), Ok(Value::Float(0.5)));
        assert!(matches!(
            Operator::Sub.apply(&Value::from("a"), &Value::Int(1)),
            Err(EvalErrorKind::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_shifts_and_bits() {
        assert_eq!(Operator::Shl.apply(&Value::Int(1), &Value::Int(4)), Ok(Value::Int(16)));
        assert_eq!(Operator::Shr.apply(&Value::Int(-16), &Value::Int(2)), Ok(Value::Int(-4)));
        assert_eq!(
            Operator::UShr.apply(&Value::Int(-1), &Value::Int(60)),
            Ok(Value::Int(15))
        );
        assert_eq!(
            Operator::BitXor.apply(&Value::Bool(true), &Value::Bool(true)),
            Ok(Value::Bool(false))
        );
    }

    #[test]
    fn test_contains_and_instance_of() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(Operator::Contains.apply(&list, &Value::Float(2.0)), Ok(Value::Bool(true)));
        assert!(instance_of(&Value::from("x"), "String"));
        assert!(instance_of(&Value::Int(1), "Integer"));
        assert!(!instance_of(&Value::Null, "Object"));
    }

    #[test]
    fn test_precedence_table() {
        assert!(Operator::Pow.precedence() > Operator::Mul.precedence());
        assert!(Operator::Mul.precedence() > Operator::Add.precedence());
        assert!(Operator::Eq.precedence() > Operator::BitAnd.precedence());
        assert!(Operator::And.precedence() > Operator::Or.precedence());
        assert!(Operator::Pow.is_right_assoc());
    }
}
