//! Native operations: operators, text methods, basis conversions.
//!
//! Every function here checks the values it is handed and answers a value
//! of the wrong type with a `TypeMismatch` naming the expected type and
//! carrying the value it actually got.

use quill_analysis::basis::{NativeConversion, TextMethod};
use quill_analysis::{Type, UnknownReason};
use quill_types::ast::{BinaryOperator, UnaryOperator};
use quill_types::Unit;

use crate::error::ExceptionKind;
use crate::value::{Callable, Value};

pub type NativeResult = Result<Value, ExceptionKind>;

/// Longest text, in bytes, a text method may build.
pub const MAX_TEXT_BYTES: usize = 1 << 24;

fn measurement(value: &Value) -> Result<(f64, &Unit), ExceptionKind> {
    match value {
        Value::Measurement { number, unit } => Ok((*number, unit)),
        other => Err(ExceptionKind::type_mismatch(Type::Measurement(None), other)),
    }
}

fn boolean(value: &Value) -> Result<bool, ExceptionKind> {
    value
        .as_boolean()
        .ok_or_else(|| ExceptionKind::type_mismatch(Type::Boolean, value))
}

fn text(value: &Value) -> Result<&str, ExceptionKind> {
    value
        .as_text()
        .ok_or_else(|| ExceptionKind::type_mismatch(Type::Text, value))
}

// ══════════════════════════════════════════════════════════════════════════════
// Operators
// ══════════════════════════════════════════════════════════════════════════════

pub fn binary(operator: BinaryOperator, left: &Value, right: &Value) -> NativeResult {
    use BinaryOperator::*;
    match operator {
        Equal => Ok(Value::Boolean(left.is_equal_to(right))),
        NotEqual => Ok(Value::Boolean(!left.is_equal_to(right))),
        And => Ok(Value::Boolean(boolean(left)? && boolean(right)?)),
        Or => Ok(Value::Boolean(boolean(left)? || boolean(right)?)),
        Multiply | Divide => {
            let (a, ua) = measurement(left)?;
            let (b, ub) = measurement(right)?;
            Ok(if operator == Multiply {
                Value::measurement(a * b, ua.product(ub))
            } else {
                Value::measurement(a / b, ua.quotient(ub))
            })
        }
        Add | Subtract | Remainder | Less | Greater | LessOrEqual | GreaterOrEqual => {
            let (a, ua) = measurement(left)?;
            let (b, ub) = measurement(right)?;
            if ua != ub {
                return Err(ExceptionKind::type_mismatch(
                    Type::measurement(ua.clone()),
                    right,
                ));
            }
            let unit = ua.clone();
            Ok(match operator {
                Add => Value::measurement(a + b, unit),
                Subtract => Value::measurement(a - b, unit),
                Remainder => Value::measurement(a % b, unit),
                Less => Value::Boolean(a < b),
                Greater => Value::Boolean(a > b),
                LessOrEqual => Value::Boolean(a <= b),
                _ => Value::Boolean(a >= b),
            })
        }
    }
}

pub fn unary(operator: UnaryOperator, operand: &Value) -> NativeResult {
    match operator {
        UnaryOperator::Negate => {
            let (n, unit) = measurement(operand)?;
            Ok(Value::measurement(-n, unit.clone()))
        }
        UnaryOperator::Not => Ok(Value::Boolean(!boolean(operand)?)),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Text methods
// ══════════════════════════════════════════════════════════════════════════════

/// Call `method` on `receiver` with `inputs`.
pub fn text_method(method: TextMethod, receiver: &str, inputs: &[Value]) -> NativeResult {
    let input = |i: usize| nth_input(method, inputs, i);
    match method {
        TextMethod::Length => Ok(Value::number(receiver.chars().count() as f64)),
        TextMethod::Repeat => {
            let (count, _) = measurement(input(0)?)?;
            let times = if count.is_finite() && count > 0.0 {
                count.floor() as usize
            } else {
                0
            };
            let too_long = || ExceptionKind::TextTooLong {
                limit: MAX_TEXT_BYTES,
            };
            let length = receiver.len().checked_mul(times).ok_or_else(too_long)?;
            if length > MAX_TEXT_BYTES {
                return Err(too_long());
            }
            Ok(Value::text(receiver.repeat(times)))
        }
        TextMethod::Equals => Ok(Value::Boolean(receiver == text(input(0)?)?)),
        TextMethod::NotEquals => Ok(Value::Boolean(receiver != text(input(0)?)?)),
        TextMethod::Segment => {
            let delimiter = text(input(0)?)?;
            let parts = if delimiter.is_empty() {
                receiver.chars().map(|c| Value::text(c.to_string())).collect()
            } else {
                receiver.split(delimiter).map(Value::text).collect()
            };
            Ok(Value::List(parts))
        }
        TextMethod::Combine => Ok(Value::text(format!("{receiver}{}", text(input(0)?)?))),
        TextMethod::Has => Ok(Value::Boolean(receiver.contains(text(input(0)?)?))),
    }
}

fn nth_input(method: TextMethod, inputs: &[Value], i: usize) -> Result<&Value, ExceptionKind> {
    inputs.get(i).ok_or_else(|| ExceptionKind::ValueRequired {
        name: method
            .signature()
            .inputs
            .get(i)
            .map(|input| input.name.to_string())
            .unwrap_or_default(),
    })
}

/// Read a text method off `subject`.
pub fn text_property(method: TextMethod, subject: &Value) -> NativeResult {
    Ok(Value::function(Callable::Text {
        method,
        receiver: text(subject)?.to_string(),
    }))
}

// ══════════════════════════════════════════════════════════════════════════════
// Conversions
// ══════════════════════════════════════════════════════════════════════════════

pub fn convert(conversion: NativeConversion, value: &Value) -> NativeResult {
    match conversion {
        NativeConversion::TextToList => Ok(Value::List(
            text(value)?
                .chars()
                .map(|c| Value::text(c.to_string()))
                .collect(),
        )),
        NativeConversion::TextToNumber => Ok(text(value)?
            .trim()
            .parse::<f64>()
            .map(Value::number)
            .unwrap_or(Value::None)),
        NativeConversion::NumberToText => {
            let (n, unit) = measurement(value)?;
            Ok(Value::text(format!("{n}{unit}")))
        }
        NativeConversion::BooleanToText => Ok(Value::text(if boolean(value)? { "⊤" } else { "⊥" })),
        NativeConversion::ListToSet => match value {
            Value::List(items) => Ok(Value::set(items.clone())),
            other => Err(ExceptionKind::type_mismatch(
                Type::list(Type::Unknown(UnknownReason::Unsupported)),
                other,
            )),
        },
        NativeConversion::SetToList => match value {
            Value::Set(items) => Ok(Value::List(items.clone())),
            other => Err(ExceptionKind::type_mismatch(
                Type::set(Type::Unknown(UnknownReason::Unsupported)),
                other,
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(x: f64) -> Value {
        Value::number(x)
    }

    fn list(items: &[f64]) -> Value {
        Value::List(items.iter().map(|x| n(*x)).collect())
    }

    // ── Operators ────────────────────────────────────────────────────────

    #[test]
    fn list_equality_scenarios() {
        use BinaryOperator::*;
        assert_eq!(binary(Equal, &list(&[]), &list(&[])), Ok(Value::Boolean(true)));
        assert_eq!(binary(Equal, &list(&[1.0]), &list(&[1.0])), Ok(Value::Boolean(true)));
        assert_eq!(
            binary(Equal, &list(&[1.0]), &list(&[1.0, 2.0])),
            Ok(Value::Boolean(false))
        );
        assert_eq!(
            binary(NotEqual, &list(&[1.0, 2.0]), &list(&[1.0])),
            Ok(Value::Boolean(true))
        );
    }

    #[test]
    fn arithmetic_keeps_units() {
        let a = Value::measurement(3.0, Unit::of("m"));
        let b = Value::measurement(2.0, Unit::of("s"));
        assert_eq!(
            binary(BinaryOperator::Divide, &a, &b),
            Ok(Value::measurement(1.5, Unit::from_exponents([("m", 1), ("s", -1)])))
        );
        assert_eq!(
            binary(BinaryOperator::Add, &a, &a),
            Ok(Value::measurement(6.0, Unit::of("m")))
        );
    }

    #[test]
    fn mismatched_units_are_exceptions() {
        let a = Value::measurement(3.0, Unit::of("m"));
        let b = Value::measurement(2.0, Unit::of("s"));
        let err = binary(BinaryOperator::Add, &a, &b).unwrap_err();
        assert_eq!(err, ExceptionKind::type_mismatch(Type::measurement(Unit::of("m")), &b));
    }

    #[test]
    fn logic_needs_booleans() {
        assert_eq!(
            binary(BinaryOperator::And, &Value::Boolean(true), &n(1.0)),
            Err(ExceptionKind::type_mismatch(Type::Boolean, &n(1.0)))
        );
        assert_eq!(unary(UnaryOperator::Not, &Value::Boolean(true)), Ok(Value::Boolean(false)));
        assert_eq!(unary(UnaryOperator::Negate, &n(2.0)), Ok(n(-2.0)));
    }

    // ── Text ─────────────────────────────────────────────────────────────

    #[test]
    fn text_methods() {
        assert_eq!(text_method(TextMethod::Length, "héllo", &[]), Ok(n(5.0)));
        assert_eq!(
            text_method(TextMethod::Repeat, "ab", &[n(3.0)]),
            Ok(Value::text("ababab"))
        );
        assert_eq!(
            text_method(TextMethod::Segment, "a,b", &[Value::text(",")]),
            Ok(Value::List(vec![Value::text("a"), Value::text("b")]))
        );
        assert_eq!(
            text_method(TextMethod::Has, "kitten", &[Value::text("kit")]),
            Ok(Value::Boolean(true))
        );
    }

    #[test]
    fn text_method_on_non_text_is_type_exception() {
        assert_eq!(
            text_property(TextMethod::Length, &n(1.0)),
            Err(ExceptionKind::TypeMismatch {
                expected: Type::Text,
                received: n(1.0),
            })
        );
        assert_eq!(
            text_method(TextMethod::Combine, "a", &[n(1.0)]),
            Err(ExceptionKind::type_mismatch(Type::Text, &n(1.0)))
        );
    }

    #[test]
    fn repeat_is_bounded() {
        let too_long = Err(ExceptionKind::TextTooLong {
            limit: MAX_TEXT_BYTES,
        });
        assert_eq!(text_method(TextMethod::Repeat, "ab", &[n(1e20)]), too_long);
        assert_eq!(text_method(TextMethod::Repeat, "ab", &[n(f64::MAX)]), too_long);
        assert_eq!(
            text_method(TextMethod::Repeat, "", &[n(1e20)]),
            Ok(Value::text(""))
        );
        assert_eq!(
            text_method(TextMethod::Repeat, "ab", &[n(f64::INFINITY)]),
            Ok(Value::text(""))
        );
    }

    #[test]
    fn missing_text_input_is_value_required() {
        assert_eq!(
            text_method(TextMethod::Repeat, "a", &[]),
            Err(ExceptionKind::ValueRequired { name: "count".into() })
        );
    }

    // ── Conversions ──────────────────────────────────────────────────────

    #[test]
    fn conversions() {
        assert_eq!(
            convert(NativeConversion::TextToList, &Value::text("ab")),
            Ok(Value::List(vec![Value::text("a"), Value::text("b")]))
        );
        assert_eq!(convert(NativeConversion::TextToNumber, &Value::text("12")), Ok(n(12.0)));
        assert_eq!(convert(NativeConversion::TextToNumber, &Value::text("x")), Ok(Value::None));
        assert_eq!(convert(NativeConversion::NumberToText, &n(2.5)), Ok(Value::text("2.5")));
        assert_eq!(
            convert(NativeConversion::ListToSet, &list(&[1.0, 1.0, 2.0])),
            Ok(Value::set(vec![n(1.0), n(2.0)]))
        );
    }
}
