//! Numeric classification, promotion (integer ⊂ decimal ⊂ float ⊂ double) and arithmetic.
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::XdmAtomicValue;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

/// Numeric value carrying its promoted representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumKind {
    Int(i64),
    Dec(Decimal),
    Float(f32),
    Double(f64),
}

/// Pure numeric type tag, used by aggregates that track the promoted result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NumericKind {
    Integer,
    Decimal,
    Float,
    Double,
}

impl NumericKind {
    pub fn promote(self, other: NumericKind) -> NumericKind {
        self.max(other)
    }
}

impl NumKind {
    pub fn kind(self) -> NumericKind {
        match self {
            NumKind::Int(_) => NumericKind::Integer,
            NumKind::Dec(_) => NumericKind::Decimal,
            NumKind::Float(_) => NumericKind::Float,
            NumKind::Double(_) => NumericKind::Double,
        }
    }

    pub fn to_f64(self) -> f64 {
        match self {
            NumKind::Int(i) => i as f64,
            NumKind::Dec(d) => d.to_f64().unwrap_or(f64::NAN),
            NumKind::Float(f) => f64::from(f),
            NumKind::Double(d) => d,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn to_f32(self) -> f32 {
        match self {
            NumKind::Int(i) => i as f32,
            NumKind::Dec(d) => d.to_f32().unwrap_or(f32::NAN),
            NumKind::Float(f) => f,
            NumKind::Double(d) => d as f32,
        }
    }

    pub fn to_decimal(self) -> Option<Decimal> {
        match self {
            NumKind::Int(i) => Some(Decimal::from(i)),
            NumKind::Dec(d) => Some(d),
            NumKind::Float(f) => Decimal::from_f32(f),
            NumKind::Double(d) => Decimal::from_f64(d),
        }
    }

    /// Convert to the given (wider or equal) numeric kind.
    pub fn promote_to(self, kind: NumericKind) -> NumKind {
        match kind {
            NumericKind::Integer => self,
            NumericKind::Decimal => match self.to_decimal() {
                Some(d) => NumKind::Dec(d),
                None => NumKind::Double(self.to_f64()),
            },
            NumericKind::Float => NumKind::Float(self.to_f32()),
            NumericKind::Double => NumKind::Double(self.to_f64()),
        }
    }

    pub fn into_atomic(self) -> XdmAtomicValue {
        match self {
            NumKind::Int(i) => XdmAtomicValue::Integer(i),
            NumKind::Dec(d) => XdmAtomicValue::Decimal(d),
            NumKind::Float(f) => XdmAtomicValue::Float(f),
            NumKind::Double(d) => XdmAtomicValue::Double(d),
        }
    }

    pub fn is_nan(self) -> bool {
        match self {
            NumKind::Float(f) => f.is_nan(),
            NumKind::Double(d) => d.is_nan(),
            _ => false,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            NumKind::Int(i) => i == 0,
            NumKind::Dec(d) => d.is_zero(),
            NumKind::Float(f) => f == 0.0,
            NumKind::Double(d) => d == 0.0,
        }
    }

    pub fn partial_cmp(self, other: NumKind) -> Option<core::cmp::Ordering> {
        match promote_pair(self, other) {
            (NumKind::Int(a), NumKind::Int(b)) => Some(a.cmp(&b)),
            (NumKind::Dec(a), NumKind::Dec(b)) => Some(a.cmp(&b)),
            (NumKind::Float(a), NumKind::Float(b)) => a.partial_cmp(&b),
            (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
        }
    }
}

/// Classify an atomic value as numeric. Derived integer types count as integers.
pub fn classify(v: &XdmAtomicValue) -> Option<NumKind> {
    match v {
        XdmAtomicValue::Integer(i) | XdmAtomicValue::DerivedInteger { value: i, .. } => {
            Some(NumKind::Int(*i))
        }
        XdmAtomicValue::Decimal(d) => Some(NumKind::Dec(*d)),
        XdmAtomicValue::Float(f) => Some(NumKind::Float(*f)),
        XdmAtomicValue::Double(d) => Some(NumKind::Double(*d)),
        _ => None,
    }
}

/// Promote both operands to their common numeric type.
pub fn promote_pair(a: NumKind, b: NumKind) -> (NumKind, NumKind) {
    let target = a.kind().promote(b.kind());
    (a.promote_to(target), b.promote_to(target))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "div",
            ArithOp::IDiv => "idiv",
            ArithOp::Mod => "mod",
        }
    }
}

fn overflow() -> Error {
    Error::from_code(ErrorCode::FOAR0002, "numeric overflow")
}

fn div_by_zero() -> Error {
    Error::from_code(ErrorCode::FOAR0001, "division by zero")
}

/// Apply an arithmetic operator to two numerics after promotion.
pub fn arith(op: ArithOp, a: NumKind, b: NumKind) -> Result<NumKind, Error> {
    // integer div integer yields a decimal
    let (a, b) = match (op, a, b) {
        (ArithOp::Div, NumKind::Int(x), NumKind::Int(y)) => {
            (NumKind::Dec(Decimal::from(x)), NumKind::Dec(Decimal::from(y)))
        }
        _ => promote_pair(a, b),
    };
    match (a, b) {
        (NumKind::Int(x), NumKind::Int(y)) => {
            let r = match op {
                ArithOp::Add => x.checked_add(y),
                ArithOp::Sub => x.checked_sub(y),
                ArithOp::Mul => x.checked_mul(y),
                // rewritten to decimal division above
                ArithOp::Div => None,
                ArithOp::IDiv | ArithOp::Mod if y == 0 => return Err(div_by_zero()),
                ArithOp::IDiv => x.checked_div(y),
                ArithOp::Mod => x.checked_rem(y),
            };
            r.map(NumKind::Int).ok_or_else(overflow)
        }
        (NumKind::Dec(x), NumKind::Dec(y)) => {
            if matches!(op, ArithOp::Div | ArithOp::IDiv | ArithOp::Mod) && y.is_zero() {
                return Err(div_by_zero());
            }
            match op {
                ArithOp::Add => x.checked_add(y).map(NumKind::Dec),
                ArithOp::Sub => x.checked_sub(y).map(NumKind::Dec),
                ArithOp::Mul => x.checked_mul(y).map(NumKind::Dec),
                ArithOp::Div => x.checked_div(y).map(|d| NumKind::Dec(d.normalize())),
                ArithOp::IDiv => x
                    .checked_div(y)
                    .and_then(|q| q.trunc().to_i64())
                    .map(NumKind::Int),
                ArithOp::Mod => x.checked_rem(y).map(NumKind::Dec),
            }
            .ok_or_else(overflow)
        }
        (NumKind::Float(x), NumKind::Float(y)) => match op {
            ArithOp::IDiv => float_idiv(f64::from(x), f64::from(y)),
            _ => Ok(NumKind::Float(float_op(op, x, y))),
        },
        (x, y) => {
            let (x, y) = (x.to_f64(), y.to_f64());
            match op {
                ArithOp::IDiv => float_idiv(x, y),
                _ => Ok(NumKind::Double(float_op(op, x, y))),
            }
        }
    }
}

fn float_op<F>(op: ArithOp, x: F, y: F) -> F
where
    F: core::ops::Add<Output = F>
        + core::ops::Sub<Output = F>
        + core::ops::Mul<Output = F>
        + core::ops::Div<Output = F>
        + core::ops::Rem<Output = F>,
{
    match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div | ArithOp::IDiv => x / y,
        ArithOp::Mod => x % y,
    }
}

fn float_idiv(x: f64, y: f64) -> Result<NumKind, Error> {
    if y == 0.0 {
        return Err(div_by_zero());
    }
    if x.is_nan() || y.is_nan() || x.is_infinite() {
        return Err(Error::from_code(
            ErrorCode::FOAR0002,
            "integer division of NaN or infinity",
        ));
    }
    let q = (x / y).trunc();
    if q.abs() >= 9.223_372_036_854_775_807e18 {
        return Err(overflow());
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(NumKind::Int(q as i64))
}

pub fn negate(a: NumKind) -> Result<NumKind, Error> {
    Ok(match a {
        NumKind::Int(i) => NumKind::Int(i.checked_neg().ok_or_else(overflow)?),
        NumKind::Dec(d) => NumKind::Dec(-d),
        NumKind::Float(f) => NumKind::Float(-f),
        NumKind::Double(d) => NumKind::Double(-d),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_is_decimal() {
        let r = arith(ArithOp::Div, NumKind::Int(7), NumKind::Int(2)).unwrap();
        assert_eq!(r, NumKind::Dec(Decimal::new(35, 1)));
    }

    #[test]
    fn integer_overflow_is_reported() {
        let e = arith(ArithOp::Mul, NumKind::Int(i64::MAX), NumKind::Int(2)).unwrap_err();
        assert_eq!(e.code_enum(), ErrorCode::FOAR0002);
    }

    #[test]
    fn double_division_by_zero_is_infinite() {
        let r = arith(ArithOp::Div, NumKind::Double(1.0), NumKind::Int(0)).unwrap();
        assert_eq!(r, NumKind::Double(f64::INFINITY));
    }

    #[test]
    fn promotion_ladder() {
        let (a, b) = promote_pair(NumKind::Int(1), NumKind::Float(2.5));
        assert_eq!((a, b), (NumKind::Float(1.0), NumKind::Float(2.5)));
        let (a, _) = promote_pair(NumKind::Dec(Decimal::ONE), NumKind::Double(0.5));
        assert_eq!(a, NumKind::Double(1.0));
    }
}
