//! Integer overflow (CWE-190) and underflow (CWE-191) model.
//!
//! Values are carried as `i128` so every sink result is computed exactly and
//! then compared against the bounds of the case's data type.

use serde::{Deserialize, Serialize};

use super::{OracleVerdict, PathCheck, PathKind};
use crate::naming::{CaseName, DataType, SinkOp, SourceClass};

/// Evenly spaced samples taken across a type's range, on top of the values
/// around its bounds and zero.
const SPREAD_SAMPLES: i128 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntType {
    pub bits: u32,
    pub signed: bool,
}

impl IntType {
    /// LP64 widths. Floating point and wide character types have no model.
    pub fn of(data_type: DataType) -> Option<IntType> {
        let (bits, signed) = match data_type {
            DataType::Char => (8, true),
            DataType::UnsignedChar => (8, false),
            DataType::Short => (16, true),
            DataType::Int => (32, true),
            DataType::UnsignedInt => (32, false),
            DataType::Int64T | DataType::Long | DataType::LongLong => (64, true),
            DataType::SizeT => (64, false),
            DataType::WcharT | DataType::Float | DataType::Double => return None,
        };
        Some(IntType { bits, signed })
    }

    pub fn min(&self) -> i128 {
        if self.signed {
            -(1i128 << (self.bits - 1))
        } else {
            0
        }
    }

    pub fn max(&self) -> i128 {
        if self.signed {
            (1i128 << (self.bits - 1)) - 1
        } else {
            (1i128 << self.bits) - 1
        }
    }

    pub fn contains(&self, value: i128) -> bool {
        (self.min()..=self.max()).contains(&value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Overflow,
    Underflow,
}

/// Values a source can hand to the sink.
pub trait Source {
    fn values(&self, ty: IntType) -> Vec<i128>;
}

/// The attacker-influenced source of the bad path and of B2G.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BadSource {
    pub class: SourceClass,
    pub token: Option<String>,
}

impl Source for BadSource {
    fn values(&self, ty: IntType) -> Vec<i128> {
        match (self.class, self.token.as_deref()) {
            (SourceClass::Boundary, Some("max")) => vec![ty.max()],
            (SourceClass::Boundary, Some("min")) => vec![ty.min()],
            _ => spread(ty),
        }
    }
}

/// The hardcoded small value of G2B: 2, or -2 for signed underflow cases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GoodSource {
    pub direction: Direction,
}

impl Source for GoodSource {
    fn values(&self, ty: IntType) -> Vec<i128> {
        match self.direction {
            Direction::Underflow if ty.signed => vec![-2],
            _ => vec![2],
        }
    }
}

fn spread(ty: IntType) -> Vec<i128> {
    let (min, max) = (ty.min(), ty.max());
    let mut values = vec![min, min + 1, -1, 0, 1, max - 1, max];
    let step = (max - min) / SPREAD_SAMPLES;
    values.extend((0..=SPREAD_SAMPLES).map(|i| min + i * step));
    values.retain(|v| ty.contains(*v));
    values.sort_unstable();
    values.dedup();
    values
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkOutcome {
    Completed(i128),
    Overflowed { exact: i128 },
    Underflowed { exact: i128 },
    /// The guard refused the value.
    Rejected,
    /// The sink's own sign test kept the arithmetic from running.
    Skipped,
}

impl SinkOutcome {
    pub fn is_flaw(&self) -> bool {
        matches!(self, SinkOutcome::Overflowed { .. } | SinkOutcome::Underflowed { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sink {
    pub op: SinkOp,
    pub ty: IntType,
    pub direction: Direction,
}

impl Sink {
    fn isqrt(n: i128) -> i128 {
        if n < 2 {
            return n.max(0);
        }
        let mut x = (n as f64).sqrt() as i128;
        while x * x > n {
            x -= 1;
        }
        while (x + 1) * (x + 1) <= n {
            x += 1;
        }
        x
    }

    /// Whether the sink's arithmetic runs at all for `data`. Multiplication
    /// sinks only double values of the sign that moves toward the bound.
    fn precondition(&self, data: i128) -> bool {
        match (self.op, self.direction) {
            (SinkOp::Multiply, Direction::Overflow) => data > 0,
            (SinkOp::Multiply, Direction::Underflow) => data < 0,
            _ => true,
        }
    }

    /// The range check of the good sink.
    fn guard(&self, data: i128) -> bool {
        let ty = self.ty;
        match self.op {
            SinkOp::Preinc | SinkOp::Postinc | SinkOp::Add => data < ty.max(),
            SinkOp::Predec | SinkOp::Postdec | SinkOp::Sub => data > ty.min(),
            SinkOp::Multiply => match self.direction {
                Direction::Overflow => data < ty.max() / 2,
                Direction::Underflow => data > ty.min() / 2,
            },
            SinkOp::Square => {
                let root = Self::isqrt(ty.max());
                data.abs() < root
            }
        }
    }

    fn exact(&self, data: i128) -> i128 {
        match self.op {
            SinkOp::Preinc | SinkOp::Postinc | SinkOp::Add => data + 1,
            SinkOp::Predec | SinkOp::Postdec | SinkOp::Sub => data - 1,
            SinkOp::Multiply => data * 2,
            SinkOp::Square => data.checked_mul(data).unwrap_or(i128::MAX),
        }
    }

    pub fn evaluate(&self, data: i128, guarded: bool) -> SinkOutcome {
        if !self.precondition(data) {
            return SinkOutcome::Skipped;
        }
        if guarded && !self.guard(data) {
            return SinkOutcome::Rejected;
        }
        let exact = self.exact(data);
        if exact > self.ty.max() {
            SinkOutcome::Overflowed { exact }
        } else if exact < self.ty.min() {
            SinkOutcome::Underflowed { exact }
        } else {
            SinkOutcome::Completed(exact)
        }
    }
}

fn check(path: PathKind, source: &dyn Source, sink: &Sink, guarded: bool) -> PathCheck {
    let mut check = PathCheck::new(path);
    for data in source.values(sink.ty) {
        let outcome = sink.evaluate(data, guarded);
        check.record(outcome.is_flaw(), || format!("{data} -> {outcome:?}"));
    }
    check
}

pub fn evaluate(name: &CaseName, paths: &[PathKind]) -> OracleVerdict {
    let direction = match name.cwe.0 {
        190 => Direction::Overflow,
        191 => Direction::Underflow,
        other => return OracleVerdict::Unsupported(format!("CWE-{other} is not an integer case")),
    };
    let Some(ty) = IntType::of(name.data_type) else {
        return OracleVerdict::Unsupported(format!("data type {} is not modeled", name.data_type));
    };
    let Some(op) = name.sink else {
        return OracleVerdict::Unsupported(format!("{} names no sink operation", name.case_id()));
    };

    if !ty.signed && direction == Direction::Underflow && op == SinkOp::Multiply {
        return OracleVerdict::Unsupported("doubling an unsigned value cannot underflow".to_string());
    }

    let sink = Sink { op, ty, direction };
    let bad = BadSource {
        class: name.source_class(),
        token: name.source.clone(),
    };
    let good = GoodSource { direction };

    let checks = paths
        .iter()
        .map(|path| match path {
            PathKind::Bad => check(*path, &bad, &sink, false),
            PathKind::GoodG2B | PathKind::Good => check(*path, &good, &sink, false),
            PathKind::GoodB2G => check(*path, &bad, &sink, true),
        })
        .collect();
    OracleVerdict::Checked(checks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int() -> IntType {
        IntType::of(DataType::Int).unwrap()
    }

    #[test]
    fn bounds_follow_width_and_sign() {
        assert_eq!(IntType::of(DataType::Char).unwrap().min(), -128);
        assert_eq!(IntType::of(DataType::UnsignedChar).unwrap().max(), 255);
        assert_eq!(int().max(), i32::MAX as i128);
        assert_eq!(IntType::of(DataType::Int64T).unwrap().min(), i64::MIN as i128);
        assert_eq!(IntType::of(DataType::SizeT).unwrap().max(), u64::MAX as i128);
        assert!(IntType::of(DataType::Double).is_none());
    }

    #[test]
    fn increment_of_max_overflows_unless_guarded() {
        let sink = Sink {
            op: SinkOp::Preinc,
            ty: int(),
            direction: Direction::Overflow,
        };
        assert_eq!(
            sink.evaluate(int().max(), false),
            SinkOutcome::Overflowed {
                exact: int().max() + 1
            }
        );
        assert_eq!(sink.evaluate(int().max(), true), SinkOutcome::Rejected);
        assert_eq!(sink.evaluate(2, false), SinkOutcome::Completed(3));
    }

    #[test]
    fn multiply_skips_values_of_the_wrong_sign() {
        let sink = Sink {
            op: SinkOp::Multiply,
            ty: int(),
            direction: Direction::Underflow,
        };
        assert_eq!(sink.evaluate(5, false), SinkOutcome::Skipped);
        assert!(sink.evaluate(int().min() / 2 - 1, false).is_flaw());
        assert_eq!(sink.evaluate(int().min() / 2 - 1, true), SinkOutcome::Rejected);
    }

    #[test]
    fn square_guard_uses_integer_root() {
        let ty = IntType::of(DataType::Short).unwrap();
        let sink = Sink {
            op: SinkOp::Square,
            ty,
            direction: Direction::Overflow,
        };
        // isqrt(32767) = 181
        assert_eq!(sink.evaluate(181, true), SinkOutcome::Rejected);
        assert_eq!(sink.evaluate(180, true), SinkOutcome::Completed(32400));
        assert!(sink.evaluate(-182, false).is_flaw());
    }

    #[test]
    fn size_t_max_square_saturates() {
        let ty = IntType::of(DataType::SizeT).unwrap();
        let sink = Sink {
            op: SinkOp::Square,
            ty,
            direction: Direction::Overflow,
        };
        assert_eq!(
            sink.evaluate(ty.max(), false),
            SinkOutcome::Overflowed { exact: i128::MAX }
        );
        assert_eq!(sink.evaluate(ty.max(), true), SinkOutcome::Rejected);

        let name = CaseName::parse("CWE190_Integer_Overflow__size_t_max_square_01.c").unwrap();
        let OracleVerdict::Checked(checks) = evaluate(&name, &[PathKind::Bad, PathKind::GoodB2G]) else {
            panic!("expected checks");
        };
        assert!(checks.iter().all(PathCheck::holds));
    }

    #[test]
    fn good_source_sign_depends_on_direction() {
        let char_ty = IntType::of(DataType::Char).unwrap();
        let unsigned = IntType::of(DataType::UnsignedInt).unwrap();
        let under = GoodSource {
            direction: Direction::Underflow,
        };
        assert_eq!(under.values(char_ty), vec![-2]);
        assert_eq!(under.values(unsigned), vec![2]);
        let over = GoodSource {
            direction: Direction::Overflow,
        };
        assert_eq!(over.values(char_ty), vec![2]);
    }

    #[test]
    fn random_sources_cover_both_bounds() {
        let ty = IntType::of(DataType::Short).unwrap();
        let values = BadSource {
            class: SourceClass::Random,
            token: Some("rand".into()),
        }
        .values(ty);
        assert_eq!(values.first(), Some(&ty.min()));
        assert_eq!(values.last(), Some(&ty.max()));
        assert!(values.contains(&0));
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn unsigned_rand_postdec_underflows_at_zero() {
        let name = CaseName::parse("CWE191_Integer_Underflow__unsigned_int_rand_postdec_01.c").unwrap();
        let verdict = evaluate(&name, &[PathKind::Bad, PathKind::GoodG2B, PathKind::GoodB2G]);
        let OracleVerdict::Checked(checks) = verdict else {
            panic!("expected checks");
        };
        assert!(checks.iter().all(PathCheck::holds));
        assert!(checks[0].witnesses.iter().any(|w| w.starts_with("0 ->")));
    }

    #[test]
    fn wide_char_cases_are_unsupported() {
        let name = CaseName::parse("CWE190_Integer_Overflow__wchar_t_max_add_01.c").unwrap();
        assert!(matches!(
            evaluate(&name, &[PathKind::Bad]),
            OracleVerdict::Unsupported(_)
        ));
    }
}
