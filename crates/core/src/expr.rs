//! Queue expression language.
//!
//! The remote queue filters jobs and stores some attribute values as ClassAd
//! expressions. Agents build them as an [`Expr`] tree and hand the rendered
//! string to the queue; nothing here parses ClassAd text. [`Expr::eval`] covers the
//! subset of ClassAd semantics the agents rely on (three-valued logic, `time()`,
//! meta-equality), which is what the in-memory queue uses to answer queries.

use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classad::ClassAd;

/// Nesting limit when an attribute value refers to other attributes.
const MAX_EVAL_DEPTH: usize = 32;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `=?=`: same type and same value, never undefined.
    MetaEq,
    /// `=!=`
    MetaNe,
    /// `is`, a synonym of `=?=`.
    Is,
    /// `isnt`, a synonym of `=!=`.
    Isnt,
    Sub,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::MetaEq => "=?=",
            BinOp::MetaNe => "=!=",
            BinOp::Is => "is",
            BinOp::Isnt => "isnt",
            BinOp::Sub => "-",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinOp::Eq | BinOp::Ne | BinOp::MetaEq | BinOp::MetaNe | BinOp::Is | BinOp::Isnt => 3,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
            BinOp::Sub => 5,
        }
    }
}

/// A filter or attribute-value expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Attr(String),
    Int(i64),
    Bool(bool),
    Str(String),
    Undefined,
    /// `time()`: current Unix time in seconds.
    Time,
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    IsString(Box<Expr>),
    IsUndefined(Box<Expr>),
    Member(Box<Expr>, Vec<Expr>),
    /// Expression text received from the queue that is carried verbatim.
    Raw(String),
}

/// Result of evaluating an [`Expr`] against a [`ClassAd`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Undefined,
    Error,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Expr {
    pub fn attr(name: impl Into<String>) -> Self {
        Self::Attr(name.into())
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    /// Whole seconds of `duration` as an integer literal, saturating at `i64::MAX`.
    pub fn seconds(duration: Duration) -> Self {
        Self::Int(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
    }

    pub fn and(self, rhs: Expr) -> Self {
        Self::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Self {
        Self::Or(Box::new(self), Box::new(rhs))
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    fn binary(self, op: BinOp, rhs: Expr) -> Self {
        Self::Binary(op, Box::new(self), Box::new(rhs))
    }

    pub fn equals(self, rhs: Expr) -> Self {
        self.binary(BinOp::Eq, rhs)
    }

    pub fn not_equals(self, rhs: Expr) -> Self {
        self.binary(BinOp::Ne, rhs)
    }

    pub fn less_than(self, rhs: Expr) -> Self {
        self.binary(BinOp::Lt, rhs)
    }

    pub fn at_most(self, rhs: Expr) -> Self {
        self.binary(BinOp::Le, rhs)
    }

    pub fn greater_than(self, rhs: Expr) -> Self {
        self.binary(BinOp::Gt, rhs)
    }

    pub fn at_least(self, rhs: Expr) -> Self {
        self.binary(BinOp::Ge, rhs)
    }

    pub fn meta_equals(self, rhs: Expr) -> Self {
        self.binary(BinOp::MetaEq, rhs)
    }

    pub fn meta_not_equals(self, rhs: Expr) -> Self {
        self.binary(BinOp::MetaNe, rhs)
    }

    pub fn is(self, rhs: Expr) -> Self {
        self.binary(BinOp::Is, rhs)
    }

    pub fn isnt(self, rhs: Expr) -> Self {
        self.binary(BinOp::Isnt, rhs)
    }

    pub fn minus(self, rhs: Expr) -> Self {
        self.binary(BinOp::Sub, rhs)
    }

    /// `isString(self)`
    pub fn string_check(self) -> Self {
        Self::IsString(Box::new(self))
    }

    /// `isUndefined(self)`
    pub fn undefined_check(self) -> Self {
        Self::IsUndefined(Box::new(self))
    }

    /// `member(self, {items...})`
    pub fn member_of(self, items: impl IntoIterator<Item = Expr>) -> Self {
        Self::Member(Box::new(self), items.into_iter().collect())
    }

    /// `time() - <attr>`: seconds elapsed since the time stored in `attr`.
    pub fn age_of(attr: impl Into<String>) -> Self {
        Self::Time.minus(Self::attr(attr))
    }

    /// True only when the expression evaluates to boolean `true`.
    pub fn matches(&self, ad: &ClassAd, now: i64) -> bool {
        self.eval(ad, now) == Value::Bool(true)
    }

    pub fn eval(&self, ad: &ClassAd, now: i64) -> Value {
        self.eval_at(ad, now, 0)
    }

    fn eval_at(&self, ad: &ClassAd, now: i64, depth: usize) -> Value {
        if depth > MAX_EVAL_DEPTH {
            return Value::Error;
        }
        let sub = |e: &Expr| e.eval_at(ad, now, depth + 1);

        match self {
            Expr::Attr(name) => match ad.get(name) {
                Some(value) => sub(value),
                None => Value::Undefined,
            },
            Expr::Int(i) => Value::Int(*i),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Undefined | Expr::Raw(_) => Value::Undefined,
            Expr::Time => Value::Int(now),
            Expr::Not(inner) => match sub(inner) {
                Value::Bool(b) => Value::Bool(!b),
                Value::Undefined => Value::Undefined,
                _ => Value::Error,
            },
            Expr::And(lhs, rhs) => {
                let l = sub(lhs);
                if l == Value::Bool(false) {
                    return l;
                }
                match (l, sub(rhs)) {
                    (Value::Error, _) | (_, Value::Error) => Value::Error,
                    (_, Value::Bool(false)) => Value::Bool(false),
                    (Value::Bool(true), Value::Bool(true)) => Value::Bool(true),
                    (Value::Bool(true) | Value::Undefined, Value::Undefined)
                    | (Value::Undefined, Value::Bool(true)) => Value::Undefined,
                    _ => Value::Error,
                }
            }
            Expr::Or(lhs, rhs) => {
                let l = sub(lhs);
                if l == Value::Bool(true) {
                    return l;
                }
                match (l, sub(rhs)) {
                    (Value::Error, _) | (_, Value::Error) => Value::Error,
                    (_, Value::Bool(true)) => Value::Bool(true),
                    (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
                    (Value::Bool(false) | Value::Undefined, Value::Undefined)
                    | (Value::Undefined, Value::Bool(false)) => Value::Undefined,
                    _ => Value::Error,
                }
            }
            Expr::Binary(op, lhs, rhs) => apply(*op, sub(lhs), sub(rhs)),
            Expr::IsString(inner) => Value::Bool(matches!(sub(inner), Value::Str(_))),
            Expr::IsUndefined(inner) => Value::Bool(matches!(sub(inner), Value::Undefined)),
            Expr::Member(needle, items) => {
                let needle = sub(needle);
                match needle {
                    Value::Undefined => Value::Undefined,
                    Value::Error => Value::Error,
                    _ => Value::Bool(items.iter().any(|item| identical(&needle, &sub(item)))),
                }
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Or(..) => 1,
            Expr::And(..) => 2,
            Expr::Binary(op, ..) => op.precedence(),
            Expr::Not(_) => 6,
            _ => 7,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min_precedence: u8) -> fmt::Result {
        if self.precedence() < min_precedence {
            write!(f, "( {self} )")
        } else {
            write!(f, "{self}")
        }
    }
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Error, Value::Error) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        _ => false,
    }
}

fn apply(op: BinOp, l: Value, r: Value) -> Value {
    match op {
        BinOp::MetaEq | BinOp::Is => return Value::Bool(identical(&l, &r)),
        BinOp::MetaNe | BinOp::Isnt => return Value::Bool(!identical(&l, &r)),
        _ => {}
    }

    match (&l, &r) {
        (Value::Error, _) | (_, Value::Error) => return Value::Error,
        (Value::Undefined, _) | (_, Value::Undefined) => return Value::Undefined,
        _ => {}
    }

    match (op, l, r) {
        (BinOp::Sub, Value::Int(x), Value::Int(y)) => Value::Int(x.saturating_sub(y)),
        (_, Value::Int(x), Value::Int(y)) => compare(op, x.cmp(&y)),
        // String comparison in the queue language is case-insensitive.
        (_, Value::Str(x), Value::Str(y)) if op != BinOp::Sub => {
            compare(op, x.to_lowercase().cmp(&y.to_lowercase()))
        }
        (BinOp::Eq, Value::Bool(x), Value::Bool(y)) => Value::Bool(x == y),
        (BinOp::Ne, Value::Bool(x), Value::Bool(y)) => Value::Bool(x != y),
        _ => Value::Error,
    }
}

fn compare(op: BinOp, ord: core::cmp::Ordering) -> Value {
    use core::cmp::Ordering::*;
    let b = match op {
        BinOp::Eq => ord == Equal,
        BinOp::Ne => ord != Equal,
        BinOp::Lt => ord == Less,
        BinOp::Le => ord != Greater,
        BinOp::Gt => ord == Greater,
        BinOp::Ge => ord != Less,
        _ => return Value::Error,
    };
    Value::Bool(b)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Attr(name) => f.write_str(name),
            Expr::Int(i) => write!(f, "{i}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        _ => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            Expr::Undefined => f.write_str("undefined"),
            Expr::Time => f.write_str("time()"),
            Expr::Not(inner) => {
                f.write_str("!")?;
                inner.fmt_operand(f, 7)
            }
            Expr::And(lhs, rhs) => {
                lhs.fmt_operand(f, 2)?;
                f.write_str(" && ")?;
                rhs.fmt_operand(f, 2)
            }
            Expr::Or(lhs, rhs) => {
                lhs.fmt_operand(f, 1)?;
                f.write_str(" || ")?;
                rhs.fmt_operand(f, 1)
            }
            Expr::Binary(op, lhs, rhs) => {
                let p = op.precedence();
                lhs.fmt_operand(f, p)?;
                write!(f, " {} ", op.symbol())?;
                rhs.fmt_operand(f, p + 1)
            }
            Expr::IsString(inner) => write!(f, "isString({inner})"),
            Expr::IsUndefined(inner) => write!(f, "isUndefined({inner})"),
            Expr::Member(needle, items) => {
                write!(f, "member({needle}, {{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("})")
            }
            Expr::Raw(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_durations_saturate() {
        assert_eq!(Expr::seconds(Duration::from_secs(7_200)), Expr::Int(7_200));
        assert_eq!(Expr::seconds(Duration::from_secs(u64::MAX)), Expr::Int(i64::MAX));
    }

    fn ad() -> ClassAd {
        ClassAd::new()
            .with("JobStatus", Expr::Int(4))
            .with("EnteredCurrentStatus", Expr::Int(1_000))
            .with("SUBMIT_UserLog", Expr::str("/spool/a.log"))
            .with("LeaveJobInQueue", Expr::Bool(true))
    }

    #[test]
    fn renders_nested_or_with_parentheses() {
        let e = Expr::attr("SUBMIT_UserLog")
            .string_check()
            .and(Expr::attr("LeaveJobInQueue").isnt(Expr::Bool(false)))
            .and(
                Expr::attr("JobStatus")
                    .equals(Expr::Int(4))
                    .or(Expr::attr("JobStatus").equals(Expr::Int(3))),
            );
        assert_eq!(
            e.to_string(),
            "isString(SUBMIT_UserLog) && LeaveJobInQueue isnt false && ( JobStatus == 4 || JobStatus == 3 )"
        );
    }

    #[test]
    fn renders_arithmetic_without_redundant_parentheses() {
        let e = Expr::attr("JobStatus")
            .meta_equals(Expr::Int(3))
            .and(Expr::age_of("EnteredCurrentStatus").at_least(Expr::Int(86400)));
        assert_eq!(
            e.to_string(),
            "JobStatus =?= 3 && time() - EnteredCurrentStatus >= 86400"
        );
    }

    #[test]
    fn renders_member_and_strings() {
        let e = Expr::attr("JobStatus").member_of([Expr::Int(1), Expr::Int(2)]);
        assert_eq!(e.to_string(), "member(JobStatus, {1, 2})");
        assert_eq!(Expr::str("a\"b").to_string(), "\"a\\\"b\"");
        assert_eq!(
            Expr::attr("A").or(Expr::attr("B")).negate().to_string(),
            "!( A || B )"
        );
    }

    #[test]
    fn missing_attributes_are_undefined() {
        let ad = ad();
        assert_eq!(Expr::attr("sdfCopied").eval(&ad, 0), Value::Undefined);
        assert!(Expr::attr("sdfCopied").undefined_check().matches(&ad, 0));
        assert_eq!(
            Expr::attr("sdfCopied").equals(Expr::Int(0)).eval(&ad, 0),
            Value::Undefined
        );
    }

    #[test]
    fn three_valued_logic() {
        let ad = ad();
        let undef = Expr::attr("Nope").equals(Expr::Int(1));
        assert_eq!(undef.clone().and(Expr::Bool(false)).eval(&ad, 0), Value::Bool(false));
        assert_eq!(undef.clone().and(Expr::Bool(true)).eval(&ad, 0), Value::Undefined);
        assert_eq!(undef.clone().or(Expr::Bool(true)).eval(&ad, 0), Value::Bool(true));
        assert_eq!(undef.or(Expr::Bool(false)).eval(&ad, 0), Value::Undefined);
    }

    #[test]
    fn meta_equality_never_undefined() {
        let ad = ad();
        assert!(Expr::attr("Nope").is(Expr::Undefined).matches(&ad, 0));
        assert!(Expr::attr("Nope").isnt(Expr::Bool(false)).matches(&ad, 0));
        assert!(Expr::attr("LeaveJobInQueue").isnt(Expr::Bool(false)).matches(&ad, 0));
        assert!(!Expr::attr("LeaveJobInQueue").is(Expr::Bool(false)).matches(&ad, 0));
        assert!(!Expr::attr("JobStatus").meta_equals(Expr::str("4")).matches(&ad, 0));
    }

    #[test]
    fn time_arithmetic_uses_supplied_now() {
        let ad = ad();
        let old_enough = Expr::age_of("EnteredCurrentStatus").at_least(Expr::Int(500));
        assert!(!old_enough.matches(&ad, 1_499));
        assert!(old_enough.matches(&ad, 1_500));
    }

    #[test]
    fn attribute_holding_an_expression_is_evaluated() {
        let delayed = Expr::age_of("EnteredCurrentStatus").less_than(Expr::Int(100));
        let ad = ad().with("LeaveJobInQueue", delayed);
        let retained = Expr::attr("LeaveJobInQueue").equals(Expr::Bool(true));
        assert!(retained.matches(&ad, 1_050));
        assert!(!retained.matches(&ad, 1_200));
    }

    #[test]
    fn self_referencing_attribute_is_an_error() {
        let ad = ClassAd::new().with("Loop", Expr::attr("Loop"));
        assert_eq!(Expr::attr("Loop").eval(&ad, 0), Value::Error);
    }

    #[test]
    fn member_matches_same_typed_values() {
        let ad = ad();
        let e = Expr::attr("JobStatus").member_of([1, 2, 4].map(Expr::Int));
        assert!(e.matches(&ad, 0));
        let e = Expr::attr("JobStatus").member_of([1, 2].map(Expr::Int));
        assert!(!e.matches(&ad, 0));
    }

    #[test]
    fn string_equality_ignores_case() {
        let ad = ClassAd::new().with("Owner", Expr::str("Alice"));
        assert!(Expr::attr("owner").equals(Expr::str("alice")).matches(&ad, 0));
    }
}
