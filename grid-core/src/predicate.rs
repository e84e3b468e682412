//! Row predicates for filtering materialized table rows.
//!
//! Grounded directly on `MdbComputedBoolColumnOpArg`/
//! `MdbComputedBoolColumnOpColumn` in the original reader: a predicate is
//! either `column op literal(s)` or `predicate AND/OR predicate`, and
//! negation (`~`) is pushed down to the leaves via De Morgan's laws rather
//! than represented as its own node, so the tree handed to the columnar
//! engine never contains a literal `NOT`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{GridError, Result};

/// A scalar value usable as a predicate argument. Strings and timestamps
/// are single-quoted when rendered to SQL; everything else is bare, per
/// `_single_arg_to_string` in the original reader.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Str(String),
    Timestamp(String),
    Int(i64),
    Float(f64),
}

impl Literal {
    fn to_sql(&self) -> String {
        match self {
            Literal::Str(s) => format!("'{s}'"),
            Literal::Timestamp(s) => format!("'{s}'"),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
        }
    }

    fn partial_cmp(&self, other: &Literal) -> Option<Ordering> {
        match (self, other) {
            (Literal::Str(a), Literal::Str(b)) => a.partial_cmp(b),
            (Literal::Timestamp(a), Literal::Timestamp(b)) => a.partial_cmp(b),
            (Literal::Int(a), Literal::Int(b)) => a.partial_cmp(b),
            (Literal::Float(a), Literal::Float(b)) => a.partial_cmp(b),
            (Literal::Int(a), Literal::Float(b)) => (*a as f64).partial_cmp(b),
            (Literal::Float(a), Literal::Int(b)) => a.partial_cmp(&(*b as f64)),
            _ => None,
        }
    }
}

/// A single materialized row, as handed to and received from a
/// `ColumnarEngine` (query_engine.rs). Column order doesn't matter, so a
/// sorted map keeps comparisons and joins deterministic in the in-memory
/// test engine.
pub type Row = BTreeMap<String, Literal>;

/// The comparison operators a single column-vs-literal(s) predicate can
/// carry, with the exact SQL keywords the original reader emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Between,
    NotBetween,
    In,
    NotIn,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Between => "BETWEEN",
            CompareOp::NotBetween => "NOT BETWEEN",
            CompareOp::In => "IN",
            CompareOp::NotIn => "NOT IN",
        }
    }

    fn invert(self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::Between => CompareOp::NotBetween,
            CompareOp::NotBetween => CompareOp::Between,
            CompareOp::In => CompareOp::NotIn,
            CompareOp::NotIn => CompareOp::In,
        }
    }
}

/// The argument shape a `CompareOp` expects: one literal for `=`/`!=`/
/// ordering ops, two for `BETWEEN`, any number for `IN`.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Single(Literal),
    Pair(Literal, Literal),
    List(Vec<Literal>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BoolOp {
    And,
    Or,
}

/// A row predicate, scoped to a specific table version (predicates from
/// two different versions cannot be combined — see `and`/`or` below).
#[derive(Clone, Debug)]
pub enum Predicate {
    ColumnOp {
        table_version: i64,
        column: String,
        op: CompareOp,
        arg: Arg,
    },
    Combine {
        op: BoolOp,
        left: Box<Predicate>,
        right: Box<Predicate>,
    },
}

impl Predicate {
    pub fn eq(table_version: i64, column: impl Into<String>, value: Literal) -> Self {
        Predicate::ColumnOp {
            table_version,
            column: column.into(),
            op: CompareOp::Eq,
            arg: Arg::Single(value),
        }
    }

    pub fn ne(table_version: i64, column: impl Into<String>, value: Literal) -> Self {
        Predicate::ColumnOp {
            table_version,
            column: column.into(),
            op: CompareOp::Ne,
            arg: Arg::Single(value),
        }
    }

    pub fn gt(table_version: i64, column: impl Into<String>, value: Literal) -> Self {
        Predicate::ColumnOp {
            table_version,
            column: column.into(),
            op: CompareOp::Gt,
            arg: Arg::Single(value),
        }
    }

    pub fn lt(table_version: i64, column: impl Into<String>, value: Literal) -> Self {
        Predicate::ColumnOp {
            table_version,
            column: column.into(),
            op: CompareOp::Lt,
            arg: Arg::Single(value),
        }
    }

    pub fn ge(table_version: i64, column: impl Into<String>, value: Literal) -> Self {
        Predicate::ColumnOp {
            table_version,
            column: column.into(),
            op: CompareOp::Ge,
            arg: Arg::Single(value),
        }
    }

    pub fn le(table_version: i64, column: impl Into<String>, value: Literal) -> Self {
        Predicate::ColumnOp {
            table_version,
            column: column.into(),
            op: CompareOp::Le,
            arg: Arg::Single(value),
        }
    }

    pub fn between(table_version: i64, column: impl Into<String>, low: Literal, high: Literal) -> Self {
        Predicate::ColumnOp {
            table_version,
            column: column.into(),
            op: CompareOp::Between,
            arg: Arg::Pair(low, high),
        }
    }

    pub fn isin(table_version: i64, column: impl Into<String>, values: Vec<Literal>) -> Self {
        Predicate::ColumnOp {
            table_version,
            column: column.into(),
            op: CompareOp::In,
            arg: Arg::List(values),
        }
    }

    /// `col = 'TRUE'` — the coercion the original reader applies when a
    /// bare boolean column is used directly as a row filter
    /// (`_interpret_as_bool`). Note the literal is the *string* `"TRUE"`,
    /// quoted like any other string literal, not a bare SQL boolean.
    pub fn bool_column(table_version: i64, column: impl Into<String>) -> Self {
        Predicate::eq(table_version, column, Literal::Str("TRUE".to_string()))
    }

    /// Interprets this predicate against a single row. Used by the
    /// in-memory `ColumnarEngine` test implementation; a real engine would
    /// instead execute the rendered SQL directly and never call this.
    pub fn evaluate(&self, row: &Row) -> bool {
        match self {
            Predicate::ColumnOp {
                column, op, arg, ..
            } => {
                let value = match row.get(column) {
                    Some(v) => v,
                    None => return false,
                };
                match (op, arg) {
                    (CompareOp::Eq, Arg::Single(l)) => value == l,
                    (CompareOp::Ne, Arg::Single(l)) => value != l,
                    (CompareOp::Gt, Arg::Single(l)) => {
                        value.partial_cmp(l) == Some(Ordering::Greater)
                    }
                    (CompareOp::Lt, Arg::Single(l)) => value.partial_cmp(l) == Some(Ordering::Less),
                    (CompareOp::Ge, Arg::Single(l)) => {
                        matches!(value.partial_cmp(l), Some(Ordering::Greater) | Some(Ordering::Equal))
                    }
                    (CompareOp::Le, Arg::Single(l)) => {
                        matches!(value.partial_cmp(l), Some(Ordering::Less) | Some(Ordering::Equal))
                    }
                    (CompareOp::Between, Arg::Pair(lo, hi)) => {
                        matches!(value.partial_cmp(lo), Some(Ordering::Greater) | Some(Ordering::Equal))
                            && matches!(value.partial_cmp(hi), Some(Ordering::Less) | Some(Ordering::Equal))
                    }
                    (CompareOp::NotBetween, Arg::Pair(lo, hi)) => {
                        !(matches!(value.partial_cmp(lo), Some(Ordering::Greater) | Some(Ordering::Equal))
                            && matches!(value.partial_cmp(hi), Some(Ordering::Less) | Some(Ordering::Equal)))
                    }
                    (CompareOp::In, Arg::List(values)) => values.contains(value),
                    (CompareOp::NotIn, Arg::List(values)) => !values.contains(value),
                    _ => false,
                }
            }
            Predicate::Combine { op, left, right } => match op {
                BoolOp::And => left.evaluate(row) && right.evaluate(row),
                BoolOp::Or => left.evaluate(row) || right.evaluate(row),
            },
        }
    }

    pub fn table_version(&self) -> i64 {
        match self {
            Predicate::ColumnOp { table_version, .. } => *table_version,
            Predicate::Combine { left, .. } => left.table_version(),
        }
    }

    pub fn and(self, other: Predicate) -> Result<Predicate> {
        combine(self, other, BoolOp::And)
    }

    pub fn or(self, other: Predicate) -> Result<Predicate> {
        combine(self, other, BoolOp::Or)
    }

    /// Pushes negation down to the `ColumnOp` leaves via De Morgan's laws,
    /// so the tree never carries an explicit `NOT` node.
    pub fn not(self) -> Predicate {
        match self {
            Predicate::ColumnOp {
                table_version,
                column,
                op,
                arg,
            } => Predicate::ColumnOp {
                table_version,
                column,
                op: op.invert(),
                arg,
            },
            Predicate::Combine { op, left, right } => Predicate::Combine {
                op: match op {
                    BoolOp::And => BoolOp::Or,
                    BoolOp::Or => BoolOp::And,
                },
                left: Box::new(left.not()),
                right: Box::new(right.not()),
            },
        }
    }

    /// Renders this predicate as the `WHERE` fragment against `table_alias`,
    /// mirroring `_construct_where_clause` exactly (double-quoted column
    /// names, parenthesized at every level).
    pub fn to_sql(&self, table_alias: &str) -> String {
        match self {
            Predicate::ColumnOp {
                column, op, arg, ..
            } => match (op, arg) {
                (CompareOp::Between, Arg::Pair(a, b)) | (CompareOp::NotBetween, Arg::Pair(a, b)) => {
                    format!(
                        "({table_alias}.\"{column}\" {} {} AND {})",
                        op.symbol(),
                        a.to_sql(),
                        b.to_sql()
                    )
                }
                (CompareOp::In, Arg::List(values)) | (CompareOp::NotIn, Arg::List(values)) => {
                    let joined = values
                        .iter()
                        .map(Literal::to_sql)
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("({table_alias}.\"{column}\" {} ({joined}))", op.symbol())
                }
                (_, Arg::Single(value)) => {
                    format!("({table_alias}.\"{column}\" {} {})", op.symbol(), value.to_sql())
                }
                _ => unreachable!("op/arg shape mismatch constructed outside this module"),
            },
            Predicate::Combine { op, left, right } => {
                let keyword = match op {
                    BoolOp::And => "AND",
                    BoolOp::Or => "OR",
                };
                format!(
                    "({} {keyword} {})",
                    left.to_sql(table_alias),
                    right.to_sql(table_alias)
                )
            }
        }
    }
}

fn combine(left: Predicate, right: Predicate, op: BoolOp) -> Result<Predicate> {
    if left.table_version() != right.table_version() {
        return Err(GridError::validation(
            "using a predicate from a different table version in a row selector is not supported",
        ));
    }
    Ok(Predicate::Combine {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_simple_comparison() {
        let p = Predicate::eq(1, "amount", Literal::Int(5));
        assert_eq!(p.to_sql("t"), "(t.\"amount\" = 5)");
    }

    #[test]
    fn renders_string_literal_quoted() {
        let p = Predicate::eq(1, "name", Literal::Str("abc".to_string()));
        assert_eq!(p.to_sql("t"), "(t.\"name\" = 'abc')");
    }

    #[test]
    fn renders_between() {
        let p = Predicate::between(1, "amount", Literal::Int(1), Literal::Int(10));
        assert_eq!(p.to_sql("t"), "(t.\"amount\" BETWEEN 1 AND 10)");
    }

    #[test]
    fn renders_isin() {
        let p = Predicate::isin(1, "code", vec![Literal::Str("A".into()), Literal::Str("B".into())]);
        assert_eq!(p.to_sql("t"), "(t.\"code\" IN ('A', 'B'))");
    }

    #[test]
    fn not_pushes_through_and_to_leaves() {
        let a = Predicate::eq(1, "x", Literal::Int(1));
        let b = Predicate::gt(1, "y", Literal::Int(2));
        let combined = a.and(b).unwrap();
        let negated = combined.not();
        assert_eq!(
            negated.to_sql("t"),
            "((t.\"x\" != 1) OR (t.\"y\" <= 2))"
        );
    }

    #[test]
    fn not_inverts_between_and_in() {
        assert_eq!(
            Predicate::between(1, "a", Literal::Int(1), Literal::Int(2))
                .not()
                .to_sql("t"),
            "(t.\"a\" NOT BETWEEN 1 AND 2)"
        );
        assert_eq!(
            Predicate::isin(1, "a", vec![Literal::Int(1)]).not().to_sql("t"),
            "(t.\"a\" NOT IN (1))"
        );
    }

    #[test]
    fn bool_column_coerces_to_string_true() {
        let p = Predicate::bool_column(1, "is_active");
        assert_eq!(p.to_sql("t"), "(t.\"is_active\" = 'TRUE')");
    }

    #[test]
    fn evaluate_matches_sql_semantics() {
        let mut row = Row::new();
        row.insert("amount".to_string(), Literal::Int(5));
        let p = Predicate::between(1, "amount", Literal::Int(1), Literal::Int(10));
        assert!(p.evaluate(&row));
        assert!(!p.clone().not().evaluate(&row));
    }

    #[test]
    fn rejects_mismatched_table_versions() {
        let a = Predicate::eq(1, "x", Literal::Int(1));
        let b = Predicate::eq(2, "y", Literal::Int(2));
        assert!(a.and(b).is_err());
    }

    fn arb_compare_predicate() -> impl proptest::strategy::Strategy<Value = Predicate> {
        use proptest::prelude::*;
        (0..6i32, any::<i64>(), any::<i64>()).prop_map(|(variant, column_val, arg_val)| {
            let column = "amount";
            match variant {
                0 => Predicate::eq(1, column, Literal::Int(column_val)),
                1 => Predicate::ne(1, column, Literal::Int(column_val)),
                2 => Predicate::gt(1, column, Literal::Int(column_val)),
                3 => Predicate::lt(1, column, Literal::Int(column_val)),
                4 => Predicate::between(1, column, Literal::Int(column_val), Literal::Int(arg_val)),
                _ => Predicate::isin(1, column, vec![Literal::Int(column_val), Literal::Int(arg_val)]),
            }
        })
    }

    proptest::proptest! {
        /// Double negation is the identity, and a single negation always
        /// flips the row's membership — whatever the concrete comparator or
        /// literal, `not(not(p))` renders identically to `p`, and
        /// `p`/`not(p)` never agree on a given row.
        #[test]
        fn not_round_trips_and_inverts_membership(p in arb_compare_predicate(), row_val in any::<i64>()) {
            let mut row = Row::new();
            row.insert("amount".to_string(), Literal::Int(row_val));

            let double_negated = p.clone().not().not();
            prop_assert_eq!(p.to_sql("t"), double_negated.to_sql("t"));
            prop_assert_eq!(p.evaluate(&row), !p.clone().not().evaluate(&row));
        }
    }
}
