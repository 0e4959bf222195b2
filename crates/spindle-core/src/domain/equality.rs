//! 構造的等価性 - selection を公開し直すかの判定
//!
//! 上から順に調べ、最初に当てはまったものを採用します。
//!
//! 1. 欠損（Missing / Null）: 両方が同じ種類の欠損のときだけ等しい
//! 2. 参照が同一なら等しい
//! 3. スカラーは値で比べる（スカラーと複合値は等しくならない）
//! 4. list: 長さが同じで、位置ごとの要素が等しい
//! 5. map: 要素数が同じで、`a` の各キーが `b` にあり値が等しい
//! 6. set: 要素数が同じで、`a` の各要素が `b` にある
//! 7. record: フィールド数が同じで、各フィールドが等しい
//! 8. それ以外は等しくない
//!
//! スカラーの判定は複合値より先なので、スカラーのキーを列挙することはありません。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{BuildHasher, Hash};

use super::ids::ResourceUrl;
use super::state::HandleState;
use super::value::Value;

pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a.is_absent(), b.is_absent()) {
        (true, true) => return a.kind() == b.kind(),
        (true, false) | (false, true) => return false,
        (false, false) => {}
    }

    if std::ptr::eq(a, b) {
        return true;
    }

    if a.is_scalar() || b.is_scalar() {
        return scalar_equal(a, b);
    }

    match (a, b) {
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Map(xs), Value::Map(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| deep_equal(x, y)))
        }
        (Value::Set(xs), Value::Set(ys)) => {
            xs.len() == ys.len() && xs.iter().all(|member| ys.contains(member))
        }
        (Value::Record(xs), Value::Record(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(field, x)| ys.get(field).is_some_and(|y| deep_equal(x, y)))
        }
        _ => false,
    }
}

fn scalar_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(i), Value::Float(x)) | (Value::Float(x), Value::Int(i)) => {
            int_equals_float(*i, *x)
        }
        (Value::Str(x), Value::Str(y)) => x == y,
        _ => false,
    }
}

/// Exact comparison: `i as f64` rounds above 2^53, so go the other way and
/// only for integral floats inside the `i64` range.
fn int_equals_float(i: i64, x: f64) -> bool {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    x.fract() == 0.0 && (-LIMIT..LIMIT).contains(&x) && x as i64 == i
}

/// Structural equality lifted onto typed selections.
///
/// The default equality of the selection engine. Implemented for `Value` and
/// for the std containers a selector is likely to return.
pub trait StructuralEq {
    fn structural_eq(&self, other: &Self) -> bool;
}

/// Free-function form, usable as an `EqualFn`.
pub fn structural_eq<T: StructuralEq + ?Sized>(a: &T, b: &T) -> bool {
    a.structural_eq(b)
}

impl StructuralEq for Value {
    fn structural_eq(&self, other: &Self) -> bool {
        deep_equal(self, other)
    }
}

impl<T: StructuralEq> StructuralEq for Option<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.structural_eq(b),
            _ => false,
        }
    }
}

impl<T: StructuralEq> StructuralEq for [T] {
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.structural_eq(b))
    }
}

impl<T: StructuralEq> StructuralEq for Vec<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        self.as_slice().structural_eq(other.as_slice())
    }
}

impl<K, V, S> StructuralEq for HashMap<K, V, S>
where
    K: Eq + Hash,
    V: StructuralEq,
    S: BuildHasher,
{
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, a)| other.get(k).is_some_and(|b| a.structural_eq(b)))
    }
}

impl<K: Ord, V: StructuralEq> StructuralEq for BTreeMap<K, V> {
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, a)| other.get(k).is_some_and(|b| a.structural_eq(b)))
    }
}

impl<K: Eq + Hash, S: BuildHasher> StructuralEq for HashSet<K, S> {
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|k| other.contains(k))
    }
}

impl<K: Ord> StructuralEq for BTreeSet<K> {
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|k| other.contains(k))
    }
}

macro_rules! scalar_structural_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StructuralEq for $ty {
                fn structural_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

scalar_structural_eq!(
    bool, i32, i64, u32, u64, usize, f64, String, str, ResourceUrl, HandleState,
);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn list(items: &[i64]) -> Value {
        Value::List(items.iter().copied().map(Value::from).collect())
    }

    #[rstest]
    #[case::null_null(Value::Null, Value::Null, true)]
    #[case::missing_missing(Value::Missing, Value::Missing, true)]
    #[case::null_missing(Value::Null, Value::Missing, false)]
    #[case::missing_null(Value::Missing, Value::Null, false)]
    #[case::scalar_null(Value::from(1), Value::Null, false)]
    #[case::null_scalar(Value::Null, Value::from(1), false)]
    #[case::same_ints(Value::from(1), Value::from(1), true)]
    #[case::int_float(Value::from(1), Value::from(1.0), true)]
    #[case::int_fraction(Value::from(1), Value::from(1.5), false)]
    #[case::int_above_float_precision(
        Value::from(9_007_199_254_740_993_i64),
        Value::from(9_007_199_254_740_992.0),
        false
    )]
    #[case::float_precision_limit(
        Value::from(9_007_199_254_740_992.0),
        Value::from(9_007_199_254_740_992_i64),
        true
    )]
    #[case::int_max_vs_two_pow_63(
        Value::from(i64::MAX),
        Value::from(9_223_372_036_854_775_808.0),
        false
    )]
    #[case::int_infinity(Value::from(i64::MAX), Value::from(f64::INFINITY), false)]
    #[case::nan(Value::from(f64::NAN), Value::from(f64::NAN), false)]
    #[case::int_string(Value::from(1), Value::from("1"), false)]
    #[case::bool_int(Value::from(true), Value::from(1), false)]
    #[case::scalar_list(Value::from(1), list(&[1]), false)]
    #[case::same_lists(list(&[1]), list(&[1]), true)]
    #[case::longer_list(list(&[1]), list(&[1, 1]), false)]
    #[case::reordered_list(list(&[1, 2]), list(&[2, 1]), false)]
    #[case::same_records(Value::record([("a", 1)]), Value::record([("a", 1)]), true)]
    #[case::extra_field(Value::record([("a", 1)]), Value::record([("a", 1), ("b", 2)]), false)]
    #[case::missing_field(Value::record([("a", 1), ("b", 2)]), Value::record([("a", 1)]), false)]
    #[case::nested_records(
        Value::record([("a", Value::record([("b", 2)]))]),
        Value::record([("a", Value::record([("b", 2)]))]),
        true
    )]
    #[case::renamed_field(Value::record([("a", 1)]), Value::record([("b", 1)]), false)]
    #[case::same_maps(Value::map([(1, 2)]), Value::map([(1, 2)]), true)]
    #[case::different_maps(Value::map([(1, 2)]), Value::map([(2, 3)]), false)]
    #[case::bigger_map(Value::map([(1, 2)]), Value::map([(1, 2), (2, 3)]), false)]
    #[case::same_sets(Value::set([1, 2]), Value::set([1, 2]), true)]
    #[case::different_sets(Value::set([1, 2]), Value::set([1, 3]), false)]
    #[case::bigger_set(Value::set([1, 2]), Value::set([1, 2, 3]), false)]
    #[case::map_vs_record(Value::map([("a", 1)]), Value::record([("a", 1)]), false)]
    #[case::set_vs_list(Value::set([1]), list(&[1]), false)]
    fn deep_equal_cases(#[case] a: Value, #[case] b: Value, #[case] expected: bool) {
        assert_eq!(deep_equal(&a, &b), expected, "deep_equal({a:?}, {b:?})");
    }

    #[test]
    fn identical_reference_is_equal() {
        let value = Value::record([("a", list(&[1, 2, 3]))]);
        assert!(deep_equal(&value, &value));
    }

    #[test]
    fn typed_selections_compare_structurally() {
        let mut a: HashMap<&str, Option<Value>> = HashMap::new();
        a.insert("x", Some(Value::record([("num", 42)])));
        a.insert("y", None);
        let mut b = a.clone();
        assert!(a.structural_eq(&b));

        b.insert("y", Some(Value::Missing));
        assert!(!a.structural_eq(&b));
    }

    #[test]
    fn typed_sets_and_vectors() {
        let a: BTreeSet<i64> = [1, 2].into_iter().collect();
        let b: BTreeSet<i64> = [1, 3].into_iter().collect();
        assert!(!structural_eq(&a, &b));
        assert!(structural_eq(&vec![1_i64], &vec![1_i64]));
        assert!(!structural_eq(&vec![1_i64], &vec![1_i64, 1]));
    }
}
