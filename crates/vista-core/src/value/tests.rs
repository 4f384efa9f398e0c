use crate::value::{Float64, Value, canonical_cmp, strict_order_cmp};
use std::cmp::Ordering;

#[test]
fn canonical_cmp_is_rank_first() {
    assert_eq!(
        canonical_cmp(&Value::Null, &Value::Bool(false)),
        Ordering::Less
    );
    assert_eq!(
        canonical_cmp(&Value::Text("a".into()), &Value::Int(9)),
        Ordering::Greater
    );
}

#[test]
fn canonical_cmp_orders_same_variant() {
    assert_eq!(canonical_cmp(&Value::Int(-3), &Value::Int(7)), Ordering::Less);
    assert_eq!(
        canonical_cmp(&Value::Text("abc".into()), &Value::Text("abd".into())),
        Ordering::Less
    );
}

#[test]
fn canonical_cmp_lists_are_lexicographic() {
    let short = Value::from_slice(&[1i64, 2]);
    let long = Value::from_slice(&[1i64, 2, 3]);
    assert_eq!(canonical_cmp(&short, &long), Ordering::Less);
    assert_eq!(canonical_cmp(&long, &long.clone()), Ordering::Equal);
}

#[test]
fn strict_order_rejects_mixed_variants() {
    assert_eq!(strict_order_cmp(&Value::Int(1), &Value::Uint(1)), None);
    assert_eq!(strict_order_cmp(&Value::Null, &Value::Null), None);
}

#[test]
fn float64_rejects_non_finite_and_folds_negative_zero() {
    assert!(Float64::try_new(f64::NAN).is_none());
    assert!(Float64::try_new(f64::INFINITY).is_none());

    let neg = Float64::try_new(-0.0).expect("finite");
    let pos = Float64::try_new(0.0).expect("finite");
    assert_eq!(neg, pos);
    assert_eq!(neg.get().to_bits(), pos.get().to_bits());
}

#[test]
fn option_conversion_maps_none_to_null() {
    let absent: Option<i64> = None;
    assert_eq!(Value::from(absent), Value::Null);
    assert_eq!(Value::from(Some(4i64)), Value::Int(4));
}
