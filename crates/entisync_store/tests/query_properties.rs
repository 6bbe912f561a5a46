//! Property tests for query evaluation.

use entisync_core::codec::JsonMap;
use entisync_store::Query;
use proptest::prelude::*;
use serde_json::json;

fn rows(points: &[i64]) -> Vec<JsonMap> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut row = JsonMap::new();
            row.insert("objectId".into(), json!(format!("s{i}")));
            row.insert("points".into(), json!(p));
            row
        })
        .collect()
}

fn points_of(results: &[JsonMap]) -> Vec<i64> {
    results
        .iter()
        .filter_map(|row| row.get("points").and_then(|p| p.as_i64()))
        .collect()
}

proptest! {
    #[test]
    fn ascending_order_is_sorted(points in prop::collection::vec(-50i64..50, 0..20)) {
        let results = Query::new("Score").ascending(&["points"]).evaluate(rows(&points)).unwrap();
        let mut expected = points.clone();
        expected.sort();
        prop_assert_eq!(points_of(&results), expected);
    }

    #[test]
    fn filters_agree_with_a_plain_scan(points in prop::collection::vec(-50i64..50, 0..20), bound in -50i64..50) {
        let results = Query::new("Score")
            .greater_than_or_equal_to("points", bound)
            .evaluate(rows(&points))
            .unwrap();
        let expected: Vec<i64> = points.iter().copied().filter(|p| *p >= bound).collect();
        prop_assert_eq!(points_of(&results), expected);
    }

    #[test]
    fn skip_and_limit_slice_the_ordered_results(
        points in prop::collection::vec(-50i64..50, 0..20),
        skip in 0usize..25,
        limit in 0usize..25,
    ) {
        let results = Query::new("Score")
            .descending(&["points"])
            .skip(skip)
            .limit(limit)
            .evaluate(rows(&points))
            .unwrap();
        let mut expected = points.clone();
        expected.sort_by(|a, b| b.cmp(a));
        let expected: Vec<i64> = expected.into_iter().skip(skip).take(limit).collect();
        prop_assert_eq!(points_of(&results), expected);
    }
}
