//! Property 9 / §4.6 step 4: the first inserter for a 10-tuple wins and its
//! code is reused forever, including under concurrent callers.

use ldr_schemas::SegmentKey;
use ldr_transform::SegmentDictionary;

fn key(seg1: &str) -> SegmentKey {
    SegmentKey {
        seg1: Some(seg1.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn concurrent_callers_converge_on_one_code_per_tuple() {
    let pool = ldr_db::testkit_db_pool().await.expect("db pool");
    let loader_code = format!("TEST_SEG_{}", uuid::Uuid::new_v4().simple());
    let dict = std::sync::Arc::new(ldr_db::segments::PgSegmentDictionary::new(pool));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let dict = dict.clone();
        let loader_code = loader_code.clone();
        handles.push(tokio::spawn(async move {
            dict.get_or_create_code(&loader_code, &key("A")).await.unwrap()
        }));
    }

    let mut codes = Vec::new();
    for h in handles {
        codes.push(h.await.unwrap());
    }

    assert!(codes.iter().all(|c| *c == codes[0]), "all callers must agree on one code: {codes:?}");

    let code_b = dict.get_or_create_code(&loader_code, &key("B")).await.unwrap();
    assert_ne!(code_b, codes[0], "a distinct tuple must get a distinct code");
}
