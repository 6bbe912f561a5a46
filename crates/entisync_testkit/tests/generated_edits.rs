//! Randomized edit sequences saved to the in-memory server.

use entisync_engine::{FetchOptions, SaveOptions};
use entisync_testkit::prelude::*;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn saved_edits_match_the_server(first in edits_strategy(6), second in edits_strategy(6)) {
        runtime().block_on(async {
            let env = TestClient::new();
            let obj = env.object("Box");
            apply_edits(&obj, &first);
            env.save(&obj, &SaveOptions::default()).await.unwrap();
            apply_edits(&obj, &second);
            env.save(&obj, &SaveOptions::default()).await.unwrap();
            assert!(!obj.dirty());

            let other = env.second_device();
            let copy = other.object_with_id("Box", &obj.id().unwrap());
            other.fetch(&copy, &FetchOptions::default()).await.unwrap();
            for key in [COUNT_KEY, TAGS_KEY, LABEL_KEY] {
                assert_eq!(copy.get(key), obj.get(key), "attribute {key}");
            }
        });
    }

    #[test]
    fn failed_saves_keep_the_estimate(edits in edits_strategy(8)) {
        runtime().block_on(async {
            let env = TestClient::new();
            let obj = env.object("Box");
            apply_edits(&obj, &edits);
            let before = obj.attributes();

            env.server.set_offline(true);
            let err = env.save(&obj, &SaveOptions::default()).await.unwrap_err();
            assert!(err.is_connection_failure());
            assert_eq!(obj.attributes(), before);
        });
    }
}
