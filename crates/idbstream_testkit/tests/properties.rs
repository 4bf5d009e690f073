//! Property tests and guard behavior.

use futures::stream;
use idbstream_core::filter_if_store_does_not_exist;
use idbstream_testkit::prelude::*;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Failed to build runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn set_then_read_returns_the_value(key in key_strategy(), value in value_strategy()) {
        let read = runtime().block_on(async {
            let fx = TestClient::new();
            let store = fx.store("kv", StoreParameters::new());
            expect_next(&mut store.clone().set_item(key.clone(), &value))
                .await
                .unwrap();
            let mut read = store.clone().read::<Value>(key);
            expect_next(&mut read).await
        });
        prop_assert_eq!(read, Ok(Some(value)));
    }

    #[test]
    fn entries_come_back_in_key_order(batch in entries_strategy(8)) {
        let entries = runtime().block_on(async {
            let fx = TestClient::new();
            let store = fx.store("kv", StoreParameters::new());
            for (key, value) in batch.iter().rev() {
                expect_next(&mut store.clone().set_item(key.clone(), value))
                    .await
                    .unwrap();
            }
            expect_next(&mut store.clone().entries()).await
        });
        let expected: Vec<Entry> = batch.into_iter().map(Entry::from).collect();
        prop_assert_eq!(entries, Ok(expected));
    }

    #[test]
    fn generated_keys_count_up_from_one(count in 1usize..6) {
        let keys = runtime().block_on(async {
            let fx = TestClient::new();
            let store = fx.auto_increment_store("items");
            for n in 0..count {
                expect_next(&mut store.clone().add_item(n)).await.unwrap();
            }
            expect_next(&mut store.clone().keys()).await
        });
        let expected: Vec<Key> = (1..=count as i64).map(Key::Int).collect();
        prop_assert_eq!(keys, Ok(expected));
    }

    #[test]
    fn resolving_is_idempotent(name in store_name_strategy(), times in 1usize..4) {
        let version = runtime().block_on(async {
            let fx = TestClient::new();
            for _ in 0..times {
                let handle = expect_next(&mut fx.store(&name, StoreParameters::new()))
                    .await
                    .unwrap();
                assert_eq!(handle.name(), name);
            }
            fx.version()
        });
        prop_assert_eq!(version, Some(2));
    }
}

#[tokio::test]
async fn guard_drops_handles_without_the_store() {
    let fx = TestClient::new();
    let mut connection = fx.connect(fx.database.clone(), None);
    let handle = expect_next(&mut connection).await.unwrap();
    assert!(filter_if_store_does_not_exist(handle, "never").is_none());
    assert_eq!(fx.open_connections(), 0);
}

#[tokio::test]
async fn writes_to_a_vanished_store_neither_fail_nor_emit() {
    let fx = TestClient::new();
    let store = fx.store("kv", StoreParameters::new());
    let handle = expect_next(&mut store.clone()).await.unwrap();
    fx.delete().await;

    // The next lease reopens an empty database without the store.
    let mut set = stream::iter(vec![Ok::<_, ConnectionError>(handle.clone())]).set_item("k", 1);
    expect_end(&mut set).await;
    assert_eq!(handle.execute(Operation::Clear).await, Ok(None));
    assert_eq!(fx.version(), Some(1));
}

#[tokio::test]
async fn queries_on_a_vanished_store_stay_silent() {
    let fx = TestClient::new();
    let store = fx.store("kv", StoreParameters::new());
    let handle = expect_next(&mut store.clone()).await.unwrap();
    fx.delete().await;

    let handles = stream::iter(vec![Ok::<_, ConnectionError>(handle)]).chain(stream::pending());
    let mut keys = handles.keys();
    expect_silence(&mut keys).await;
}

#[tokio::test]
async fn store_streams_on_a_fresh_connection_resolve() {
    let fx = TestClient::new();
    let mut store = fx
        .connect(fx.database.clone(), Some(1))
        .object_store("fresh", StoreParameters::auto_increment());
    let handle = expect_next(&mut store).await.unwrap();
    assert!(handle.auto_increment());
    assert_eq!(handle.database(), fx.database);
}
