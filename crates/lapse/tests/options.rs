// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(feature = "serde")]
#![allow(missing_docs, reason = "test code")]

//! Deserialization of `CacheOptions`.

use std::time::Duration;

use lapse::{CacheBuilder, CacheOptions};

#[test]
fn only_expire_is_required() {
    let options: CacheOptions = serde_json::from_str(r#"{ "expire": { "secs": 30, "nanos": 0 } }"#).unwrap();

    assert_eq!(options, CacheOptions::new(Duration::from_secs(30)));
}

#[test]
fn every_field_can_be_set() {
    let options: CacheOptions = serde_json::from_str(
        r#"{
            "expire": { "secs": 300, "nanos": 0 },
            "limit": 1000,
            "name": "tokens",
            "tick": { "secs": 0, "nanos": 500000000 },
            "slots": 120,
            "stats_interval": { "secs": 10, "nanos": 0 }
        }"#,
    )
    .unwrap();

    assert_eq!(options.expire, Duration::from_secs(300));
    assert_eq!(options.limit, 1000);
    assert_eq!(options.name, "tokens");
    assert_eq!(options.tick, Duration::from_millis(500));
    assert_eq!(options.slots, 120);
    assert_eq!(options.stats_interval, Duration::from_secs(10));
}

#[test]
fn missing_expire_is_rejected() {
    let error = serde_json::from_str::<CacheOptions>(r#"{ "limit": 10 }"#).unwrap_err();
    assert!(error.to_string().contains("missing field `expire`"));
}

#[tokio::test(start_paused = true)]
async fn deserialized_options_build_a_cache() {
    let options: CacheOptions =
        serde_json::from_str(r#"{ "expire": { "secs": 2, "nanos": 0 }, "name": "from-config", "limit": 1 }"#).unwrap();

    let cache = CacheBuilder::<&str, u32>::from_options(options).build().unwrap();
    cache.set("a", 1);
    cache.set("b", 2);

    assert_eq!(cache.name(), "from-config");
    assert_eq!(cache.len(), 1);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(cache.is_empty());
}
