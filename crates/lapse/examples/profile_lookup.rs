// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serves user profiles from a bounded cache in front of a slow backend.
//!
//! Concurrent lookups of a missing profile share one backend call, entries expire after
//! about two seconds and the cache logs its hit ratio every five seconds.

use std::{
    io,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use futures::future::join_all;
use lapse::Cache;

static BACKEND_CALLS: AtomicUsize = AtomicUsize::new(0);

async fn load_profile(id: u64) -> Result<String, io::Error> {
    BACKEND_CALLS.fetch_add(1, Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(200)).await;
    if id == 0 {
        return Err(io::Error::new(io::ErrorKind::NotFound, "no user with id 0"));
    }
    Ok(format!("user-{id}"))
}

#[tokio::main]
async fn main() -> Result<(), lapse::Error> {
    tracing_subscriber::fmt().init();

    let cache = Cache::builder(Duration::from_secs(2))
        .name("profiles")
        .limit(100)
        .stats_interval(Duration::from_secs(5))
        .build()?;

    for round in 1..=3 {
        let lookups = (0..4).flat_map(|id| [id, id]).map(|id| {
            let cache = &cache;
            async move { (id, cache.take(&id, || load_profile(id)).await) }
        });

        for (id, profile) in join_all(lookups).await {
            match profile {
                Ok(name) => println!("round {round}: {id} -> {name}"),
                Err(error) => println!("round {round}: {id} failed: {error}"),
            }
        }
        println!(
            "round {round}: {} cached, {} backend calls so far\n",
            cache.len(),
            BACKEND_CALLS.load(Ordering::Relaxed)
        );

        tokio::time::sleep(Duration::from_millis(1_500)).await;
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}
