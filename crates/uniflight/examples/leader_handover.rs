// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shows what happens to a flight when its leader does not finish normally.
//!
//! A leader that gives up hands the work to a caller still waiting on the flight. A leader
//! that panics fails the whole flight with `LeaderPanicked`, and the next call starts over.

use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::{Instant, sleep, timeout};
use uniflight::Merger;

async fn render_slowly(by: &str) -> String {
    sleep(Duration::from_millis(200)).await;
    format!("report rendered by the {by}")
}

async fn render_broken_invoice() -> String {
    sleep(Duration::from_millis(20)).await;
    panic!("invoice template is missing")
}

#[tokio::main]
async fn main() {
    let merger = Merger::<&str, String>::new();
    let start = Instant::now();

    println!("A leader that gives up after 50ms:");
    let leader = timeout(
        Duration::from_millis(50),
        merger.execute(&"report", || render_slowly("leader")),
    );
    let follower = async {
        sleep(Duration::from_millis(10)).await;
        merger.execute(&"report", || render_slowly("follower")).await
    };

    let (leader, follower) = tokio::join!(leader, follower);
    match leader {
        Ok(report) => println!("  leader:   {report:?}"),
        Err(_elapsed) => println!("  leader:   timed out"),
    }
    match follower {
        Ok(report) => println!("  follower: {report} after {:?}", start.elapsed()),
        Err(error) => println!("  follower: {error}"),
    }

    println!("\nA leader that panics:");
    let callers = (0..3).map(|_| merger.execute(&"invoice", render_broken_invoice));
    for (caller, outcome) in join_all(callers).await.into_iter().enumerate() {
        match outcome {
            Ok(invoice) => println!("  caller {caller}: {invoice}"),
            Err(error) => println!("  caller {caller}: {error}"),
        }
    }

    let retry = merger
        .execute(&"invoice", || async { "invoice #7".to_string() })
        .await;
    println!("  next call: {retry:?}");
}
