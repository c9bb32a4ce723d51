use anyhow::Result;
use shard_metrics::{ConcurrentDistribution, Distribution};
use std::sync::Arc;
use std::time::Duration;

/// Drive the library the way a reporting pipeline does: writer threads
/// record continuously while an async reporter drains the distribution on
/// a fixed interval. Every recorded measurement must show up in exactly
/// one drained digest.
#[tokio::test]
async fn periodic_reporter_drains_everything_exactly_once() -> Result<()> {
    let distribution = Arc::new(ConcurrentDistribution::with_min_shards(8)?);

    let threads = 4;
    let per_thread = 5_000u64;

    let writers: Vec<_> = (0..threads)
        .map(|_| {
            let distribution = Arc::clone(&distribution);
            std::thread::spawn(move || {
                for i in 0..per_thread {
                    distribution.record(i as f64);
                }
            })
        })
        .collect();

    let mut interval = tokio::time::interval(Duration::from_millis(5));
    let mut drained = 0u64;
    let mut reports = 0u32;
    loop {
        interval.tick().await;
        drained += distribution.digest_and_flush().count();
        reports += 1;
        if writers.iter().all(|w| w.is_finished()) {
            break;
        }
    }
    for writer in writers {
        writer.join().unwrap();
    }

    // One last drain for whatever landed after the final tick.
    drained += distribution.digest_and_flush().count();

    assert_eq!(drained, threads as u64 * per_thread);
    assert!(reports >= 1);
    assert_eq!(distribution.count(), 0);
    Ok(())
}
