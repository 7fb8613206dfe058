//!
//! Pool behavior tests over real worker processes
//!
mod common;

use std::time::Duration;

use common::Fixture;
use qjazz_pool::messages as msg;
use qjazz_pool::{restore, Error, Pool, Receiver};

fn pool(fixture: &Fixture, num_processes: usize) -> Pool {
    let mut builder = fixture.builder();
    builder.num_processes(num_processes).unwrap();
    Pool::new(builder)
}

// Wait for the recycler tasks to hand workers back
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_pool_lifecycle() {
    let fixture = Fixture::new();
    let mut pool = pool(&fixture, 3);

    pool.maintain_pool().await.unwrap();
    assert_eq!(pool.num_workers(), 3);

    let receiver = Receiver::new(&pool);

    {
        let mut w = receiver.get().await.unwrap();
        assert_eq!(w.ping("hello").await.unwrap(), "hello");
        w.done();
    }
    settle().await;

    pool.close(Duration::from_secs(5)).await;
    assert!(receiver.is_closed());
    assert!(matches!(receiver.get().await, Err(Error::QueueIsClosed)));
}

#[tokio::test]
async fn test_pool_rescale() {
    let fixture = Fixture::new();
    let mut pool = pool(&fixture, 3);

    pool.maintain_pool().await.unwrap();
    assert_eq!(pool.num_workers(), 3);

    // Shrink
    pool.patch_config(&serde_json::json!({
        "worker": { "num_processes": 1 }
    }))
    .await
    .unwrap();
    assert_eq!(pool.num_workers(), 1);

    // Grow back
    pool.patch_config(&serde_json::json!({
        "worker": { "num_processes": 2 }
    }))
    .await
    .unwrap();
    assert_eq!(pool.num_workers(), 2);

    pool.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_pool_restore_pinned_projects() {
    let fixture = Fixture::new();
    let mut pool = pool(&fixture, 1);
    pool.maintain_pool().await.unwrap();

    let receiver = Receiver::new(&pool);

    // Record the pinned project; idle workers are drained and
    // resynchronized by the recycler.
    receiver
        .update_cache(restore::State::Pull("/france/france_parts".into()))
        .await;
    settle().await;

    {
        let mut w = receiver.get().await.unwrap();
        let info = w
            .checkout_project("/france/france_parts", false)
            .await
            .unwrap();
        assert_eq!(info.status, msg::CheckoutStatus::UNCHANGED);
        assert!(info.pinned);
        w.done();
    }
    settle().await;

    // Removal propagates the same way
    receiver
        .update_cache(restore::State::Remove("/france/france_parts".into()))
        .await;
    settle().await;

    {
        let mut w = receiver.get().await.unwrap();
        let info = w
            .checkout_project("/france/france_parts", false)
            .await
            .unwrap();
        assert_eq!(info.status, msg::CheckoutStatus::NEW);
        w.done();
    }
    settle().await;

    pool.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_pool_restore_on_spawn() {
    let fixture = Fixture::new();
    let mut builder = fixture.builder();
    builder.num_processes(1).unwrap();
    builder.restore_projects(vec!["/france/france_parts".to_string()]);

    let mut pool = Pool::new(builder);
    pool.maintain_pool().await.unwrap();

    let receiver = Receiver::new(&pool);
    {
        let mut w = receiver.get().await.unwrap();
        let info = w
            .checkout_project("/france/france_parts", false)
            .await
            .unwrap();
        assert_eq!(info.status, msg::CheckoutStatus::UNCHANGED);
        w.done();
    }
    settle().await;

    pool.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_pool_max_waiting_requests() {
    let fixture = Fixture::new();
    let mut builder = fixture.builder();
    builder.num_processes(1).unwrap();
    builder
        .patch(&serde_json::json!({
            "worker": { "max_waiting_requests": 1 }
        }))
        .unwrap();

    let mut pool = Pool::new(builder);
    pool.maintain_pool().await.unwrap();

    let receiver = Receiver::new(&pool);

    // Hold the only worker
    let held = receiver.get().await.unwrap();

    // First extra request waits...
    let waiting = {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.get().await.map(|mut w| w.done()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // ...the next one is rejected immediately
    assert!(matches!(
        receiver.get().await,
        Err(Error::MaxRequestsExceeded)
    ));

    drop(held);
    waiting.await.unwrap().unwrap();
    settle().await;

    pool.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_pool_reload_generation() {
    let fixture = Fixture::new();
    let mut pool = pool(&fixture, 1);
    pool.maintain_pool().await.unwrap();

    let receiver = Receiver::new(&pool);
    // Invalidate the current generation: recycled workers are
    // terminated and replaced by the maintainer.
    receiver.reload();
    settle().await;

    assert!(pool.dead_workers() > 0);
    pool.maintain_pool().await.unwrap();
    assert_eq!(pool.num_workers(), 1);

    {
        let mut w = receiver.get().await.unwrap();
        assert_eq!(w.ping("hello").await.unwrap(), "hello");
        w.done();
    }
    settle().await;

    pool.close(Duration::from_secs(5)).await;
}
