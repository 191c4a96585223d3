//! Example: a throwaway Redis for a test session
//!
//! Starts Redis with a healthcheck, prints where it listens, and purges it.
//! A second run shows what happens when the caller gives up waiting.
//!
//! Run with: cargo run --example redis_session

use std::time::Duration;

use dockpool::{options, Pool, PoolConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== dockpool Redis Example ===\n");

    let pool = match Pool::connect(&PoolConfig::from_env()).await {
        Ok(pool) => pool,
        Err(e) => {
            println!("Docker not available: {}", e);
            println!("(This is expected if Docker is not running)");
            return Ok(());
        }
    };

    println!("Step 1: Run with a healthcheck");
    println!("------------------------------");
    run_healthy(&pool).await?;

    println!("\nStep 2: Give up on a slow container");
    println!("------------------------------");
    run_with_deadline(&pool).await?;

    Ok(())
}

async fn run_healthy(pool: &Pool) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let redis = pool
        .run(
            "redis:7",
            [
                options::with_container_name("dockpool-example-redis"),
                options::with_healthcheck_shell("redis-cli ping", Duration::from_millis(500)),
                options::with_health_retries(20),
            ],
            &cancel,
        )
        .await?;

    println!("Container: {}", redis.id());
    println!("Redis at:  {}", redis.host_port("tcp", "6379")?);

    pool.purge(Some(&redis), &cancel).await?;
    println!("Purged");
    Ok(())
}

async fn run_with_deadline(pool: &Pool) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    // The probe never passes, so only the deadline ends the wait.
    let result = pool
        .run(
            "redis:7",
            [options::with_healthcheck_shell("exit 1", Duration::from_millis(500))],
            &cancel,
        )
        .await;

    match result {
        Ok(redis) => {
            println!("Unexpectedly healthy: {}", redis.id());
            pool.purge(Some(&redis), &CancellationToken::new()).await?;
        }
        Err(e) => {
            println!("Gave up: {}", e);
            if let Some(orphan) = e.orphan() {
                pool.purge(Some(&orphan), &CancellationToken::new()).await?;
                println!("Purged orphan {}", orphan.id());
            }
        }
    }
    Ok(())
}
