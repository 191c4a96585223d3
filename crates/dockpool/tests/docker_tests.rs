//! Tests against a live Docker daemon.
//!
//! Ignored by default. Run with `cargo test -- --ignored` on a machine where
//! `DOCKER_HOST` or the local socket reaches a daemon that can pull from
//! Docker Hub.

use std::time::Duration;

use anyhow::Result;
use dockpool::{options, Pool, PoolConfig, PoolError, Resource, Step};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer().with_target(false))
        .with(EnvFilter::from_default_env().add_directive("dockpool=debug".parse().unwrap()))
        .try_init();
}

/// A token that fires after `timeout`.
fn deadline(timeout: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        trigger.cancel();
    });
    cancel
}

async fn cleanup(pool: &Pool, resource: Option<&Resource>) {
    if let Err(e) = pool.purge(resource, &CancellationToken::new()).await {
        if !e.is_not_found() {
            panic!("purge failed: {e}");
        }
    }
}

/// Connecting pings the daemon.
#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_connect() -> Result<()> {
    init_logging();
    let pool = Pool::connect(&PoolConfig::from_env()).await?;
    pool.engine().ping().await?;
    Ok(())
}

/// An image without a healthcheck is returned as soon as it starts.
#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_run_no_healthcheck() -> Result<()> {
    init_logging();
    let pool = Pool::new().await?;

    let resource = pool
        .run("warashi/nginx:none", [], &deadline(Duration::from_secs(60)))
        .await?;
    cleanup(&pool, Some(&resource)).await;
    Ok(())
}

/// An image whose own healthcheck passes is returned once healthy.
#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_run_image_healthcheck_passes() -> Result<()> {
    init_logging();
    let pool = Pool::new().await?;

    let resource = pool
        .run(
            "warashi/nginx:ok",
            [options::with_image_healthcheck()],
            &deadline(Duration::from_secs(60)),
        )
        .await?;
    cleanup(&pool, Some(&resource)).await;
    Ok(())
}

/// An image whose healthcheck never passes runs until the deadline.
#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_run_image_healthcheck_fails() -> Result<()> {
    init_logging();
    let pool = Pool::new().await?;

    // Warm the image so the deadline only covers the wait.
    let warm = pool
        .run("warashi/nginx:ng", [], &CancellationToken::new())
        .await?;
    cleanup(&pool, Some(&warm)).await;

    let err = pool
        .run(
            "warashi/nginx:ng",
            [options::with_image_healthcheck()],
            &deadline(Duration::from_secs(3)),
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.step(), Some(Step::WaitHealthy));
    cleanup(&pool, err.orphan().as_ref()).await;
    Ok(())
}

/// Pulling an unknown tag fails and leaves nothing to purge.
#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_run_missing_image() -> Result<()> {
    init_logging();
    let pool = Pool::new().await?;

    let err = pool
        .run("warashi/nginx:notexist", [], &deadline(Duration::from_secs(60)))
        .await
        .unwrap_err();

    assert_eq!(err.step(), Some(Step::PullImage));
    assert!(err.container_id().is_none());
    pool.purge(None, &CancellationToken::new()).await?;
    Ok(())
}

/// A platform hint is honored by pull and create.
#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_run_with_platform() -> Result<()> {
    init_logging();
    let pool = Pool::new().await?;

    let resource = pool
        .run(
            "warashi/nginx:ok",
            [options::with_platform("amd64"), options::with_image_healthcheck()],
            &deadline(Duration::from_secs(120)),
        )
        .await?;
    cleanup(&pool, Some(&resource)).await;
    Ok(())
}

/// An explicit healthcheck gates readiness without an image healthcheck.
#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_run_with_healthcheck() -> Result<()> {
    init_logging();
    let pool = Pool::new().await?;

    let resource = pool
        .run(
            "nginx:latest",
            [options::with_healthcheck_shell(
                "curl -fs http://localhost/ || exit 1",
                Duration::from_millis(500),
            )],
            &deadline(Duration::from_secs(60)),
        )
        .await?;
    cleanup(&pool, Some(&resource)).await;
    Ok(())
}

/// Bind mounts are visible inside the container.
#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_run_with_bind_mount() -> Result<()> {
    init_logging();
    let pool = Pool::new().await?;
    let dir = tempdir()?;
    std::fs::write(dir.path().join("index.html"), "hello from dockpool")?;

    let resource = pool
        .run(
            "nginx:latest",
            [
                options::with_bind_mount(dir.path(), "/usr/share/nginx/html"),
                options::with_healthcheck_shell(
                    "grep -q dockpool /usr/share/nginx/html/index.html",
                    Duration::from_millis(500),
                ),
            ],
            &deadline(Duration::from_secs(60)),
        )
        .await?;
    cleanup(&pool, Some(&resource)).await;
    Ok(())
}

/// Published ports resolve to host addresses; unknown ones do not.
#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_host_port() -> Result<()> {
    init_logging();
    let pool = Pool::new().await?;

    let resource = pool
        .run("nginx:latest", [], &deadline(Duration::from_secs(60)))
        .await?;

    let address = resource.host_port("tcp", "80")?;
    assert!(address.contains(':'), "unexpected address {address}");

    assert!(matches!(
        resource.host_port("tcp", "8080"),
        Err(PoolError::PortNotFound(_))
    ));
    assert!(matches!(
        resource.host_port("udp", "80"),
        Err(PoolError::PortNotFound(_))
    ));
    assert!(matches!(
        resource.host_port("http", "80"),
        Err(PoolError::InvalidPort(_))
    ));

    cleanup(&pool, Some(&resource)).await;
    Ok(())
}

/// Purging twice reports the container as gone.
#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_purge_twice() -> Result<()> {
    init_logging();
    let pool = Pool::new().await?;
    let cancel = CancellationToken::new();

    let resource = pool
        .run("nginx:latest", [], &deadline(Duration::from_secs(60)))
        .await?;
    pool.purge(Some(&resource), &cancel).await?;

    // Auto-remove finishes asynchronously after the kill.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let err = pool.purge(Some(&resource), &cancel).await.unwrap_err();
    assert_eq!(err.step(), Some(Step::KillContainer));
    assert!(err.is_not_found() || err.to_string().contains("not running"));
    Ok(())
}
