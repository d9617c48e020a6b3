use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use wxlink::discovery::{DiscoveryClient, DISCOVERY_RETRYABLE};
use wxlink::{DeviceAddress, RetryPolicy, WxError};
use wxlink_mock::{ConsoleProfile, MockConsole};

async fn spawn_console(
    profile: ConsoleProfile,
) -> Result<(MockConsole, SocketAddr), Box<dyn std::error::Error>> {
    let console = MockConsole::with_profile(profile);
    let sock = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = sock.local_addr()?;
    let c = console.clone();
    tokio::spawn(async move {
        let _ = c.run_discovery_on(sock).await;
    });
    Ok((console, addr))
}

#[tokio::test]
async fn single_console_answers() -> Result<(), Box<dyn std::error::Error>> {
    let (console, addr) = spawn_console(ConsoleProfile::default()).await?;

    let client = DiscoveryClient::new(addr.to_string(), Duration::from_secs(2));
    let found = client.discover_console().await?;
    assert_eq!(found.address, DeviceAddress::new("192.168.1.50", 45000));
    assert_eq!(found.mac_string(), "AA:BB:CC:DD:EE:FF");
    assert_eq!(console.discovery_polls(), 1);
    Ok(())
}

#[tokio::test]
async fn corrupt_and_noise_are_skipped_within_one_wait() -> Result<(), Box<dyn std::error::Error>> {
    let profile = ConsoleProfile {
        corrupt_replies: 3,
        noise_datagrams: 2,
        ..ConsoleProfile::default()
    };
    let (console, addr) = spawn_console(profile).await?;

    let client = DiscoveryClient::new(addr.to_string(), Duration::from_secs(2))
        .with_retry(RetryPolicy::new(0, DISCOVERY_RETRYABLE));
    let found = client.discover().await?;
    assert_eq!(found.port, 45000);
    assert_eq!(console.discovery_polls(), 1);
    Ok(())
}

#[tokio::test]
async fn only_corrupt_replies_time_out() -> Result<(), Box<dyn std::error::Error>> {
    let profile = ConsoleProfile {
        corrupt_replies: usize::MAX,
        ..ConsoleProfile::default()
    };
    let (_console, addr) = spawn_console(profile).await?;

    let client = DiscoveryClient::new(addr.to_string(), Duration::from_millis(100))
        .with_retry(RetryPolicy::new(1, DISCOVERY_RETRYABLE));
    let err = client.discover().await.expect_err("no valid reply");
    assert!(matches!(err, WxError::DiscoveryFailed { attempts: 2, .. }), "got {err}");
    Ok(())
}

#[tokio::test]
async fn retry_bound_is_five_retries() -> Result<(), Box<dyn std::error::Error>> {
    let profile = ConsoleProfile {
        ignore_polls: usize::MAX,
        ..ConsoleProfile::default()
    };
    let (console, addr) = spawn_console(profile).await?;

    let client = DiscoveryClient::new(addr.to_string(), Duration::from_millis(50))
        .with_retry(RetryPolicy::new(5, DISCOVERY_RETRYABLE));
    let err = client.discover().await.expect_err("silent console");
    match err {
        WxError::DiscoveryFailed { attempts, .. } => assert_eq!(attempts, 6),
        other => panic!("unexpected error: {other}"),
    }
    // first attempt plus five retries
    assert_eq!(console.discovery_polls(), 6);
    Ok(())
}

#[tokio::test]
async fn recovers_when_console_wakes_up() -> Result<(), Box<dyn std::error::Error>> {
    let profile = ConsoleProfile {
        ignore_polls: 2,
        ..ConsoleProfile::default()
    };
    let (console, addr) = spawn_console(profile).await?;

    let client = DiscoveryClient::new(addr.to_string(), Duration::from_millis(100))
        .with_retry(RetryPolicy::new(5, DISCOVERY_RETRYABLE));
    client.discover().await?;
    assert_eq!(console.discovery_polls(), 3);
    Ok(())
}
