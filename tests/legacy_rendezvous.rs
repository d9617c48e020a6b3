use std::time::Duration;

use tokio::net::UdpSocket;
use wxlink::rendezvous::{read_packet, Rendezvous};
use wxlink::schema::{ByteOrder, LIVE_DATA};
use wxlink::{decode, Acquirer, Config, Family, SessionClient, Value};
use wxlink_mock::{ConsoleProfile, MockConsole};

fn native_profile() -> ConsoleProfile {
    ConsoleProfile {
        byte_order: ByteOrder::Native,
        ..ConsoleProfile::default()
    }
}

// a port nobody holds right now
fn free_port() -> std::io::Result<u16> {
    let l = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(l.local_addr()?.port())
}

#[tokio::test]
async fn console_dials_back_and_serves_nowrecord() -> Result<(), Box<dyn std::error::Error>> {
    let rv = Rendezvous::bind("127.0.0.1:0".parse()?, Duration::from_secs(2))?;
    let target = rv.local_addr()?;
    let console = MockConsole::with_profile(native_profile());
    let c = console.clone();
    tokio::spawn(async move {
        let _ = c.call_back(target).await;
    });

    let (stream, peer) = rv.accept().await?;
    let session = SessionClient::new(Duration::from_secs(1), Duration::from_secs(2))
        .with_settle_delay(Duration::ZERO);
    let resp = session
        .exchange(stream, &peer.to_string(), &read_packet("NOWRECORD")?, Some(104))
        .await?;
    assert!(resp.complete);

    let rec = decode(&resp.bytes, LIVE_DATA, ByteOrder::Native);
    assert!(rec.is_complete());
    assert_eq!(rec.get("HP_TABLE").and_then(Value::as_str), Some("NOWRECORD"));
    assert_eq!(rec.get("temperature_outdoor"), Some(&Value::Float(46.0)));
    assert_eq!(console.record_requests(), 1);
    Ok(())
}

#[tokio::test]
async fn legacy_acquisition_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let listen_port = free_port()?;
    let udp = UdpSocket::bind("127.0.0.1:0").await?;
    let udp_port = udp.local_addr()?.port();
    let console = MockConsole::with_profile(ConsoleProfile {
        callback_port: listen_port,
        ..native_profile()
    });
    let c = console.clone();
    tokio::spawn(async move {
        let _ = c.run_discovery_on(udp).await;
    });

    let cfg = Config {
        family: Family::Legacy,
        station: "127.0.0.1".into(),
        discovery_port: Some(udp_port),
        listen_port,
        byte_order: ByteOrder::Native,
        settle_delay_ms: 0,
        accept_wait_ms: 2000,
        retry_backoff_ms: 0,
        ..Config::default()
    };
    let snap = Acquirer::new(cfg).acquire().await?;
    assert!(snap.complete);
    assert_eq!(snap.address.host, "127.0.0.1");
    let temp = snap
        .samples
        .iter()
        .find(|s| s.series == "temperature_outdoor")
        .expect("temperature sample");
    assert!((temp.value - 46.0).abs() < f64::EPSILON);
    Ok(())
}
