use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{info, Level};

use wxlink_mock::{ConsoleProfile, MockConsole};

#[derive(Parser, Debug)]
#[command(name = "wxlink-mock", about = "Fake weather-station console")]
struct Cli {
    /// Address to bind both sockets to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// UDP port answering discovery and legacy search datagrams.
    #[arg(long, default_value_t = 46000)]
    udp_port: u16,

    /// TCP port serving record requests; advertised in discovery replies.
    #[arg(long, default_value_t = 45000)]
    tcp_port: u16,

    /// TOML console profile (identity, readings, scripted faults).
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Print the effective profile as JSON and exit.
    #[arg(long)]
    dump_profile: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn udp_socket(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut profile = match &cli.profile {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read profile {}", path.display()))?;
            ConsoleProfile::from_toml_str(&text)?
        }
        None => ConsoleProfile::default(),
    };
    profile.port = cli.tcp_port;
    if let IpAddr::V4(v4) = cli.bind {
        if !v4.is_unspecified() {
            profile.ip = v4.octets();
        }
    }

    if cli.dump_profile {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }

    let console = MockConsole::with_profile(profile);
    let udp = udp_socket(SocketAddr::new(cli.bind, cli.udp_port))?;
    let tcp = TcpListener::bind(SocketAddr::new(cli.bind, cli.tcp_port)).await?;
    info!(udp = %udp.local_addr()?, tcp = %tcp.local_addr()?, "mock console up");

    let discovery = {
        let console = console.clone();
        tokio::spawn(async move { console.run_discovery_on(udp).await })
    };
    let sessions = tokio::spawn(async move { console.run_listener_on(tcp).await });

    tokio::select! {
        r = discovery => r??,
        r = sessions => r??,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
