use std::io;

use wxlink::{config, Acquirer, LineProtocolSink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // wire dumps and tracing events both end up here; try RUST_LOG=debug
    env_logger::init();

    // WX_FAMILY, WX_STATION, WX_ADDRESS, ... see Config::from_env
    let cfg = config().clone();
    let target = cfg
        .address
        .clone()
        .unwrap_or_else(|| cfg.discovery_target());
    eprintln!("Recording {} via {target}", cfg.command.as_str());

    let acquirer = Acquirer::new(cfg);
    let mut sink = LineProtocolSink::new(io::stdout().lock());
    match acquirer.acquire_into(&mut sink).await {
        Ok(n) => {
            eprintln!("Wrote {n} samples");
            Ok(())
        }
        Err(e) => {
            eprintln!("Acquisition failed: {e}");
            Err(e.into())
        }
    }
}
