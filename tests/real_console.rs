use std::env;

use wxlink::{Acquirer, Config};

fn should_run() -> bool {
    env::var("RUN_REAL_TESTS").map(|v| v == "1").unwrap_or(false)
}

/// Acquire one snapshot from a real console configured through `WX_*` variables.
#[tokio::test]
async fn real_console_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    if !should_run() {
        eprintln!("skipping real console test; set RUN_REAL_TESTS=1 to enable");
        return Ok(());
    }
    let _ = env_logger::builder().is_test(true).try_init();

    let snap = Acquirer::new(Config::from_env()).acquire().await?;
    eprintln!("console at {} returned {} samples", snap.address, snap.samples.len());
    for s in &snap.samples {
        eprintln!("  {:<24}{}", s.series, s.value);
    }
    assert!(snap.record.decoded_fields() > 0);
    Ok(())
}
