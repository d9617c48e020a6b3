use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::commands::Command;
use crate::endpoint::DeviceAddress;
use crate::error::WxError;
use crate::schema::ByteOrder;

/// Protocol family spoken by the console.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Discovery broadcast, then the client connects to the advertised port.
    #[default]
    Gateway,
    /// Search broadcast, then the console connects back to a client listener.
    Legacy,
}

impl Family {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gateway" => Some(Self::Gateway),
            "legacy" => Some(Self::Legacy),
            _ => None,
        }
    }

    #[must_use]
    pub const fn default_discovery_port(self) -> u16 {
        match self {
            Self::Gateway => 46000,
            Self::Legacy => 6000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub family: Family,
    /// Broadcast or unicast target of the discovery datagram.
    pub station: String,
    /// Static `host:port`; skips discovery when set.
    pub address: Option<String>,
    pub discovery_port: Option<u16>,
    pub listen_port: u16,
    pub byte_order: ByteOrder,
    pub command: Command,
    pub discovery_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_deadline_ms: u64,
    pub settle_delay_ms: u64,
    pub accept_wait_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub dump_on_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            family: Family::Gateway,
            station: "255.255.255.255".to_string(),
            address: None,
            discovery_port: None,
            listen_port: 6500,
            byte_order: ByteOrder::Native,
            command: Command::LiveData,
            discovery_timeout_ms: 5000,
            connect_timeout_ms: 3000,
            read_deadline_ms: 5000,
            settle_delay_ms: 2000,
            accept_wait_ms: 10_000,
            max_retries: 5,
            retry_backoff_ms: 100,
            dump_on_error: false,
        }
    }
}

/// Variable lookup that remembers which keys were set but could not be used.
struct EnvReader<F> {
    lookup: F,
    rejected: Vec<&'static str>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn get<T>(&mut self, key: &'static str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let raw = self.raw(key)?;
        let parsed = parse(raw.trim());
        if parsed.is_none() {
            log::warn!("ignoring {key}={raw:?}: not a valid value, keeping the default");
            self.rejected.push(key);
        }
        parsed
    }

    fn number<T: std::str::FromStr>(&mut self, key: &'static str) -> Option<T> {
        self.get(key, |s| s.parse().ok())
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Read `WX_*` variables; unset ones keep their defaults and unparsable ones are
    /// logged at `warn` before falling back.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok()).0
    }

    /// Build from an arbitrary variable source. Also returns the keys that were set
    /// to unusable values.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<&'static str>) {
        let d = Self::default();
        let mut env = EnvReader {
            lookup,
            rejected: Vec::new(),
        };
        let cfg = Self {
            family: env.get("WX_FAMILY", Family::parse).unwrap_or(d.family),
            station: env.raw("WX_STATION").unwrap_or(d.station),
            address: env.raw("WX_ADDRESS").filter(|s| !s.is_empty()),
            discovery_port: env.number("WX_DISCOVERY_PORT"),
            listen_port: env.number("WX_LISTEN_PORT").unwrap_or(d.listen_port),
            byte_order: env
                .get("WX_BYTE_ORDER", ByteOrder::from_str)
                .unwrap_or(d.byte_order),
            command: env.get("WX_COMMAND", |s| s.parse().ok()).unwrap_or(d.command),
            discovery_timeout_ms: env
                .number("WX_DISCOVERY_TIMEOUT_MS")
                .unwrap_or(d.discovery_timeout_ms),
            connect_timeout_ms: env
                .number("WX_CONNECT_TIMEOUT_MS")
                .unwrap_or(d.connect_timeout_ms),
            read_deadline_ms: env.number("WX_READ_DEADLINE_MS").unwrap_or(d.read_deadline_ms),
            settle_delay_ms: env.number("WX_SETTLE_DELAY_MS").unwrap_or(d.settle_delay_ms),
            accept_wait_ms: env.number("WX_ACCEPT_WAIT_MS").unwrap_or(d.accept_wait_ms),
            max_retries: env.number("WX_MAX_RETRIES").unwrap_or(d.max_retries),
            retry_backoff_ms: env.number("WX_RETRY_BACKOFF_MS").unwrap_or(d.retry_backoff_ms),
            dump_on_error: env
                .get("WX_DUMP_ON_ERROR", parse_flag)
                .unwrap_or(d.dump_on_error),
        };
        (cfg, env.rejected)
    }

    /// Parse a TOML document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `WxError::Config` when the document is malformed.
    pub fn from_toml_str(s: &str) -> Result<Self, WxError> {
        toml::from_str(s).map_err(|e| WxError::Config(format!("parse config: {e}")))
    }

    /// # Errors
    ///
    /// Returns `WxError::Config` when the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, WxError> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| WxError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&s)
    }

    #[must_use]
    pub fn discovery_port(&self) -> u16 {
        self.discovery_port
            .unwrap_or_else(|| self.family.default_discovery_port())
    }

    /// Discovery datagram destination, `station:discovery_port`.
    #[must_use]
    pub fn discovery_target(&self) -> String {
        format!("{}:{}", self.station, self.discovery_port())
    }

    /// The configured static address, if any.
    ///
    /// # Errors
    ///
    /// Returns `WxError::Config` when `address` is set but is not `host:port`.
    pub fn static_address(&self) -> Result<Option<DeviceAddress>, WxError> {
        self.address.as_deref().map(str::parse).transpose()
    }

    #[must_use]
    pub const fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    #[must_use]
    pub const fn read_deadline(&self) -> Duration {
        Duration::from_millis(self.read_deadline_ms)
    }
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    #[must_use]
    pub const fn accept_wait(&self) -> Duration {
        Duration::from_millis(self.accept_wait_ms)
    }
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Environment snapshot taken at first access. Components never read it implicitly;
/// binaries pass it (or a clone) in.
pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

/// Convenience accessor
pub fn config() -> &'static Config {
    &GLOBAL_CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_and_defaults() {
        let cfg = Config::from_toml_str(
            r#"
family = "legacy"
station = "192.168.1.255"
byte_order = "little"
max_retries = 6
"#,
        )
        .expect("parse");
        assert_eq!(cfg.family, Family::Legacy);
        assert_eq!(cfg.discovery_port(), 6000);
        assert_eq!(cfg.byte_order, ByteOrder::Little);
        assert_eq!(cfg.max_retries, 6);
        assert_eq!(cfg.listen_port, 6500);
        assert_eq!(cfg.discovery_target(), "192.168.1.255:6000");
    }

    #[test]
    fn gateway_port_default_and_static_address() {
        let cfg = Config::from_toml_str("address = \"10.1.1.9:45000\"").expect("parse");
        assert_eq!(cfg.discovery_port(), 46000);
        let addr = cfg.static_address().expect("valid").expect("set");
        assert_eq!(addr.port, 45000);
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    #[test]
    fn env_values_are_parsed() {
        let (cfg, rejected) = Config::from_lookup(lookup(&[
            ("WX_FAMILY", "Legacy"),
            ("WX_BYTE_ORDER", "be"),
            ("WX_COMMAND", "rain_data"),
            ("WX_MAX_RETRIES", "2"),
            ("WX_DUMP_ON_ERROR", "1"),
        ]));
        assert!(rejected.is_empty());
        assert_eq!(cfg.family, Family::Legacy);
        assert_eq!(cfg.byte_order, ByteOrder::Big);
        assert_eq!(cfg.command, Command::RainData);
        assert_eq!(cfg.max_retries, 2);
        assert!(cfg.dump_on_error);
        assert_eq!(cfg.read_deadline_ms, 5000);
    }

    #[test]
    fn unusable_env_values_are_reported() {
        let (cfg, rejected) = Config::from_lookup(lookup(&[
            ("WX_FAMILY", "serial"),
            ("WX_MAX_RETRIES", "many"),
            ("WX_LISTEN_PORT", "70000"),
            ("WX_DUMP_ON_ERROR", "maybe"),
            ("WX_STATION", "192.168.1.255"),
        ]));
        assert_eq!(
            rejected,
            ["WX_FAMILY", "WX_LISTEN_PORT", "WX_MAX_RETRIES", "WX_DUMP_ON_ERROR"]
        );
        assert_eq!(cfg.family, Family::Gateway);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.listen_port, 6500);
        assert!(!cfg.dump_on_error);
        assert_eq!(cfg.station, "192.168.1.255");
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = Config::from_toml_str("max_retries = \"many\"").expect_err("bad type");
        assert!(matches!(err, WxError::Config(_)));
    }
}
