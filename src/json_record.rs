//! Samples from the JSON records served by the HTTP-polling console variants.
//!
//! Fetching is the caller's business; this only maps an already parsed object.

use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value as Json};

use crate::emitter::Sample;
use crate::error::WxError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Float,
    Int,
    /// ISO-8601 date, published as epoch seconds.
    Time,
    /// Known key, never published.
    Ignore,
}

#[derive(Clone, Copy, Debug)]
pub struct JsonField {
    pub key: &'static str,
    pub kind: Kind,
    pub series: Option<&'static str>,
}

const fn float(key: &'static str, series: &'static str) -> JsonField {
    JsonField {
        key,
        kind: Kind::Float,
        series: Some(series),
    }
}

const fn int(key: &'static str, series: &'static str) -> JsonField {
    JsonField {
        key,
        kind: Kind::Int,
        series: Some(series),
    }
}

const fn time(key: &'static str, series: &'static str) -> JsonField {
    JsonField {
        key,
        kind: Kind::Time,
        series: Some(series),
    }
}

const fn ignore(key: &'static str) -> JsonField {
    JsonField {
        key,
        kind: Kind::Ignore,
        series: None,
    }
}

/// Observation time: epoch milliseconds, or a UTC date string on local gateways.
pub const TIMESTAMP_KEY: &str = "dateutc";

/// Keys of the cloud service's device records.
pub static AMBIENT_FIELDS: &[JsonField] = &[
    ignore("dateutc"),
    float("tempinf", "temperature_indoor"),
    int("battin", "battery_indoor"),
    int("humidityin", "humidity_indoor"),
    float("baromrelin", "pressure_relative"),
    float("baromabsin", "pressure_absolute"),
    float("tempf", "temperature_outdoor"),
    int("battout", "battery_outdoor"),
    int("battrain", "battery_rain"),
    int("humidity", "humidity_outdoor"),
    int("winddir", "wind_direction"),
    int("winddir_avg10m", "wind_direction_average_10m"),
    float("windspeedmph", "wind_speed"),
    float("windspdmph_avg10m", "wind_gust_average_10m"),
    float("windgustmph", "wind_gust"),
    float("maxdailygust", "wind_gust_max_daily"),
    float("hourlyrainin", "rain_hourly"),
    float("eventrainin", "rain_event"),
    float("dailyrainin", "rain_daily"),
    float("weeklyrainin", "rain_weekly"),
    float("monthlyrainin", "rain_monthly"),
    float("yearlyrainin", "rain_yearly"),
    float("solarradiation", "solar_radiation"),
    int("uv", "uv_index"),
    int("batt_co2", "battery_co2"),
    // computed server side
    float("feelsLike", "feels_like_outdoor"),
    float("dewPoint", "dew_point_outdoor"),
    float("feelsLikein", "feels_like_indoor"),
    float("dewPointin", "dew_point_indoor"),
    time("lastRain", "last_rain"),
    // same instant as dateutc
    ignore("date"),
    ignore("pm25_in"),
    ignore("pm25_in_24h"),
    ignore("aqi_pm25"),
    ignore("aqi_pm25_24h"),
    ignore("aqi_pm25_in"),
    ignore("aqi_pm25_in_24h"),
    ignore("batt_25in"),
];

/// Keys of a local gateway's JSON status page.
pub static GATEWAY_FIELDS: &[JsonField] = &[
    ignore("PASSKEY"),
    ignore("stationtype"),
    ignore("dateutc"),
    ignore("time"),
    ignore("brightness"),
    ignore("isintvl10"),
    float("baromabsin", "pressure_absolute"),
    float("baromrelin", "pressure_relative"),
    int("batt_co2", "battery_co2"),
    int("batterywarning", "warning_battery"),
    int("battin", "battery_indoor"),
    int("battout", "battery_outdoor"),
    int("battrain", "battery_rain"),
    int("co2warning", "warning_co2"),
    float("dailyrainin", "rain_daily"),
    float("dewptf", "dewpoint"),
    float("eventrainin", "rain_event"),
    float("feelslikef", "feels_like"),
    float("heatindexf", "heat_index"),
    float("hourlyrainin", "rain_hourly"),
    int("humidity", "humidity_outdoor"),
    int("humidityin", "humidity_indoor"),
    int("intvlwarning", "warning_interval"),
    int("isintvl", "interval"),
    int("leakwarning", "warning_leak"),
    float("maxdailygust", "wind_gust_max_daily"),
    float("monthlyrainin", "rain_monthly"),
    int("running", "running"),
    int("sensorwarning", "warning_sensor"),
    float("solarradiation", "solar_radiation"),
    int("stormwarning", "warning_storm"),
    float("sunhours", "sun_hours"),
    float("tempf", "temperature_outdoor"),
    float("tempinf", "temperature_indoor"),
    int("tswarning", "warning_thunderstorm"),
    int("updatewarning", "warning_update"),
    int("uv", "uv_index"),
    float("weeklyrainin", "rain_weekly"),
    float("windchillf", "windchill"),
    int("winddir", "wind_direction"),
    int("winddir_avg10m", "wind_direction_average_10m"),
    float("windgustmph", "wind_gust"),
    float("windgustmph_max10m", "wind_gust_max_10m"),
    float("windspdmph_avg10m", "wind_gust_average_10m"),
    float("windspeedmph", "wind_speed"),
    int("wswarning", "warning_watchdog"),
    float("yearlyrainin", "rain_yearly"),
];

/// Samples plus whatever could not be mapped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonEmission {
    pub samples: Vec<Sample>,
    pub unrecognized: Vec<String>,
    /// Known keys whose value had the wrong shape.
    pub malformed: Vec<String>,
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number(v: &Json) -> Option<f64> {
    match v {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse().ok(),
        Json::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

/// Epoch seconds of an RFC 3339 / ISO-8601 date, or of a bare `YYYY-MM-DD HH:MM:SS` in UTC.
fn epoch_seconds(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d+%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|dt| dt.and_utc().timestamp())
}

#[allow(clippy::cast_possible_truncation)]
fn timestamp(obj: &Map<String, Json>, fallback: i64) -> i64 {
    let Some(raw) = obj.get(TIMESTAMP_KEY).filter(|v| !v.is_null()) else {
        return fallback;
    };
    let parsed = match raw {
        Json::String(s) => epoch_seconds(s).or_else(|| number(raw).map(|ms| (ms / 1000.0) as i64)),
        _ => number(raw).map(|ms| (ms / 1000.0) as i64),
    };
    parsed.unwrap_or_else(|| {
        log::warn!("unparsable {TIMESTAMP_KEY} {raw}, using {fallback}");
        fallback
    })
}

/// Map one JSON object through `table`. Samples come out in key order.
///
/// # Errors
///
/// `WxError::Protocol` when `record` is not a JSON object.
pub fn emit_json(
    record: &Json,
    table: &[JsonField],
    fallback_timestamp: i64,
) -> Result<JsonEmission, WxError> {
    let obj = record
        .as_object()
        .ok_or_else(|| WxError::Protocol(format!("expected a JSON object, got {record}")))?;
    let ts = timestamp(obj, fallback_timestamp);
    let mut out = JsonEmission::default();
    for (key, value) in obj {
        let Some(field) = table.iter().find(|f| f.key == key) else {
            log::error!("unrecognized field '{key}'");
            out.unrecognized.push(key.clone());
            continue;
        };
        log::debug!(
            "{key:<19}{:<27}{value}",
            field.series.unwrap_or_default()
        );
        let Some(series) = field.series else { continue };
        if value.is_null() || field.kind == Kind::Ignore {
            continue;
        }
        let parsed = match field.kind {
            #[allow(clippy::cast_precision_loss)]
            Kind::Time => value.as_str().and_then(epoch_seconds).map(|t| t as f64),
            Kind::Int => number(value).map(f64::trunc),
            Kind::Float | Kind::Ignore => number(value),
        };
        let Some(v) = parsed else {
            log::warn!("malformed value for '{key}': {value}");
            out.malformed.push(key.clone());
            continue;
        };
        out.samples.push(Sample {
            series: series.to_string(),
            value: v,
            timestamp: ts,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_known_keys_and_reports_unknown() {
        let rec = json!({
            "dateutc": 1_677_369_300_000_i64,
            "tempf": 46,
            "humidityin": 43,
            "lastRain": "2023-02-25T14:14:00.000Z",
            "hourlyrainin": null,
            "brand_new_sensor": 1
        });
        let e = emit_json(&rec, AMBIENT_FIELDS, 0).expect("object");
        let got: Vec<_> = e
            .samples
            .iter()
            .map(|s| (s.series.as_str(), s.value, s.timestamp))
            .collect();
        assert!(got.contains(&("temperature_outdoor", 46.0, 1_677_369_300)));
        assert!(got.contains(&("humidity_indoor", 43.0, 1_677_369_300)));
        assert!(got.contains(&("last_rain", 1_677_334_440.0, 1_677_369_300)));
        assert_eq!(got.len(), 3);
        assert_eq!(e.unrecognized, ["brand_new_sensor"]);
    }

    #[test]
    fn falls_back_without_dateutc() {
        let rec = json!({ "uv": "3", "tempf": "warm" });
        let e = emit_json(&rec, GATEWAY_FIELDS, 42).expect("object");
        assert_eq!(e.samples.len(), 1);
        assert_eq!(e.samples[0].timestamp, 42);
        assert_eq!(e.samples[0].value, 3.0);
        assert_eq!(e.malformed, ["tempf"]);
    }

    #[test]
    fn gateway_date_string_sets_timestamp() {
        let rec = json!({ "dateutc": "2023-02-25 23:55:00", "tempf": "46.0" });
        let e = emit_json(&rec, GATEWAY_FIELDS, 7).expect("object");
        assert_eq!(e.samples.len(), 1);
        assert_eq!(e.samples[0].series, "temperature_outdoor");
        assert_eq!(e.samples[0].timestamp, 1_677_369_300);
    }

    #[test]
    fn unparsable_dateutc_falls_back() {
        let rec = json!({ "dateutc": "yesterday", "uv": 2 });
        let e = emit_json(&rec, GATEWAY_FIELDS, 7).expect("object");
        assert_eq!(e.samples[0].timestamp, 7);
    }

    #[test]
    fn last_rain_is_epoch_seconds() {
        assert_eq!(epoch_seconds("2023-02-25T14:14:00.000Z"), Some(1_677_334_440));
        assert_eq!(epoch_seconds("2023-02-25T15:14:00+01:00"), Some(1_677_334_440));
        let rec = json!({ "lastRain": "not a date" });
        let e = emit_json(&rec, AMBIENT_FIELDS, 0).expect("object");
        assert!(e.samples.is_empty());
        assert_eq!(e.malformed, ["lastRain"]);
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            emit_json(&json!([1, 2]), AMBIENT_FIELDS, 0),
            Err(WxError::Protocol(_))
        ));
    }

    #[test]
    fn tables_have_unique_keys() {
        for table in [AMBIENT_FIELDS, GATEWAY_FIELDS] {
            let mut keys: Vec<_> = table.iter().map(|f| f.key).collect();
            keys.sort_unstable();
            keys.dedup();
            assert_eq!(keys.len(), table.len());
        }
    }
}
