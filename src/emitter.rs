use serde::{Deserialize, Serialize};

use crate::record::DecodedRecord;
use crate::schema::{FieldSpec, ValidRange};

/// One normalized measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub series: String,
    pub value: f64,
    pub timestamp: i64,
}

/// A measurement dropped because it failed its validator.
#[derive(Clone, Debug, PartialEq)]
pub struct OutOfRange {
    pub series: &'static str,
    pub value: f64,
    pub range: ValidRange,
}

impl std::fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {} outside {}", self.series, self.value, self.range)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Emission {
    pub samples: Vec<Sample>,
    pub rejected: Vec<OutOfRange>,
}

/// Turn a decoded record into samples, in declaration order.
///
/// Null values, unpublished slots and non-numeric values are skipped. A value outside
/// its range is moved to `rejected`; the caller decides how to report it.
#[must_use]
pub fn emit(record: &DecodedRecord, specs: &[FieldSpec], timestamp: i64) -> Emission {
    let mut out = Emission::default();
    for (spec, entry) in specs.iter().zip(record.iter()) {
        let Some(series) = spec.series else { continue };
        let Some(value) = entry.value.as_ref().and_then(|v| v.as_f64()) else {
            continue;
        };
        if let Some(range) = spec.valid_range {
            if !range.contains(value) {
                out.rejected.push(OutOfRange {
                    series,
                    value,
                    range,
                });
                continue;
            }
        }
        out.samples.push(Sample {
            series: series.to_string(),
            value,
            timestamp,
        });
    }
    out
}
