//! Where samples go once a snapshot is acquired.

use std::io::Write;

use crate::emitter::Sample;
use crate::error::WxError;

/// Write capability injected by the caller. Samples arrive in emission order.
pub trait SampleSink {
    /// # Errors
    ///
    /// Implementation defined; adapters here report `WxError::Sink`.
    fn write_batch(&mut self, samples: &[Sample]) -> Result<(), WxError>;
}

/// Keeps every batch in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub samples: Vec<Sample>,
    pub batches: usize,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleSink for MemorySink {
    fn write_batch(&mut self, samples: &[Sample]) -> Result<(), WxError> {
        self.samples.extend_from_slice(samples);
        self.batches += 1;
        Ok(())
    }
}

/// InfluxDB line protocol, one `series value=<v> <ts>` line per sample.
pub struct LineProtocolSink<W: Write> {
    out: W,
}

impl<W: Write> LineProtocolSink<W> {
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> SampleSink for LineProtocolSink<W> {
    fn write_batch(&mut self, samples: &[Sample]) -> Result<(), WxError> {
        for s in samples {
            writeln!(self.out, "{} value={} {}", s.series, s.value, s.timestamp)
                .map_err(|e| WxError::Sink(format!("line protocol write: {e}")))?;
        }
        self.out
            .flush()
            .map_err(|e| WxError::Sink(format!("line protocol flush: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(series: &str, value: f64) -> Sample {
        Sample {
            series: series.into(),
            value,
            timestamp: 1_677_369_300,
        }
    }

    #[test]
    fn line_protocol_format() {
        let mut sink = LineProtocolSink::new(Vec::new());
        sink.write_batch(&[sample("temperature_outdoor", 46.0), sample("uv_index", 1.0)])
            .expect("write");
        let text = String::from_utf8(sink.into_inner()).expect("utf8");
        assert_eq!(
            text,
            "temperature_outdoor value=46 1677369300\nuv_index value=1 1677369300\n"
        );
    }

    #[test]
    fn memory_sink_keeps_order_across_batches() {
        let mut sink = MemorySink::new();
        sink.write_batch(&[sample("a", 1.0)]).expect("write");
        sink.write_batch(&[]).expect("write");
        sink.write_batch(&[sample("b", 2.5)]).expect("write");
        assert_eq!(sink.batches, 3);
        let names: Vec<_> = sink.samples.iter().map(|s| s.series.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
