// Sampled channel data
use super::segments::{Segment, SegmentList};
use serde::{Deserialize, Serialize};

/// Storage width of the raw samples as recorded by the acquisition system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int16,
    Int32,
    Int64,
    Float32,
    #[default]
    Float64,
}

impl DataType {
    /// Most negative and most positive representable values.
    pub fn extremes(&self) -> (f64, f64) {
        match self {
            DataType::Int16 => (i16::MIN as f64, i16::MAX as f64),
            DataType::Int32 => (i32::MIN as f64, i32::MAX as f64),
            DataType::Int64 => (i64::MIN as f64, i64::MAX as f64),
            DataType::Float32 => (f32::MIN as f64, f32::MAX as f64),
            DataType::Float64 => (f64::MIN, f64::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStream {
    pub channel: String,
    pub start: f64,
    pub sample_rate: f64,
    #[serde(default)]
    pub dtype: DataType,
    pub values: Vec<f64>,
}

impl SampleStream {
    #[cfg(test)]
    pub fn new(
        channel: impl Into<String>,
        start: f64,
        sample_rate: f64,
        dtype: DataType,
        values: Vec<f64>,
    ) -> Self {
        Self {
            channel: channel.into(),
            start,
            sample_rate,
            dtype,
            values,
        }
    }

    pub fn dt(&self) -> f64 {
        1.0 / self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn time_at(&self, index: usize) -> f64 {
        self.start + index as f64 * self.dt()
    }

    pub fn end(&self) -> f64 {
        self.time_at(self.values.len())
    }

    fn index_of(&self, time: f64) -> usize {
        let offset = ((time - self.start) * self.sample_rate).round();
        if offset <= 0.0 {
            0
        } else {
            (offset as usize).min(self.values.len())
        }
    }

    /// Samples falling in `[start, end)`.
    pub fn crop(&self, start: f64, end: f64) -> SampleStream {
        let first = self.index_of(start);
        let last = self.index_of(end).max(first);
        SampleStream {
            channel: self.channel.clone(),
            start: self.time_at(first),
            sample_rate: self.sample_rate,
            dtype: self.dtype,
            values: self.values[first..last].to_vec(),
        }
    }

    /// True when `next` starts where this stream ends, at the same rate.
    pub fn is_contiguous_with(&self, next: &SampleStream) -> bool {
        self.sample_rate == next.sample_rate && (next.start - self.end()).abs() < self.dt() / 2.0
    }

    pub fn extend_from(&mut self, next: SampleStream) {
        self.values.extend(next.values);
    }

    /// Merges each run of consecutive matching samples into one segment
    /// `[first_time, last_time + dt)`.
    pub fn segments_where<F>(&self, mut matches: F) -> SegmentList
    where
        F: FnMut(usize, f64) -> bool,
    {
        let mut segments = Vec::new();
        let mut run_start: Option<usize> = None;
        for (i, &value) in self.values.iter().enumerate() {
            match (matches(i, value), run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(first)) => {
                    segments.push(Segment::new(self.time_at(first), self.time_at(i)));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(first) = run_start {
            segments.push(Segment::new(self.time_at(first), self.end()));
        }
        SegmentList::from_segments(segments)
    }

    pub fn times_where<F>(&self, mut matches: F) -> Vec<f64>
    where
        F: FnMut(usize, f64) -> bool,
    {
        self.values
            .iter()
            .enumerate()
            .filter(|&(i, &value)| matches(i, value))
            .map(|(i, _)| self.time_at(i))
            .collect()
    }
}
