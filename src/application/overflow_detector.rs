// Conversion overflow detection on raw channel samples
use crate::domain::segments::SegmentList;
use crate::domain::stream::SampleStream;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowRule {
    /// Sample equals the most negative or most positive value of its storage type
    #[default]
    Pinned,
    /// Cumulative counter went up since the previous sample
    Increment,
}

/// Data read before a span so the increment rule can judge the span's first
/// sample against its predecessor.
const INCREMENT_LEAD_IN: f64 = 1.0;

impl OverflowRule {
    /// Seconds of data needed ahead of a span to evaluate it.
    pub fn lead_in(self) -> f64 {
        match self {
            OverflowRule::Pinned => 0.0,
            OverflowRule::Increment => INCREMENT_LEAD_IN,
        }
    }
}

fn is_overflow(stream: &SampleStream, rule: OverflowRule, index: usize, value: f64) -> bool {
    match rule {
        OverflowRule::Pinned => {
            let (lo, hi) = stream.dtype.extremes();
            value == lo || value == hi
        }
        OverflowRule::Increment => index > 0 && value > stream.values[index - 1],
    }
}

/// Segments during which the stream is overflowing.
pub fn overflow_segments(stream: &SampleStream, rule: OverflowRule) -> SegmentList {
    stream.segments_where(|i, v| is_overflow(stream, rule, i, v))
}

/// Individual sample times at which the stream is overflowing.
pub fn overflow_times(stream: &SampleStream, rule: OverflowRule) -> Vec<f64> {
    stream.times_where(|i, v| is_overflow(stream, rule, i, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::segments::Segment;
    use crate::domain::stream::DataType;

    fn pinned_middle() -> SampleStream {
        let v = i16::MAX as f64;
        let values = vec![0.0, 1.0, 32766.0, v, v, v, -5.0, 0.0];
        SampleStream::new("FEC-8_ADC_OVERFLOW_0_0", 0.0, 1.0, DataType::Int16, values)
    }

    #[test]
    fn test_pinned_segment() {
        let segments = overflow_segments(&pinned_middle(), OverflowRule::Pinned);
        assert_eq!(segments, SegmentList::from_segments([Segment::new(3.0, 6.0)]));
    }

    #[test]
    fn test_pinned_events() {
        let times = overflow_times(&pinned_middle(), OverflowRule::Pinned);
        assert_eq!(times, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_negative_extreme_counts() {
        let values = vec![0.0, -32768.0, -32767.0];
        let stream = SampleStream::new("X", 10.0, 2.0, DataType::Int16, values);
        assert_eq!(overflow_times(&stream, OverflowRule::Pinned), vec![10.5]);
    }

    #[test]
    fn test_near_extreme_is_not_overflow() {
        let values = vec![32766.999, 32766.0];
        let stream = SampleStream::new("X", 0.0, 1.0, DataType::Int16, values);
        assert!(overflow_segments(&stream, OverflowRule::Pinned).is_empty());
    }

    #[test]
    fn test_increment_rule() {
        let values = vec![4.0, 4.0, 5.0, 7.0, 7.0, 8.0];
        let stream =
            SampleStream::new("FEC-8_ACCUM_OVERFLOW", 0.0, 1.0, DataType::Int32, values);
        assert_eq!(
            overflow_segments(&stream, OverflowRule::Increment),
            SegmentList::from_segments([Segment::new(2.0, 4.0), Segment::new(5.0, 6.0)])
        );
        assert_eq!(overflow_times(&stream, OverflowRule::Increment), vec![2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_increment_needs_preceding_sample() {
        // A read starting exactly on the step cannot see it
        let step = SampleStream::new("X", 20.0, 1.0, DataType::Int32, vec![1.0, 1.0]);
        assert!(overflow_segments(&step, OverflowRule::Increment).is_empty());

        let lead = OverflowRule::Increment.lead_in();
        assert!(lead >= 1.0);
        assert_eq!(OverflowRule::Pinned.lead_in(), 0.0);
        let with_lead =
            SampleStream::new("X", 20.0 - lead, 1.0, DataType::Int32, vec![0.0, 1.0, 1.0]);
        assert_eq!(
            overflow_segments(&with_lead, OverflowRule::Increment),
            SegmentList::single(20.0, 21.0)
        );
    }
}
