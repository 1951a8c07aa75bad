// Half-open time segments and coalesced segment lists
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A half-open time range `[start, end)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "(f64, f64)", from = "(f64, f64)")]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    /// Builds a segment, collapsing an inverted range to zero length at `start`.
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, other: &Segment) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl From<(f64, f64)> for Segment {
    fn from((start, end): (f64, f64)) -> Self {
        Self::new(start, end)
    }
}

impl From<Segment> for (f64, f64) {
    fn from(segment: Segment) -> Self {
        (segment.start, segment.end)
    }
}

/// Sorted, non-overlapping list of segments.
///
/// Every constructor and operation returns a coalesced list: segments are
/// ordered by start, zero-length segments are dropped, and overlapping or
/// touching segments are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<Segment>", from = "Vec<Segment>")]
pub struct SegmentList {
    segments: Vec<Segment>,
}

impl SegmentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(start: f64, end: f64) -> Self {
        Self::from_segments([Segment::new(start, end)])
    }

    pub fn from_segments<I: IntoIterator<Item = Segment>>(segments: I) -> Self {
        let mut list = Self {
            segments: segments.into_iter().collect(),
        };
        list.coalesce();
        list
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn coalesce(&mut self) {
        self.segments.retain(|s| !s.is_empty());
        self.segments.sort_by(|a, b| {
            a.start
                .total_cmp(&b.start)
                .then_with(|| a.end.total_cmp(&b.end))
        });

        let mut merged: Vec<Segment> = Vec::with_capacity(self.segments.len());
        for segment in self.segments.drain(..) {
            match merged.last_mut() {
                Some(last) if segment.start <= last.end => {
                    last.end = last.end.max(segment.end);
                }
                _ => merged.push(segment),
            }
        }
        self.segments = merged;
    }

    pub fn union(&self, other: &SegmentList) -> SegmentList {
        Self::from_segments(self.segments.iter().chain(other.segments.iter()).copied())
    }

    pub fn intersection(&self, other: &SegmentList) -> SegmentList {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.segments.len() && j < other.segments.len() {
            let a = self.segments[i];
            let b = other.segments[j];
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start < end {
                out.push(Segment::new(start, end));
            }
            match a.end.partial_cmp(&b.end) {
                Some(Ordering::Less) => i += 1,
                Some(Ordering::Greater) => j += 1,
                _ => {
                    i += 1;
                    j += 1;
                }
            }
        }
        Self::from_segments(out)
    }

    /// Clips every segment to `span`.
    pub fn restrict(&self, span: Segment) -> SegmentList {
        self.intersection(&Self::from_segments([span]))
    }

    /// Widens each segment by `pad` seconds on both sides.
    pub fn protract(&self, pad: f64) -> SegmentList {
        Self::from_segments(
            self.segments
                .iter()
                .map(|s| Segment::new(s.start - pad, s.end + pad)),
        )
    }

    /// Rounds starts down and ends up to whole seconds.
    pub fn round_outward(&self) -> SegmentList {
        Self::from_segments(
            self.segments
                .iter()
                .map(|s| Segment::new(s.start.floor(), s.end.ceil())),
        )
    }

    /// True when every segment of `other` lies inside one segment of `self`.
    pub fn contains_list(&self, other: &SegmentList) -> bool {
        other
            .segments
            .iter()
            .all(|o| self.segments.iter().any(|s| s.contains(o)))
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(Segment::duration).sum()
    }
}

impl From<Vec<Segment>> for SegmentList {
    fn from(segments: Vec<Segment>) -> Self {
        Self::from_segments(segments)
    }
}

impl From<SegmentList> for Vec<Segment> {
    fn from(list: SegmentList) -> Self {
        list.segments
    }
}
