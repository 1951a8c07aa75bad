// Fault flags and the per-channel fault-flag mapping
use super::segments::{Segment, SegmentList};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Known and active segments for one channel.
///
/// `active` is always clipped to `known`, so a flag never claims a fault
/// outside the time that was actually analyzed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultFlag {
    pub name: String,
    pub known: SegmentList,
    pub active: SegmentList,
}

impl FaultFlag {
    pub fn new(name: impl Into<String>, known: SegmentList, active: SegmentList) -> Self {
        let active = active.intersection(&known);
        Self {
            name: name.into(),
            known,
            active,
        }
    }

    /// A flag that was analyzed over `span` and found clean.
    pub fn clean(name: impl Into<String>, span: Segment) -> Self {
        Self::new(name, SegmentList::from_segments([span]), SegmentList::new())
    }

    pub fn is_faulted(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn round_outward(&self) -> Self {
        Self::new(
            self.name.clone(),
            self.known.round_outward(),
            self.active.round_outward(),
        )
    }

    fn absorb(&mut self, other: &FaultFlag) {
        self.known = self.known.union(&other.known);
        self.active = self.active.union(&other.active).intersection(&self.known);
    }
}

/// Channel name to fault flag, folded incrementally across chunks and batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultFlagMap {
    flags: BTreeMap<String, FaultFlag>,
}

impl FaultFlagMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `flag`, or unions its known/active segments into the existing
    /// entry of the same name. Folding the same flag twice is a no-op the
    /// second time.
    pub fn merge(&mut self, flag: FaultFlag) {
        match self.flags.get_mut(&flag.name) {
            Some(existing) => {
                existing.absorb(&flag);
                debug_assert!(existing.known.contains_list(&existing.active));
            }
            None => {
                self.flags.insert(flag.name.clone(), flag);
            }
        }
    }

    pub fn merge_all<I: IntoIterator<Item = FaultFlag>>(&mut self, flags: I) {
        for flag in flags {
            self.merge(flag);
        }
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&FaultFlag> {
        self.flags.get(name)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Flags in channel-name order.
    pub fn flags(&self) -> impl Iterator<Item = &FaultFlag> {
        self.flags.values()
    }

    pub fn faulted(&self) -> impl Iterator<Item = &FaultFlag> {
        self.flags.values().filter(|f| f.is_faulted())
    }
}
