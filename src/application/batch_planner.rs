// Memory-bounded batch sizing for channel reads

/// Memory budget for the samples held by one batch: 2 GiB.
pub const MEMORY_CEILING_BYTES: f64 = 2.0 * 1024.0 * 1024.0 * 1024.0;
pub const BYTES_PER_SAMPLE: f64 = 8.0;
pub const NOMINAL_SAMPLE_RATE: f64 = 16.0;
/// Output and limit streams.
pub const STREAMS_PER_CHANNEL: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchPlanner {
    pub memory_ceiling: f64,
    pub bytes_per_sample: f64,
    pub sample_rate: f64,
    pub streams_per_channel: f64,
}

impl Default for BatchPlanner {
    fn default() -> Self {
        Self {
            memory_ceiling: MEMORY_CEILING_BYTES,
            bytes_per_sample: BYTES_PER_SAMPLE,
            sample_rate: NOMINAL_SAMPLE_RATE,
            streams_per_channel: STREAMS_PER_CHANNEL,
        }
    }
}

impl BatchPlanner {
    pub fn with_streams_per_channel(mut self, streams: usize) -> Self {
        self.streams_per_channel = streams as f64;
        self
    }

    /// Largest batch no bigger than `channel_count` or `requested_max` whose
    /// samples over `duration` seconds fit the memory ceiling. Never returns
    /// less than one, so an oversized span still makes progress.
    pub fn batch_size(
        &self,
        channel_count: usize,
        requested_max: usize,
        duration: Option<f64>,
    ) -> usize {
        let bounded = channel_count.min(requested_max);
        let size = match duration.filter(|d| *d > 0.0) {
            Some(duration) => {
                let per_channel =
                    self.bytes_per_sample * self.sample_rate * self.streams_per_channel * duration;
                let fits = (self.memory_ceiling / per_channel).floor() as usize;
                bounded.min(fits)
            }
            None => requested_max,
        };
        size.max(1)
    }
}
