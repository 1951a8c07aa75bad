// Domain layer - Segments, fault flags, sample streams and channel naming
pub mod channel;
pub mod flag;
pub mod segments;
pub mod stream;
