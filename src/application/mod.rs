// Application layer - Detection, scanning and aggregation use cases
pub mod analysis_request;
pub mod archive_repository;
pub mod batch_planner;
pub mod overflow_detector;
pub mod overflow_scanner;
pub mod saturation_service;
pub mod worker_pool;

#[cfg(test)]
pub mod test_support;
