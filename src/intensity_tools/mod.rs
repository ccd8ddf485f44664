pub mod histogram;
pub mod max_counts;
pub mod trace;
