pub mod job;
pub mod provider;
pub mod queue;
pub mod target;
