pub mod job_store;
pub mod producer;
pub mod prompts;
pub mod providers;
pub mod status;
pub mod storage;
pub mod targets;
pub mod worker;
