pub mod consumer;
pub mod operation;
pub mod orchestrator;
pub mod tracker;
