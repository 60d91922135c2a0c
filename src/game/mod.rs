pub mod application;
pub mod consumers;
