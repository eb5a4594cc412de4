pub mod cv;
pub mod task;
pub mod user;
