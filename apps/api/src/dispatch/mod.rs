//! Request side of the pipeline: validates a request, persists the task and
//! hands its job to the queue before responding.

pub mod handlers;
pub mod outbox;
pub mod service;

pub use outbox::{run_sweeper, SweeperSettings};
pub use service::{
    CoverLetterRequest, CvFixRequest, CvUpload, DispatchResponse, DispatchStatus, Dispatcher,
};
