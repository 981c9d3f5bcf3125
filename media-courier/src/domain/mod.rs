//! Domain value types shared by the pipeline and its adapters.

pub mod job;
pub mod route;

pub use job::{ChatId, Job, JobId, MessageId, Quality};
pub use route::{ProxyList, Route};
