//! media-courier library crate.
//!
//! Queue-driven fetch-and-deliver engine: jobs come in from a chat front end
//! or the subscription monitor, media is fetched through an external
//! extractor with route failover, split to the transfer endpoint's size
//! ceiling and delivered back to the chat.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod pipeline;
pub mod subscription;
pub mod transcoder;
pub mod transfer;
pub mod utils;

pub use error::{Error, Result};
