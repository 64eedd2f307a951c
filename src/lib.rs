#![doc = include_str!("../README.md")]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    rustdoc::invalid_codeblock_attributes,
    rustdoc::private_intra_doc_links,
    rust_2018_idioms,
    unsafe_code
)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self
)]

pub mod aggregation;
pub mod config;
pub mod dedup;
pub mod error;
pub mod face;
pub mod flow;
pub mod logsink;
pub mod node;
pub mod pipeline;
pub mod retransmit;
pub mod topology;
pub mod tree;
pub mod wire;

pub use error::{Error, Result};
