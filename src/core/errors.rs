// src/core/errors.rs

//! Defines the primary error type for the crawler subsystem.

use thiserror::Error;

/// All the ways starting or driving a crawl can fail.
///
/// The command layer maps these onto its coarse outcome set
/// (`OK` / `RUNNING` / `BADCLASS` / `NOTSTARTED` / `ERROR`), which is why
/// several distinct misuses get dedicated variants here instead of a
/// catch-all string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrawlerError {
    #[error("crawl already running")]
    Running,

    #[error("invalid lru class id")]
    BadClass,

    #[error("crawler worker is not running")]
    NotStarted,

    #[error("a client connection is required for this crawl mode")]
    ClientRequired,

    #[error("hash table walks only support the dump modes")]
    InvalidTarget,

    #[error("crawler output buffer allocation failed")]
    OutOfMemory,

    #[error("Internal Error: {0}")]
    Internal(String),
}
