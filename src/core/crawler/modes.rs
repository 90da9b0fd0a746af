// src/core/crawler/modes.rs

//! Crawl kinds and the mode dispatch table.
//!
//! The mode set is closed, so the registry is an enum matched on at each
//! call site rather than a table of function pointers. The lock and
//! client requirements the original registry declared per mode are the
//! two predicate methods here:
//!
//! | kind       | mode            | needs_lock | needs_client |
//! |------------|-----------------|------------|--------------|
//! | Autoexpire | `ExpiredMode`   | yes        | no           |
//! | Expired    | `ExpiredMode`   | yes        | no           |
//! | Metadump   | `DumpMode` meta | no         | yes          |
//! | Mgdump     | `DumpMode` key  | no         | yes          |

use super::dump::{DumpFormat, DumpMode};
use super::expired::{ExpiredMode, TtlCrawlStats};
use std::sync::Arc;

/// The crawl type tags as they appear in the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CrawlKind {
    Autoexpire = 0,
    Expired = 1,
    Metadump = 2,
    Mgdump = 3,
}

impl CrawlKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Autoexpire),
            1 => Some(Self::Expired),
            2 => Some(Self::Metadump),
            3 => Some(Self::Mgdump),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether this kind streams output to an attached client.
    pub fn is_dump(self) -> bool {
        matches!(self, Self::Metadump | Self::Mgdump)
    }
}

/// The active mode of a running crawl.
#[derive(Debug)]
pub enum CrawlMode {
    Expired(ExpiredMode),
    Metadump(DumpMode),
    Mgdump(DumpMode),
}

impl CrawlMode {
    /// Builds and initializes the mode for a crawl kind. `stats` is only
    /// meaningful for the expiry kinds, where a caller may supply its own
    /// block to watch the sweep through.
    pub fn for_kind(kind: CrawlKind, stats: Option<Arc<TtlCrawlStats>>, now: u32) -> Self {
        match kind {
            CrawlKind::Autoexpire | CrawlKind::Expired => {
                Self::Expired(ExpiredMode::new(stats, now))
            }
            CrawlKind::Metadump => Self::Metadump(DumpMode::new(DumpFormat::Meta)),
            CrawlKind::Mgdump => Self::Mgdump(DumpMode::new(DumpFormat::Key)),
        }
    }

    /// Whether `eval` expects the class lock to be held across the call.
    pub fn needs_lock(&self) -> bool {
        matches!(self, Self::Expired(_))
    }

    /// Whether a client sink must be attached for the crawl to proceed.
    pub fn needs_client(&self) -> bool {
        matches!(self, Self::Metadump(_) | Self::Mgdump(_))
    }

    /// Per-class completion hook. A no-op for the dump modes.
    pub fn on_class_done(&mut self, class: usize, now: u32) {
        if let Self::Expired(mode) = self {
            mode.on_class_done(class, now);
        }
    }

    /// Records that the hash iterator could not be acquired.
    pub fn set_locked(&mut self) {
        match self {
            Self::Metadump(mode) | Self::Mgdump(mode) => mode.set_locked(),
            Self::Expired(_) => {}
        }
    }
}
