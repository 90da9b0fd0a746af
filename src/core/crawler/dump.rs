// src/core/crawler/dump.rs

//! The two streaming dump modes: the verbose key-metadata dump and the
//! compact `mg` key dump.

use super::sink::{ClientSink, MIN_BUFSPACE};
use crate::core::storage::{CacheItem, CacheState, ItemFlags};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;

/// Which line format a dump crawl emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    /// One `key=... exp=... la=...` metadata line per live item,
    /// terminated by `END`.
    Meta,
    /// One `mg <key>` line per live item, terminated by `EN`.
    Key,
}

/// State of a running dump crawl.
#[derive(Debug)]
pub struct DumpMode {
    format: DumpFormat,
    /// Set when the hash iterator could not be acquired; finalize then
    /// emits the locked terminator instead of the normal one.
    locked: bool,
}

impl DumpMode {
    pub fn new(format: DumpFormat) -> Self {
        Self {
            format,
            locked: false,
        }
    }

    pub fn format(&self) -> DumpFormat {
        self.format
    }

    pub fn set_locked(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Emits one line for `item` if it is still live, then consumes the
    /// scanner's reference. The caller has already guaranteed
    /// `MIN_BUFSPACE` of headroom.
    pub fn eval(&mut self, item: &Arc<CacheItem>, cache: &CacheState, sink: &mut ClientSink) {
        let now = cache.clock.now();
        let skip = match self.format {
            // The metadata dump also drops items whose external backing
            // is gone; the key dump does not consult the external tier.
            DumpFormat::Meta => {
                let is_valid = match (item.has_flag(ItemFlags::HDR), cache.external()) {
                    (true, Some(tier)) => tier.validate(item),
                    _ => true,
                };
                item.is_expired(now) || cache.is_flushed(item) || !is_valid
            }
            DumpFormat::Key => item.is_expired(now) || cache.is_flushed(item),
        };
        if !skip {
            match self.format {
                DumpFormat::Meta => write_meta_line(item, cache, sink),
                DumpFormat::Key => write_key_line(item, sink),
            }
        }
        item.refcount_decr();
    }

    /// Appends the stream terminator after one last flush attempt. The
    /// worker drains whatever is left before releasing the client.
    pub async fn finalize(&mut self, sink: &mut ClientSink) {
        let _ = sink.flush().await;
        if sink.is_closed() {
            return;
        }
        if self.locked {
            sink.append(b"ERROR locked try again later\r\n");
        } else {
            match self.format {
                DumpFormat::Meta => sink.append(b"END\r\n"),
                DumpFormat::Key => sink.append(b"EN\r\n"),
            }
        }
    }
}

fn write_meta_line(item: &CacheItem, cache: &CacheState, sink: &mut ClientSink) {
    // Worst case the key uri-encodes to three bytes per input byte; the
    // headroom contract absorbs that with room to spare for the fixed
    // fields.
    debug_assert!(item.key().len() * 3 < MIN_BUFSPACE / 2);
    let mut nbuf = itoa::Buffer::new();

    sink.append(b"key=");
    sink.append(urlencoding::encode_binary(item.key()).as_bytes());
    sink.append(b" exp=");
    match item.exptime() {
        0 => sink.append(b"-1"),
        exp => sink.append(nbuf.format(cache.clock.to_unix(exp)).as_bytes()),
    }
    sink.append(b" la=");
    sink.append(nbuf.format(cache.clock.to_unix(item.last_access())).as_bytes());
    sink.append(b" cas=");
    sink.append(nbuf.format(item.cas()).as_bytes());
    sink.append(b" fetch=");
    sink.append(if item.has_flag(ItemFlags::FETCHED) {
        b"yes".as_slice()
    } else {
        b"no".as_slice()
    });
    sink.append(b" cls=");
    sink.append(nbuf.format(item.class_id()).as_bytes());
    sink.append(b" size=");
    sink.append(nbuf.format(item.total_size()).as_bytes());
    sink.append(b" flags=");
    sink.append(nbuf.format(item.client_flags()).as_bytes());
    if let Some(ext) = item.ext_header() {
        sink.append(b" ext_page=");
        sink.append(nbuf.format(ext.page).as_bytes());
        sink.append(b" ext_offset=");
        sink.append(nbuf.format(ext.offset).as_bytes());
    }
    sink.append(b"\n");
}

fn write_key_line(item: &CacheItem, sink: &mut ClientSink) {
    sink.append(b"mg ");
    if item.has_flag(ItemFlags::KEY_BINARY) {
        sink.append(BASE64.encode(item.key()).as_bytes());
        sink.append(b" b\r\n");
    } else {
        sink.append(item.key());
        sink.append(b"\r\n");
    }
}
