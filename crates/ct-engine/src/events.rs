//! Event classification and the per-command read/write caches.
//!
//! Raw events pass the include/exclude trees and per-tree size caps, then
//! deduplicate on `(path, mtime, size)` with insert-or-ignore semantics.
//! Surviving writes are fingerprinted (and optionally archived into the
//! content-addressed store, staged before the store transaction so a
//! committed row always has its blob); surviving reads may capture their
//! body up to the configured cap. Hitting a flush threshold signals the
//! caller to flush mid-command without closing the command.

use crate::fanotify::{RawEventKind, RawFileEvent};
use ct_common::command::split_path;
use ct_common::pathtree::is_watched;
use ct_common::{FileReadEvent, FileWriteEvent, HashValue, Settings};
use ct_store::StoredFiles;
use std::collections::HashMap;
use std::path::PathBuf;

type EventKey = (PathBuf, i64, u64);

pub struct FileEventCache {
    settings: Settings,
    stored_files: StoredFiles,
    reads: HashMap<EventKey, FileReadEvent>,
    writes: HashMap<EventKey, FileWriteEvent>,
    read_bytes_cached: u64,
}

impl FileEventCache {
    pub fn new(settings: Settings, stored_files: StoredFiles) -> Self {
        FileEventCache {
            settings,
            stored_files,
            reads: HashMap::new(),
            writes: HashMap::new(),
            read_bytes_cached: 0,
        }
    }

    /// Classify and cache one raw event. Filtered and duplicate events are
    /// dropped silently; hash and capture failures drop the optional parts
    /// but keep the event.
    pub fn accept(&mut self, event: RawFileEvent) {
        match event.kind {
            RawEventKind::Write => self.accept_write(event),
            RawEventKind::Read => self.accept_read(event),
        }
    }

    fn accept_write(&mut self, event: RawFileEvent) {
        let policy = &self.settings.write_events;
        if !policy.enabled
            || event.size > policy.max_event_size
            || !is_watched(&event.path, &policy.include, &policy.exclude)
        {
            return;
        }
        let key = (event.path.clone(), event.mtime, event.size);
        if self.writes.contains_key(&key) {
            return;
        }

        let hash = if policy.hash {
            match HashValue::of_file(&event.path) {
                Ok(h) => Some(h),
                Err(e) => {
                    tracing::debug!("hashing {} failed: {e}", event.path.display());
                    None
                }
            }
        } else {
            None
        };
        if policy.archive {
            if let Some(h) = hash {
                if let Err(e) = self.stored_files.archive(&event.path, h) {
                    tracing::warn!("archiving {} failed: {e}", event.path.display());
                }
            }
        }

        let (path, name) = split_path(&event.path);
        self.writes.insert(
            key,
            FileWriteEvent {
                path,
                name,
                size: event.size,
                mtime: event.mtime,
                hash,
            },
        );
    }

    fn accept_read(&mut self, event: RawFileEvent) {
        let policy = &self.settings.read_events;
        if !policy.enabled
            || event.size > policy.max_event_size
            || !is_watched(&event.path, &policy.include, &policy.exclude)
        {
            return;
        }
        let key = (event.path.clone(), event.mtime, event.size);
        if self.reads.contains_key(&key) {
            return;
        }

        let bytes = if policy.store_bytes && event.size <= policy.max_stored_bytes {
            match std::fs::read(&event.path) {
                Ok(b) => Some(b),
                Err(e) => {
                    tracing::debug!("capturing {} failed: {e}", event.path.display());
                    None
                }
            }
        } else {
            None
        };
        self.read_bytes_cached += bytes.as_ref().map(|b| b.len() as u64).unwrap_or(0);

        let (path, name) = split_path(&event.path);
        self.reads.insert(
            key,
            FileReadEvent {
                path,
                name,
                size: event.size,
                mtime: event.mtime,
                bytes,
            },
        );
    }

    /// True once a flush threshold is exceeded. The cached sizes may
    /// briefly overshoot the configured limits; that is fine.
    pub fn should_flush(&self) -> bool {
        self.read_bytes_cached > self.settings.read_events.flush_total_bytes
            || self.writes.len() > self.settings.write_events.flush_event_count
    }

    /// Hand the caches over for a flush, leaving them empty.
    pub fn take(&mut self) -> (Vec<FileWriteEvent>, Vec<FileReadEvent>) {
        self.read_bytes_cached = 0;
        (
            self.writes.drain().map(|(_, v)| v).collect(),
            self.reads.drain().map(|(_, v)| v).collect(),
        )
    }

    /// Drop everything cached (shell `CLEAR_EVENTS`).
    pub fn clear(&mut self) {
        self.writes.clear();
        self.reads.clear();
        self.read_bytes_cached = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.reads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ct_common::PathTree;
    use std::path::{Path, PathBuf};

    struct Fixture {
        _dir: tempfile::TempDir,
        watched: PathBuf,
        cache: FileEventCache,
    }

    fn fixture(configure: impl FnOnce(&mut Settings, &Path)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("watched");
        std::fs::create_dir(&watched).unwrap();

        let mut settings = Settings::default();
        settings.write_events.include = PathTree::from_paths([watched.clone()]);
        settings.write_events.archive = false;
        settings.read_events.include = PathTree::from_paths([watched.clone()]);
        configure(&mut settings, &watched);

        let stored = StoredFiles::new(dir.path().join("stored_files"));
        Fixture {
            cache: FileEventCache::new(settings, stored),
            watched,
            _dir: dir,
        }
    }

    fn write_event(path: &Path, mtime: i64, size: u64) -> RawFileEvent {
        RawFileEvent {
            kind: RawEventKind::Write,
            path: path.to_path_buf(),
            size,
            mtime,
            pid: None,
        }
    }

    fn read_event(path: &Path, mtime: i64, size: u64) -> RawFileEvent {
        RawFileEvent {
            kind: RawEventKind::Read,
            path: path.to_path_buf(),
            size,
            mtime,
            pid: None,
        }
    }

    #[test]
    fn duplicate_key_is_inserted_once() {
        let mut fx = fixture(|_, _| {});
        let file = fx.watched.join("x");
        std::fs::write(&file, b"abc").unwrap();

        fx.cache.accept(write_event(&file, 100, 3));
        fx.cache.accept(write_event(&file, 100, 3));
        let (writes, _) = fx.cache.take();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].name, "x");
    }

    #[test]
    fn changed_mtime_or_size_is_a_new_entry() {
        let mut fx = fixture(|_, _| {});
        let file = fx.watched.join("x");
        std::fs::write(&file, b"abc").unwrap();

        fx.cache.accept(write_event(&file, 100, 3));
        fx.cache.accept(write_event(&file, 101, 3));
        fx.cache.accept(write_event(&file, 101, 4));
        let (writes, _) = fx.cache.take();
        assert_eq!(writes.len(), 3);
    }

    #[test]
    fn same_file_may_be_in_both_sets() {
        let mut fx = fixture(|_, _| {});
        let file = fx.watched.join("x");
        std::fs::write(&file, b"abc").unwrap();

        fx.cache.accept(read_event(&file, 100, 3));
        fx.cache.accept(write_event(&file, 100, 3));
        let (writes, reads) = fx.cache.take();
        assert_eq!(writes.len(), 1);
        assert_eq!(reads.len(), 1);
    }

    #[test]
    fn excluded_subtree_wins() {
        let mut fx = fixture(|settings, watched| {
            settings.write_events.exclude = PathTree::from_paths([watched.join("private")]);
        });
        let private = fx.watched.join("private");
        std::fs::create_dir(&private).unwrap();
        let secret = private.join("a");
        std::fs::write(&secret, b"s").unwrap();
        let open = fx.watched.join("b");
        std::fs::write(&open, b"o").unwrap();

        fx.cache.accept(write_event(&secret, 100, 1));
        fx.cache.accept(write_event(&open, 100, 1));
        let (writes, _) = fx.cache.take();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].name, "b");
    }

    #[test]
    fn unwatched_path_is_dropped() {
        let mut fx = fixture(|_, _| {});
        fx.cache
            .accept(write_event(Path::new("/somewhere/else"), 100, 1));
        assert!(fx.cache.is_empty());
    }

    #[test]
    fn oversized_event_is_dropped() {
        let mut fx = fixture(|settings, _| {
            settings.write_events.max_event_size = 10;
        });
        let file = fx.watched.join("big");
        std::fs::write(&file, b"0123456789abcdef").unwrap();

        fx.cache.accept(write_event(&file, 100, 16));
        assert!(fx.cache.is_empty());
    }

    #[test]
    fn write_hash_matches_content() {
        let mut fx = fixture(|_, _| {});
        let file = fx.watched.join("x");
        std::fs::write(&file, b"hello world").unwrap();

        fx.cache.accept(write_event(&file, 100, 11));
        let (writes, _) = fx.cache.take();
        let expected = HashValue(xxhash_rust::xxh3::xxh3_64(b"hello world"));
        assert_eq!(writes[0].hash, Some(expected));
    }

    #[test]
    fn archive_stages_blob_when_enabled() {
        let mut fx = fixture(|settings, _| {
            settings.write_events.archive = true;
        });
        let file = fx.watched.join("x");
        std::fs::write(&file, b"archived content").unwrap();

        fx.cache.accept(write_event(&file, 100, 16));
        let (writes, _) = fx.cache.take();
        let hash = writes[0].hash.unwrap();
        assert!(fx.cache.stored_files.contains(hash));
    }

    #[test]
    fn read_bytes_captured_only_under_cap() {
        let mut fx = fixture(|settings, _| {
            settings.read_events.max_stored_bytes = 4;
        });
        let small = fx.watched.join("small");
        std::fs::write(&small, b"abc").unwrap();
        let large = fx.watched.join("large");
        std::fs::write(&large, b"0123456789").unwrap();

        fx.cache.accept(read_event(&small, 100, 3));
        fx.cache.accept(read_event(&large, 100, 10));
        let (_, mut reads) = fx.cache.take();
        reads.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(reads[1].name, "small");
        assert_eq!(reads[1].bytes.as_deref(), Some(b"abc".as_slice()));
        assert_eq!(reads[0].name, "large");
        assert!(reads[0].bytes.is_none());
    }

    #[test]
    fn write_count_threshold_triggers_flush() {
        let mut fx = fixture(|settings, _| {
            settings.write_events.flush_event_count = 2;
        });
        for i in 0..3 {
            let file = fx.watched.join(format!("f{i}"));
            std::fs::write(&file, b"x").unwrap();
            fx.cache.accept(write_event(&file, 100, 1));
        }
        assert!(fx.cache.should_flush());

        let (writes, _) = fx.cache.take();
        assert_eq!(writes.len(), 3);
        assert!(!fx.cache.should_flush());
    }

    #[test]
    fn read_bytes_threshold_triggers_flush() {
        let mut fx = fixture(|settings, _| {
            settings.read_events.flush_total_bytes = 5;
        });
        let file = fx.watched.join("r");
        std::fs::write(&file, b"0123456789").unwrap();

        fx.cache.accept(read_event(&file, 100, 10));
        assert!(fx.cache.should_flush());
    }

    #[test]
    fn clear_resets_everything() {
        let mut fx = fixture(|_, _| {});
        let file = fx.watched.join("x");
        std::fs::write(&file, b"abc").unwrap();
        fx.cache.accept(write_event(&file, 100, 3));
        fx.cache.accept(read_event(&file, 100, 3));

        fx.cache.clear();
        assert!(fx.cache.is_empty());
        assert!(!fx.cache.should_flush());
    }
}
