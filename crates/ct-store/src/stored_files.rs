//! Content-addressed archive of written-file bodies.
//!
//! Blobs live at `stored_files/<first-byte-hex>/<hash-hex>`. Insertion goes
//! through a temp file in the target directory followed by an atomic rename,
//! so concurrent engine processes never observe a partial blob and a hash is
//! archived at most once per store.

use ct_common::HashValue;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const STORED_FILES_DIR: &str = "stored_files";

#[derive(Debug, Clone)]
pub struct StoredFiles {
    root: PathBuf,
}

impl StoredFiles {
    pub fn new(root: PathBuf) -> Self {
        StoredFiles { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mkpath(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    pub fn blob_path(&self, hash: HashValue) -> PathBuf {
        self.root
            .join(format!("{:02x}", hash.0 >> 56))
            .join(format!("{:016x}", hash.0))
    }

    pub fn contains(&self, hash: HashValue) -> bool {
        self.blob_path(hash).exists()
    }

    /// Archive `src` under its content hash. Returns false when a blob for
    /// this hash already exists (nothing is copied then).
    pub fn archive(&self, src: &Path, hash: HashValue) -> io::Result<bool> {
        let target = self.blob_path(hash);
        if target.exists() {
            return Ok(false);
        }
        let dir = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!(".tmp-{}-{:016x}", std::process::id(), hash.0));
        if let Err(e) = fs::copy(src, &tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        match fs::rename(&tmp, &target) {
            Ok(()) => Ok(true),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                // Lost the race to another writer; the blob content is
                // identical either way.
                if target.exists() {
                    Ok(false)
                } else {
                    Err(e)
                }
            }
        }
    }

    pub fn open(&self, hash: HashValue) -> io::Result<fs::File> {
        fs::File::open(self.blob_path(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn archive_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        fs::write(&src, b"hello").unwrap();

        let store = StoredFiles::new(dir.path().join("stored_files"));
        let hash = HashValue(0xabcd_ef01_2345_6789);
        assert!(store.archive(&src, hash).unwrap());
        assert!(store.contains(hash));

        let mut content = String::new();
        store.open(hash).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn archive_is_at_most_once_per_hash() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        fs::write(&src, b"hello").unwrap();

        let store = StoredFiles::new(dir.path().join("stored_files"));
        let hash = HashValue(42);
        assert!(store.archive(&src, hash).unwrap());
        assert!(!store.archive(&src, hash).unwrap());
    }

    #[test]
    fn blob_path_shards_by_first_byte() {
        let store = StoredFiles::new(PathBuf::from("/data/stored_files"));
        let p = store.blob_path(HashValue(0xff00_0000_0000_0001));
        assert_eq!(
            p,
            PathBuf::from("/data/stored_files/ff/ff00000000000001")
        );
    }
}
