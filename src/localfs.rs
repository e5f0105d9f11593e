//! Filesystem-backed `DavFileSystem`, mapping `DavPath` onto a root
//! directory on disk, built on `tokio::fs` to match the async trait in
//! `fs.rs`.
//!
//! Only cross-platform `tokio::fs` operations with default file
//! permissions are used; per-OS extras (resource forks, ACL bits) are out
//! of scope for this backend.
//!
//! Symlinks inside the served root are hidden by default: `open`/`metadata`
//! report a symlinked path as not found, and `read_dir` omits symlinked
//! entries, so a link planted inside the tree can't be walked out through.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::fs::{DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsResult, OpenOptions};
use crate::path::DavPath;

#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
    hide_symlinks: bool,
}

impl LocalFs {
    /// Serves `root`, hiding symlinks by default so a request can't be used
    /// to step outside the served tree via a link planted inside it.
    pub fn new<P: AsRef<Path>>(root: P) -> LocalFs {
        LocalFs { root: root.as_ref().to_path_buf(), hide_symlinks: true }
    }

    pub fn new_with_options<P: AsRef<Path>>(root: P, hide_symlinks: bool) -> LocalFs {
        LocalFs { root: root.as_ref().to_path_buf(), hide_symlinks }
    }

    fn fspath(&self, path: &DavPath) -> FsResult<PathBuf> {
        path.to_fs_path(&self.root).map_err(|_| FsError::Forbidden)
    }

    /// `symlink_metadata` (not `metadata`, which follows links) is the only
    /// way to tell a symlink apart from the file or directory it targets.
    async fn is_symlink(&self, fspath: &Path) -> bool {
        tokio::fs::symlink_metadata(fspath).await.map(|m| m.file_type().is_symlink()).unwrap_or(false)
    }
}

#[derive(Debug)]
struct LocalFsMetaData(std::fs::Metadata);

impl DavMetaData for LocalFsMetaData {
    fn len(&self) -> u64 {
        self.0.len()
    }

    fn modified(&self) -> FsResult<SystemTime> {
        self.0.modified().map_err(Into::into)
    }

    fn is_dir(&self) -> bool {
        self.0.is_dir()
    }

    fn is_symlink(&self) -> bool {
        self.0.file_type().is_symlink()
    }
}

struct LocalFsFile(tokio::fs::File);

impl DavFile for LocalFsFile {
    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let meta = self.0.metadata().await?;
            Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>)
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> FsFuture<'_, usize> {
        Box::pin(async move { Ok(self.0.read(buf).await?) })
    }

    fn write(&mut self, buf: &[u8]) -> FsFuture<'_, usize> {
        Box::pin(async move { Ok(self.0.write(buf).await?) })
    }

    fn seek(&mut self, pos: u64) -> FsFuture<'_, u64> {
        Box::pin(async move { Ok(self.0.seek(std::io::SeekFrom::Start(pos)).await?) })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move { Ok(self.0.flush().await?) })
    }
}

#[derive(Debug)]
struct LocalFsDirEntry {
    name: Vec<u8>,
    path: PathBuf,
}

impl DavDirEntry for LocalFsDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.clone()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let path = self.path.clone();
        Box::pin(async move {
            let meta = tokio::fs::metadata(&path).await?;
            Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>)
        })
    }
}

impl DavFileSystem for LocalFs {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let fspath = self.fspath(path)?;
            if self.hide_symlinks && !options.create && !options.create_new && self.is_symlink(&fspath).await {
                return Err(FsError::NotFound);
            }
            let file = tokio::fs::OpenOptions::new()
                .read(options.read)
                .write(options.write)
                .append(options.append)
                .truncate(options.truncate)
                .create(options.create)
                .create_new(options.create_new)
                .open(fspath)
                .await?;
            Ok(Box::new(LocalFsFile(file)) as Box<dyn DavFile>)
        })
    }

    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let fspath = self.fspath(path)?;
            let mut iter = tokio::fs::read_dir(fspath).await?;
            let mut out: Vec<Box<dyn DavDirEntry>> = Vec::new();
            while let Some(entry) = iter.next_entry().await? {
                let entry_path = entry.path();
                if self.hide_symlinks && self.is_symlink(&entry_path).await {
                    continue;
                }
                out.push(Box::new(LocalFsDirEntry { name: entry.file_name().into_encoded_bytes(), path: entry_path }));
            }
            Ok(out)
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let fspath = self.fspath(path)?;
            if self.hide_symlinks && self.is_symlink(&fspath).await {
                return Err(FsError::NotFound);
            }
            let meta = tokio::fs::metadata(fspath).await?;
            Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let fspath = self.fspath(path)?;
            tokio::fs::create_dir(fspath).await?;
            Ok(())
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let fspath = self.fspath(path)?;
            tokio::fs::remove_dir(fspath).await?;
            Ok(())
        })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let fspath = self.fspath(path)?;
            tokio::fs::remove_file(fspath).await?;
            Ok(())
        })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from = self.fspath(from)?;
            let to = self.fspath(to)?;
            tokio::fs::rename(from, to).await?;
            Ok(())
        })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from = self.fspath(from)?;
            let to = self.fspath(to)?;
            tokio::fs::copy(from, to).await?;
            Ok(())
        })
    }
}

/// Maps OS errno to `FsError` (`tokio::fs`'s errors are plain
/// `std::io::Error`, same as the sync standard library's).
impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        if let Some(errno) = e.raw_os_error() {
            match errno {
                libc::EMLINK | libc::ENOSPC | libc::EDQUOT => return FsError::InsufficientStorage,
                libc::EACCES | libc::EPERM => return FsError::Forbidden,
                libc::ENOTEMPTY | libc::EEXIST => return FsError::Exists,
                libc::ELOOP => return FsError::LoopDetected,
                libc::ENAMETOOLONG => return FsError::PathTooLong,
                libc::ENOTDIR | libc::EISDIR | libc::EROFS => return FsError::Forbidden,
                libc::ENOENT => return FsError::NotFound,
                libc::ENOSYS => return FsError::NotImplemented,
                libc::EXDEV => return FsError::IsRemote,
                _ => {},
            }
        }
        match e.kind() {
            ErrorKind::NotFound => FsError::NotFound,
            ErrorKind::PermissionDenied => FsError::Forbidden,
            ErrorKind::AlreadyExists => FsError::Exists,
            _ => FsError::GeneralFailure,
        }
    }
}
