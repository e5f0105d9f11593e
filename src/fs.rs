//! The filesystem abstraction consumed by the engine.
//!
//! Every method call is a potential suspension point, so the trait is async
//! throughout. It stays object-safe (boxed trait objects are used
//! throughout the engine) by returning boxed futures explicitly instead of
//! using `async fn` in the trait.

use std::fmt::Debug;
use std::io;
use std::pin::Pin;
use std::time::SystemTime;

use crate::path::DavPath;

pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotImplemented,
    GeneralFailure,
    Exists,
    NotFound,
    Forbidden,
    InsufficientStorage,
    LoopDetected,
    PathTooLong,
    IsRemote,
}

pub type FsResult<T> = Result<T, FsError>;

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::PermissionDenied => FsError::Forbidden,
            io::ErrorKind::AlreadyExists => FsError::Exists,
            _ => FsError::GeneralFailure,
        }
    }
}

/// What a single stat of the mapped filesystem path resolved to (§3).
///
/// Observed once per request by the dispatcher and handed to the method
/// handler by value; handlers don't re-stat unless they mutate.
#[derive(Debug, Clone)]
pub enum ResourceKind {
    File(FileMeta),
    Collection(FileMeta),
    Null,
}

impl ResourceKind {
    pub fn is_null(&self) -> bool {
        matches!(self, ResourceKind::Null)
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, ResourceKind::Collection(_))
    }

    pub fn meta(&self) -> Option<&FileMeta> {
        match self {
            ResourceKind::File(m) | ResourceKind::Collection(m) => Some(m),
            ResourceKind::Null => None,
        }
    }
}

/// A plain snapshot of `DavMetaData`, cheap to clone and cache.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub len: u64,
    pub modified: SystemTime,
    pub is_dir: bool,
    pub is_symlink: bool,
}

impl FileMeta {
    pub fn from_dyn(m: &dyn DavMetaData) -> FsResult<FileMeta> {
        Ok(FileMeta {
            len: m.len(),
            modified: m.modified()?,
            is_dir: m.is_dir(),
            is_symlink: m.is_symlink(),
        })
    }
}

pub trait DavMetaData: Debug + Send + Sync {
    fn len(&self) -> u64;
    fn modified(&self) -> FsResult<SystemTime>;
    fn is_dir(&self) -> bool;
    fn is_file(&self) -> bool {
        !self.is_dir()
    }
    fn is_symlink(&self) -> bool {
        false
    }
}

pub trait DavFile: Send {
    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>>;
    fn read(&mut self, buf: &mut [u8]) -> FsFuture<'_, usize>;
    fn write(&mut self, buf: &[u8]) -> FsFuture<'_, usize>;
    fn seek(&mut self, pos: u64) -> FsFuture<'_, u64>;
    fn flush(&mut self) -> FsFuture<'_, ()>;
}

pub trait DavDirEntry: Debug + Send {
    fn name(&self) -> Vec<u8>;
    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
    pub create_new: bool,
}

impl OpenOptions {
    pub fn read() -> Self {
        OpenOptions { read: true, ..Default::default() }
    }

    pub fn write_new() -> Self {
        OpenOptions { write: true, create: true, truncate: true, ..Default::default() }
    }
}

/// A hierarchical resource store: files and collections addressed by
/// [`DavPath`]. Implementations must be cheap to clone (an `Arc` handle is
/// typical) since the engine clones the filesystem into every request.
pub trait DavFileSystem: Debug + Send + Sync + dyn_clone::DynClone {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>>;
    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<Box<dyn DavDirEntry>>>;
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>>;
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()>;
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()>;
}

dyn_clone::clone_trait_object!(DavFileSystem);
