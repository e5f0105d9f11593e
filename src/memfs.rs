//! In-memory filesystem backend implementing the engine's async
//! `DavFileSystem` (`fs.rs`) over a nested map of dir/file nodes behind one
//! mutex; an in-memory tree has no I/O to make async in the first place, so
//! only the trait boundary matters here.
//!
//! Useful for tests and for embedders who want a throwaway or
//! ephemeral-per-instance store (§9: "if you create a new instance in a
//! handler it will be empty every time" still holds here).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::fs::{DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsResult, OpenOptions};
use crate::path::DavPath;

#[derive(Debug)]
enum Node {
    Dir(HashMap<String, Node>, SystemTime),
    File(Vec<u8>, SystemTime),
}

impl Node {
    fn new_dir() -> Node {
        Node::Dir(HashMap::new(), SystemTime::now())
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Walks to the parent directory of `segs`, returning it and the final
/// segment name, or `None` if any ancestor is missing or not a directory.
fn parent_of<'t>(root: &'t mut Node, segs: &[&str]) -> Option<(&'t mut HashMap<String, Node>, String)> {
    if segs.is_empty() {
        return None;
    }
    let mut cur = match root {
        Node::Dir(m, _) => m,
        Node::File(..) => return None,
    };
    for seg in &segs[..segs.len() - 1] {
        match cur.get_mut(*seg) {
            Some(Node::Dir(m, _)) => cur = m,
            _ => return None,
        }
    }
    Some((cur, segs[segs.len() - 1].to_string()))
}

fn lookup<'t>(root: &'t Node, segs: &[&str]) -> Option<&'t Node> {
    let mut cur = root;
    for seg in segs {
        match cur {
            Node::Dir(m, _) => cur = m.get(*seg)?,
            Node::File(..) => return None,
        }
    }
    Some(cur)
}

#[derive(Debug, Clone)]
pub struct MemMeta {
    len: u64,
    modified: SystemTime,
    is_dir: bool,
}

impl DavMetaData for MemMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }
}

fn node_meta(node: &Node) -> MemMeta {
    match node {
        Node::Dir(_, m) => MemMeta { len: 0, modified: *m, is_dir: true },
        Node::File(data, m) => MemMeta { len: data.len() as u64, modified: *m, is_dir: false },
    }
}

#[derive(Debug)]
pub struct MemDirEntry {
    name: String,
    meta: MemMeta,
}

impl DavDirEntry for MemDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.clone().into_bytes()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }
}

/// An open file handle: for reads, a snapshot of the file's bytes at open
/// time; for writes, a scratch buffer written back to the tree on
/// `flush()`.
pub struct MemFile {
    tree: Arc<Mutex<Node>>,
    path: String,
    buf: Vec<u8>,
    pos: usize,
    writable: bool,
    dirty: bool,
}

impl DavFile for MemFile {
    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            Ok(Box::new(MemMeta { len: self.buf.len() as u64, modified: SystemTime::now(), is_dir: false })
                as Box<dyn DavMetaData>)
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> FsFuture<'_, usize> {
        Box::pin(async move {
            let avail = self.buf.len().saturating_sub(self.pos);
            let n = avail.min(buf.len());
            buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        })
    }

    fn write(&mut self, buf: &[u8]) -> FsFuture<'_, usize> {
        Box::pin(async move {
            if !self.writable {
                return Err(FsError::Forbidden);
            }
            let end = self.pos + buf.len();
            if end > self.buf.len() {
                self.buf.resize(end, 0);
            }
            self.buf[self.pos..end].copy_from_slice(buf);
            self.pos = end;
            self.dirty = true;
            Ok(buf.len())
        })
    }

    fn seek(&mut self, pos: u64) -> FsFuture<'_, u64> {
        Box::pin(async move {
            self.pos = (pos as usize).min(self.buf.len());
            Ok(self.pos as u64)
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            if !self.dirty {
                return Ok(());
            }
            let segs = segments(&self.path);
            let mut root = self.tree.lock().unwrap();
            let (parent, name) = parent_of(&mut root, &segs).ok_or(FsError::NotFound)?;
            parent.insert(name, Node::File(self.buf.clone(), SystemTime::now()));
            self.dirty = false;
            Ok(())
        })
    }
}

/// In-memory `DavFileSystem`. Cheap to clone: the tree is behind an `Arc`.
#[derive(Debug, Clone)]
pub struct MemFs {
    tree: Arc<Mutex<Node>>,
}

impl MemFs {
    pub fn new() -> MemFs {
        MemFs { tree: Arc::new(Mutex::new(Node::new_dir())) }
    }
}

impl Default for MemFs {
    fn default() -> MemFs {
        MemFs::new()
    }
}

impl DavFileSystem for MemFs {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let segs = segments(path.internal_path());
            let existing = {
                let root = self.tree.lock().unwrap();
                lookup(&root, &segs).map(|n| match n {
                    Node::File(data, _) => Some(data.clone()),
                    Node::Dir(..) => None,
                })
            };
            let buf = match existing {
                Some(Some(data)) if !options.truncate => data,
                Some(Some(_)) if options.truncate => Vec::new(),
                Some(None) => return Err(FsError::Forbidden),
                None if options.create || options.create_new => Vec::new(),
                None => return Err(FsError::NotFound),
                _ => Vec::new(),
            };
            if options.create_new && existing.is_some() {
                return Err(FsError::Exists);
            }
            Ok(Box::new(MemFile {
                tree: self.tree.clone(),
                path: path.internal_path().to_string(),
                buf,
                pos: 0,
                writable: options.write,
                dirty: options.create || options.create_new,
            }) as Box<dyn DavFile>)
        })
    }

    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let segs = segments(path.internal_path());
            let root = self.tree.lock().unwrap();
            match lookup(&root, &segs) {
                Some(Node::Dir(map, _)) => Ok(map
                    .iter()
                    .map(|(name, node)| {
                        Box::new(MemDirEntry { name: name.clone(), meta: node_meta(node) }) as Box<dyn DavDirEntry>
                    })
                    .collect()),
                Some(Node::File(..)) => Err(FsError::GeneralFailure),
                None => Err(FsError::NotFound),
            }
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let segs = segments(path.internal_path());
            let root = self.tree.lock().unwrap();
            lookup(&root, &segs).map(|n| Box::new(node_meta(n)) as Box<dyn DavMetaData>).ok_or(FsError::NotFound)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let segs = segments(path.internal_path());
            let mut root = self.tree.lock().unwrap();
            let (parent, name) = parent_of(&mut root, &segs).ok_or(FsError::NotFound)?;
            if parent.contains_key(&name) {
                return Err(FsError::Exists);
            }
            parent.insert(name, Node::new_dir());
            Ok(())
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let segs = segments(path.internal_path());
            let mut root = self.tree.lock().unwrap();
            let (parent, name) = parent_of(&mut root, &segs).ok_or(FsError::NotFound)?;
            match parent.get(&name) {
                Some(Node::Dir(..)) => {
                    parent.remove(&name);
                    Ok(())
                },
                Some(Node::File(..)) => Err(FsError::GeneralFailure),
                None => Err(FsError::NotFound),
            }
        })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let segs = segments(path.internal_path());
            let mut root = self.tree.lock().unwrap();
            let (parent, name) = parent_of(&mut root, &segs).ok_or(FsError::NotFound)?;
            match parent.get(&name) {
                Some(Node::File(..)) => {
                    parent.remove(&name);
                    Ok(())
                },
                Some(Node::Dir(..)) => Err(FsError::GeneralFailure),
                None => Err(FsError::NotFound),
            }
        })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from_segs = segments(from.internal_path());
            let to_segs = segments(to.internal_path());
            let mut root = self.tree.lock().unwrap();
            let node = {
                let (parent, name) = parent_of(&mut root, &from_segs).ok_or(FsError::NotFound)?;
                parent.remove(&name).ok_or(FsError::NotFound)?
            };
            let (to_parent, to_name) = parent_of(&mut root, &to_segs).ok_or(FsError::NotFound)?;
            to_parent.insert(to_name, node);
            Ok(())
        })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from_segs = segments(from.internal_path());
            let to_segs = segments(to.internal_path());
            let mut root = self.tree.lock().unwrap();
            let cloned = deep_clone(lookup(&root, &from_segs).ok_or(FsError::NotFound)?);
            let (to_parent, to_name) = parent_of(&mut root, &to_segs).ok_or(FsError::NotFound)?;
            to_parent.insert(to_name, cloned);
            Ok(())
        })
    }
}

fn deep_clone(node: &Node) -> Node {
    match node {
        Node::File(data, m) => Node::File(data.clone(), *m),
        Node::Dir(map, m) => Node::Dir(map.iter().map(|(k, v)| (k.clone(), deep_clone(v))).collect(), *m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> DavPath {
        DavPath::parse(p, "").unwrap()
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let fs = MemFs::new();
        let mut f = fs.open(&path("/a.txt"), OpenOptions::write_new()).await.unwrap();
        f.write(b"hello").await.unwrap();
        f.flush().await.unwrap();

        let mut f = fs.open(&path("/a.txt"), OpenOptions::read()).await.unwrap();
        let mut buf = [0u8; 5];
        let n = f.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn create_dir_then_read_dir_lists_children() {
        let fs = MemFs::new();
        fs.create_dir(&path("/sub")).await.unwrap();
        let mut f = fs.open(&path("/sub/x.txt"), OpenOptions::write_new()).await.unwrap();
        f.write(b"x").await.unwrap();
        f.flush().await.unwrap();

        let entries = fs.read_dir(&path("/sub")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), b"x.txt");
    }

    #[tokio::test]
    async fn rename_moves_node() {
        let fs = MemFs::new();
        let mut f = fs.open(&path("/a.txt"), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();

        fs.rename(&path("/a.txt"), &path("/b.txt")).await.unwrap();
        assert!(fs.metadata(&path("/a.txt")).await.is_err());
        assert!(fs.metadata(&path("/b.txt")).await.is_ok());
    }

    #[tokio::test]
    async fn copy_preserves_source() {
        let fs = MemFs::new();
        let mut f = fs.open(&path("/a.txt"), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();

        fs.copy(&path("/a.txt"), &path("/b.txt")).await.unwrap();
        assert!(fs.metadata(&path("/a.txt")).await.is_ok());
        assert!(fs.metadata(&path("/b.txt")).await.is_ok());
    }

    #[tokio::test]
    async fn create_new_on_existing_file_fails() {
        let fs = MemFs::new();
        let mut f = fs.open(&path("/a.txt"), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();

        let mut opts = OpenOptions::write_new();
        opts.create_new = true;
        opts.create = false;
        assert!(fs.open(&path("/a.txt"), opts).await.is_err());
    }

    #[tokio::test]
    async fn remove_dir_on_file_path_fails() {
        let fs = MemFs::new();
        let mut f = fs.open(&path("/a.txt"), OpenOptions::write_new()).await.unwrap();
        f.write(b"hi").await.unwrap();
        f.flush().await.unwrap();
        assert!(fs.remove_dir(&path("/a.txt")).await.is_err());
    }
}
