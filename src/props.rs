//! Property store (§4.4). Dead properties are opaque XML fragments keyed by
//! qualified name and attached to a path; the engine never interprets their
//! content, only moves/copies/serializes them.
//!
//! Async, unlike the lock store: a file-backed implementation does I/O, and
//! the trait has to accommodate that without two parallel interfaces.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::{DavError, DavResult};

pub type PropFuture<'a, T> = Pin<Box<dyn Future<Output = DavResult<T>> + Send + 'a>>;

/// A qualified property name: `{namespace}local-name`, or just `local-name`
/// when the namespace is empty (matches `DAV:` unprefixed conventions).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QName {
    pub ns: String,
    pub name: String,
}

impl QName {
    pub fn new(ns: impl Into<String>, name: impl Into<String>) -> QName {
        QName { ns: ns.into(), name: name.into() }
    }

    /// `"{ns}name"`, or bare `name` when `ns` is empty, per §4.4.
    pub fn qualified(&self) -> String {
        if self.ns.is_empty() {
            self.name.clone()
        } else {
            format!("{{{}}}{}", self.ns, self.name)
        }
    }
}

/// A stored dead property: raw inner XML, kept opaque to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DavProp {
    pub name: QName,
    pub xml: String,
}

pub trait PropertyStore: Send + Sync {
    fn get_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, HashMap<QName, DavProp>>;
    fn get<'a>(&'a self, path: &'a str, name: &'a QName) -> PropFuture<'a, Option<DavProp>>;
    fn set<'a>(&'a self, path: &'a str, prop: DavProp) -> PropFuture<'a, ()>;
    fn remove<'a>(&'a self, path: &'a str, name: &'a QName) -> PropFuture<'a, bool>;
    fn remove_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, ()>;
    /// Equivalent to `copy` then `remove_all(from)`; implementations may
    /// perform an actual rename when that's cheaper (§4.4 invariant).
    fn mv<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()>;
    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()>;
    fn has<'a>(&'a self, path: &'a str) -> PropFuture<'a, bool>;
    fn count<'a>(&'a self, path: &'a str) -> PropFuture<'a, usize>;
    fn close(&self) {}
}

/// In-process property store. Nothing persists across restarts.
#[derive(Default)]
pub struct MemoryPropertyStore {
    table: RwLock<HashMap<String, HashMap<QName, DavProp>>>,
}

impl MemoryPropertyStore {
    pub fn new() -> MemoryPropertyStore {
        MemoryPropertyStore::default()
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn get_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, HashMap<QName, DavProp>> {
        Box::pin(async move { Ok(self.table.read().await.get(path).cloned().unwrap_or_default()) })
    }

    fn get<'a>(&'a self, path: &'a str, name: &'a QName) -> PropFuture<'a, Option<DavProp>> {
        Box::pin(async move { Ok(self.table.read().await.get(path).and_then(|m| m.get(name)).cloned()) })
    }

    fn set<'a>(&'a self, path: &'a str, prop: DavProp) -> PropFuture<'a, ()> {
        Box::pin(async move {
            self.table.write().await.entry(path.to_string()).or_default().insert(prop.name.clone(), prop);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, path: &'a str, name: &'a QName) -> PropFuture<'a, bool> {
        Box::pin(async move {
            let mut table = self.table.write().await;
            Ok(table.get_mut(path).map(|m| m.remove(name).is_some()).unwrap_or(false))
        })
    }

    fn remove_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, ()> {
        Box::pin(async move {
            self.table.write().await.remove(path);
            Ok(())
        })
    }

    fn mv<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()> {
        Box::pin(async move {
            let mut table = self.table.write().await;
            match table.remove(from) {
                Some(props) => {
                    table.insert(to.to_string(), props);
                },
                None => {
                    table.remove(to);
                },
            }
            Ok(())
        })
    }

    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()> {
        Box::pin(async move {
            let mut table = self.table.write().await;
            match table.get(from).cloned() {
                Some(props) => {
                    table.insert(to.to_string(), props);
                },
                None => {
                    table.remove(to);
                },
            }
            Ok(())
        })
    }

    fn has<'a>(&'a self, path: &'a str) -> PropFuture<'a, bool> {
        Box::pin(async move { Ok(self.table.read().await.get(path).map(|m| !m.is_empty()).unwrap_or(false)) })
    }

    fn count<'a>(&'a self, path: &'a str) -> PropFuture<'a, usize> {
        Box::pin(async move { Ok(self.table.read().await.get(path).map(|m| m.len()).unwrap_or(0)) })
    }
}

/// Persists properties as a hidden sibling JSON file next to each resource:
/// `.{basename}.properties`. Writes are serialized through a single mutex;
/// there is no cross-process coordination (single-engine-instance scope).
pub struct FilePropertyStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePropertyStore {
    pub fn new(root: impl Into<PathBuf>) -> FilePropertyStore {
        FilePropertyStore { root: root.into(), write_lock: Mutex::new(()) }
    }

    fn sidecar_path(&self, path: &str) -> PathBuf {
        let trimmed = path.trim_start_matches('/').trim_end_matches('/');
        let (parent, base) = match trimmed.rsplit_once('/') {
            Some((p, b)) => (p, b),
            None => ("", trimmed),
        };
        let basename = if base.is_empty() { "__root__" } else { base };
        let dir = if parent.is_empty() { self.root.clone() } else { self.root.join(parent) };
        dir.join(format!(".{}.properties", basename))
    }

    /// Corrupt or absent stored data reads back as empty (§4.4 invariant):
    /// no parse error ever surfaces to the engine.
    async fn read_map(&self, path: &str) -> HashMap<QName, DavProp> {
        let file = self.sidecar_path(path);
        match tokio::fs::read(&file).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    async fn write_map(&self, path: &str, map: &HashMap<QName, DavProp>) -> DavResult<()> {
        let file = self.sidecar_path(path);
        if map.is_empty() {
            let _ = tokio::fs::remove_file(&file).await;
            return Ok(());
        }
        if let Some(dir) = file.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec(map).map_err(|e| DavError::Xml(e.to_string()))?;
        tokio::fs::write(&file, bytes).await?;
        Ok(())
    }
}

impl PropertyStore for FilePropertyStore {
    fn get_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, HashMap<QName, DavProp>> {
        Box::pin(async move { Ok(self.read_map(path).await) })
    }

    fn get<'a>(&'a self, path: &'a str, name: &'a QName) -> PropFuture<'a, Option<DavProp>> {
        Box::pin(async move { Ok(self.read_map(path).await.get(name).cloned()) })
    }

    fn set<'a>(&'a self, path: &'a str, prop: DavProp) -> PropFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut map = self.read_map(path).await;
            map.insert(prop.name.clone(), prop);
            self.write_map(path, &map).await
        })
    }

    fn remove<'a>(&'a self, path: &'a str, name: &'a QName) -> PropFuture<'a, bool> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut map = self.read_map(path).await;
            let removed = map.remove(name).is_some();
            self.write_map(path, &map).await?;
            Ok(removed)
        })
    }

    fn remove_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let _ = tokio::fs::remove_file(self.sidecar_path(path)).await;
            Ok(())
        })
    }

    fn mv<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let (from_file, to_file) = (self.sidecar_path(from), self.sidecar_path(to));
            if let Some(dir) = to_file.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            match tokio::fs::rename(&from_file, &to_file).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    let _ = tokio::fs::remove_file(&to_file).await;
                    Ok(())
                },
            }
        })
    }

    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let map = self.read_map(from).await;
            self.write_map(to, &map).await
        })
    }

    fn has<'a>(&'a self, path: &'a str) -> PropFuture<'a, bool> {
        Box::pin(async move { Ok(!self.read_map(path).await.is_empty()) })
    }

    fn count<'a>(&'a self, path: &'a str) -> PropFuture<'a, usize> {
        Box::pin(async move { Ok(self.read_map(path).await.len()) })
    }
}

fn _assert_object_safe(_: &dyn PropertyStore) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qname_formats_with_and_without_namespace() {
        assert_eq!(QName::new("", "displayname").qualified(), "displayname");
        assert_eq!(QName::new("DAV:", "displayname").qualified(), "{DAV:}displayname");
    }

    #[tokio::test]
    async fn memory_store_set_get_remove() {
        let store = MemoryPropertyStore::new();
        let name = QName::new("DAV:", "displayname");
        store.set("/a.txt", DavProp { name: name.clone(), xml: "<D:displayname>a</D:displayname>".into() }).await.unwrap();
        assert!(store.has("/a.txt").await.unwrap());
        assert_eq!(store.count("/a.txt").await.unwrap(), 1);
        assert!(store.get("/a.txt", &name).await.unwrap().is_some());
        assert!(store.remove("/a.txt", &name).await.unwrap());
        assert!(!store.has("/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_move_clears_source() {
        let store = MemoryPropertyStore::new();
        let name = QName::new("", "author");
        store.set("/a.txt", DavProp { name, xml: "bob".into() }).await.unwrap();
        store.mv("/a.txt", "/b.txt").await.unwrap();
        assert!(!store.has("/a.txt").await.unwrap());
        assert!(store.has("/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_copy_keeps_source() {
        let store = MemoryPropertyStore::new();
        let name = QName::new("", "author");
        store.set("/a.txt", DavProp { name, xml: "bob".into() }).await.unwrap();
        store.copy("/a.txt", "/b.txt").await.unwrap();
        assert!(store.has("/a.txt").await.unwrap());
        assert!(store.has("/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn file_store_round_trips_through_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePropertyStore::new(dir.path());
        let name = QName::new("DAV:", "displayname");
        store.set("/sub/a.txt", DavProp { name: name.clone(), xml: "hi".into() }).await.unwrap();
        assert!(dir.path().join("sub").join(".a.txt.properties").exists());
        let got = store.get("/sub/a.txt", &name).await.unwrap();
        assert_eq!(got.unwrap().xml, "hi");
    }

    #[tokio::test]
    async fn file_store_treats_corrupt_sidecar_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(".a.txt.properties"), b"not json").await.unwrap();
        let store = FilePropertyStore::new(dir.path());
        let all = store.get_all("/a.txt").await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn file_store_move_renames_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePropertyStore::new(dir.path());
        let name = QName::new("", "x");
        store.set("/a.txt", DavProp { name, xml: "v".into() }).await.unwrap();
        store.mv("/a.txt", "/b.txt").await.unwrap();
        assert!(!dir.path().join(".a.txt.properties").exists());
        assert!(dir.path().join(".b.txt.properties").exists());
    }
}
