//! Local disk cache of schema blobs, one file per namespace and resource type.
use super::ResourceType;
use bytes::Bytes;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Distinct namespaces always map to distinct file names.
    pub fn path_for(&self, namespace: &str, resource_type: ResourceType) -> PathBuf {
        self.root.join(format!(
            "{}.{}.bin",
            encode_namespace(namespace),
            resource_type.as_str()
        ))
    }

    /// Reads a cached blob, `None` when nothing was cached yet.
    pub async fn read(&self, namespace: &str, resource_type: ResourceType) -> io::Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(namespace, resource_type)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replaces the cached blob. Readers see the old or the new file, never a torn one.
    pub async fn write(
        &self,
        namespace: &str,
        resource_type: ResourceType,
        bytes: &[u8],
    ) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.path_for(namespace, resource_type);
        let tmp = path.with_extension("bin.tmp");

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await
    }
}

fn encode_namespace(namespace: &str) -> String {
    let mut out = String::with_capacity(namespace.len());
    for b in namespace.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            let _ = write!(&mut out, "%{b:02X}");
        }
    }
    out
}
