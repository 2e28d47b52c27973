//! Shared-secret bundles exchanged out of band between two parties.
//!
//! A bundle is a directory with a [`BUNDLE_MANIFEST`] naming the channel and
//! the four stream files, already mirrored for the party importing it: the
//! exporter's `id_in.key` is written as the bundle's `id_out.key` and so on.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KeyStoreError, Result};
use crate::fs;
use crate::id::ChannelId;
use crate::stream::StreamKind;

/// Manifest file name inside a bundle directory.
pub const BUNDLE_MANIFEST: &str = "bundle.json";

/// Current bundle format version.
pub const BUNDLE_FORMAT: u32 = 1;

/// Contents of [`BUNDLE_MANIFEST`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub format: u32,
    pub channel: ChannelId,
}

impl BundleManifest {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            format: BUNDLE_FORMAT,
            channel,
        }
    }

    /// Read and validate the manifest of the bundle at `dir`.
    ///
    /// Also checks that all four stream files are present.
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(BUNDLE_MANIFEST);
        let raw = std::fs::read(&path).map_err(|e| invalid(dir, format!("{BUNDLE_MANIFEST}: {e}")))?;
        let manifest: Self = serde_json::from_slice(&raw)
            .map_err(|e| invalid(dir, format!("{BUNDLE_MANIFEST}: {e}")))?;

        if manifest.format != BUNDLE_FORMAT {
            return Err(invalid(
                dir,
                format!("unsupported bundle format {}", manifest.format),
            ));
        }
        for kind in StreamKind::ALL {
            if !dir.join(kind.key_file()).is_file() {
                return Err(invalid(dir, format!("missing {}", kind.key_file())));
            }
        }
        Ok(manifest)
    }

    pub(crate) fn write(&self, dir: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| invalid(dir, format!("serializing manifest: {e}")))?;
        fs::write_private_file(&dir.join(BUNDLE_MANIFEST), &data)
    }
}

fn invalid(dir: &Path, reason: String) -> KeyStoreError {
    KeyStoreError::InvalidBundle {
        path: dir.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "anoncast-bundle-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn manifest_requires_all_streams() {
        let dir = unique_temp_dir("partial");
        let manifest = BundleManifest::new(ChannelId::new_random());
        manifest.write(&dir).unwrap();
        std::fs::write(dir.join("id_out.key"), b"x").unwrap();

        let err = BundleManifest::read(&dir).unwrap_err();
        assert!(matches!(err, KeyStoreError::InvalidBundle { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn manifest_reads_back() {
        let dir = unique_temp_dir("full");
        let manifest = BundleManifest::new(ChannelId::new_random());
        manifest.write(&dir).unwrap();
        for kind in StreamKind::ALL {
            std::fs::write(dir.join(kind.key_file()), b"key").unwrap();
        }

        assert_eq!(BundleManifest::read(&dir).unwrap(), manifest);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_unknown_format() {
        let dir = unique_temp_dir("format");
        std::fs::write(
            dir.join(BUNDLE_MANIFEST),
            br#"{"format": 9, "channel": "67e55044-10b1-426f-9247-bb680e5fe0c8"}"#,
        )
        .unwrap();
        let err = BundleManifest::read(&dir).unwrap_err();
        assert!(err.to_string().contains("unsupported bundle format 9"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
