//! Volume creation and file injection.
//!
//! Creation happens once per pod: every declared volume with an empty
//! `source` is allocated from the storage backend and the returned path is
//! recorded on the resolved spec (a populated `source` is never recomputed).
//! At start time the volumes are probed into the VM shared directory and the
//! declared files are written into container writable layers.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hyperpod_shared::errors::{HyperpodError, HyperpodResult};

use crate::pod::spec::{ContainerSpec, FileSpec, PodSpec};
use crate::storage::{StorageBackend, VolumeInfo};
use crate::store::PodStore;

/// Allocate backing storage for every volume without a source.
///
/// Volumes that already have a source (user-provided paths, hosts/service
/// volumes, volumes from a prior run of the same pod) are left untouched.
pub async fn create_volumes(
    storage: &dyn StorageBackend,
    store: &dyn PodStore,
    spec: &mut PodSpec,
) -> HyperpodResult<()> {
    for v in &mut spec.volumes {
        if !v.source.is_empty() {
            continue;
        }

        let info = storage.create_volume(&spec.id, &v.name).await?;
        v.source = info.filepath.to_string_lossy().into_owned();
        v.driver = if storage.is_block_backed() {
            // Raw block devices are handed to the VM directly.
            "raw".to_string()
        } else {
            "vfs".to_string()
        };

        store.write_volume(&spec.id, &v.name, &v.source)?;
        tracing::debug!(pod_id = %spec.id, volume = %v.name, source = %v.source, "created volume");
    }
    Ok(())
}

/// Probe every declared volume into the VM shared directory.
///
/// Fails fast on a volume whose source was never populated.
pub async fn mount_volumes(
    storage: &dyn StorageBackend,
    spec: &PodSpec,
    shared_dir: &Path,
) -> HyperpodResult<Vec<VolumeInfo>> {
    let mut volumes = Vec::with_capacity(spec.volumes.len());

    for v in &spec.volumes {
        if v.source.is_empty() {
            return Err(HyperpodError::Storage(format!(
                "volume {} in pod {} is not created",
                v.name, spec.id
            )));
        }
        volumes.push(storage.probe_volume(v, shared_dir).await?);
    }

    Ok(volumes)
}

/// Resolve the content of a declared file: inline string or URI source,
/// base64-decoded when the spec says so.
pub async fn resolve_file_content(file: &FileSpec) -> HyperpodResult<Vec<u8>> {
    let raw = if !file.uri.is_empty() {
        fetch_uri(&file.uri).await?
    } else {
        file.contents.clone().into_bytes()
    };

    match file.encoding.as_str() {
        "base64" => BASE64.decode(&raw).map_err(|e| {
            HyperpodError::Validation(format!("file {} is not valid base64: {}", file.name, e))
        }),
        _ => Ok(raw),
    }
}

async fn fetch_uri(uri: &str) -> HyperpodResult<Vec<u8>> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(tokio::fs::read(path).await?);
    }

    #[cfg(feature = "remote-files")]
    if uri.starts_with("http://") || uri.starts_with("https://") {
        let response = reqwest::get(uri)
            .await
            .map_err(|e| HyperpodError::Storage(format!("cannot fetch {}: {}", uri, e)))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HyperpodError::Storage(format!("cannot read {}: {}", uri, e)))?;
        return Ok(bytes.to_vec());
    }

    Err(HyperpodError::Validation(format!(
        "unsupported file uri scheme: {}",
        uri
    )))
}

/// Inject one container's declared files into its writable layer.
pub async fn inject_files(
    storage: &dyn StorageBackend,
    spec: &PodSpec,
    container: &ContainerSpec,
    mount_id: &str,
    shared_dir: &Path,
) -> HyperpodResult<()> {
    for fref in &container.files {
        let Some(file) = spec.files.iter().find(|f| f.name == fref.filename) else {
            continue;
        };

        let mut target = fref.path.clone();
        if target.ends_with('/') {
            target.push_str(&fref.filename);
        }

        let content = resolve_file_content(file).await?;
        storage
            .inject_file(
                &content,
                mount_id,
                Path::new(&target),
                shared_dir,
                parse_perm(&fref.perm)?,
                parse_id(&fref.user),
                parse_id(&fref.group),
            )
            .await?;
        tracing::debug!(
            pod_id = %spec.id,
            container = %container.name,
            target = %target,
            "injected file"
        );
    }
    Ok(())
}

fn parse_perm(perm: &str) -> HyperpodResult<u32> {
    if perm.is_empty() {
        return Ok(0o644);
    }
    u32::from_str_radix(perm, 8)
        .map_err(|_| HyperpodError::Validation(format!("invalid file permission {}", perm)))
}

fn parse_id(id: &str) -> u32 {
    id.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inline_content() {
        let file = FileSpec {
            name: "motd".into(),
            contents: "hello".into(),
            ..Default::default()
        };
        assert_eq!(resolve_file_content(&file).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_base64_content() {
        let file = FileSpec {
            name: "motd".into(),
            contents: "aGVsbG8=".into(),
            encoding: "base64".into(),
            ..Default::default()
        };
        assert_eq!(resolve_file_content(&file).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_file_uri_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolv.conf");
        std::fs::write(&path, "nameserver 1.1.1.1\n").unwrap();

        let file = FileSpec {
            name: "resolv".into(),
            uri: format!("file://{}", path.display()),
            ..Default::default()
        };
        assert_eq!(
            resolve_file_content(&file).await.unwrap(),
            b"nameserver 1.1.1.1\n"
        );
    }

    #[tokio::test]
    async fn test_unsupported_scheme_rejected() {
        let file = FileSpec {
            name: "f".into(),
            uri: "ftp://example.com/f".into(),
            ..Default::default()
        };
        assert!(matches!(
            resolve_file_content(&file).await,
            Err(HyperpodError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_perm() {
        assert_eq!(parse_perm("").unwrap(), 0o644);
        assert_eq!(parse_perm("0600").unwrap(), 0o600);
        assert!(parse_perm("rw-").is_err());
    }
}
