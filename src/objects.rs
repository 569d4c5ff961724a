//! Filesystem-backed object storage.
//!
//! Objects live at `{root}/{bucket}/{path}` with a metadata row in SQLite.
//! Writes are caller-scoped: the first path segment must be the caller's
//! actor id. Writing the same key again overwrites it.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::backend::Backend;
use crate::error::{CoreError, CoreResult};
use crate::identity::SessionContext;
use crate::logging;
use crate::policy;
use crate::storage::{ObjectRow, Profile};

pub const AVATAR_BUCKET: &str = "avatars";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredObject {
    #[serde(flatten)]
    pub meta: ObjectRow,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
    public_base: String,
    max_bytes: usize,
}

fn valid_bucket(bucket: &str) -> bool {
    !bucket.is_empty()
        && bucket.len() <= 63
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl ObjectStore {
    pub fn new(root: &Path, public_base: &str, max_bytes: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            public_base: public_base.trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/objects/{bucket}/{path}", self.public_base)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn file_path(&self, bucket: &str, path: &str) -> PathBuf {
        let mut p = self.root.join(bucket);
        for seg in path.split('/') {
            p.push(seg);
        }
        p
    }

    /// Store bytes under `bucket/path` and return the public reference.
    pub fn put(
        &self,
        backend: &Backend,
        ctx: &SessionContext,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> CoreResult<StoredObject> {
        if !valid_bucket(bucket) {
            return Err(CoreError::validation(format!("invalid bucket {bucket}")));
        }
        policy::ensure_object_path(ctx, path)?;
        if bytes.is_empty() {
            return Err(CoreError::validation("empty upload"));
        }
        if bytes.len() > self.max_bytes {
            return Err(CoreError::validation(format!(
                "upload larger than {} bytes",
                self.max_bytes
            )));
        }

        let target = self.file_path(bucket, path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write beside the target and rename so readers never see a torn file.
        let tmp = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        if let Err(e) = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, &target)) {
            let _ = std::fs::remove_file(&tmp);
            crate::hlog!("objects: write {}/{} failed: {}", bucket, path, e);
            return Err(e.into());
        }

        let meta = ObjectRow {
            bucket: bucket.to_string(),
            path: path.to_string(),
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(bytes)),
            updated_at: backend.now(),
        };
        backend.storage.upsert_object(&meta)?;
        crate::hlog!(
            "objects: {} stored {}/{} ({} bytes)",
            logging::actor_id(ctx.actor_id()),
            bucket,
            path,
            meta.size_bytes
        );
        Ok(StoredObject {
            url: self.public_url(bucket, path),
            meta,
        })
    }

    /// Objects are publicly readable by key.
    pub fn get(&self, backend: &Backend, bucket: &str, path: &str) -> CoreResult<(ObjectRow, Vec<u8>)> {
        let meta = backend
            .storage
            .get_object(bucket, path)?
            .ok_or_else(|| CoreError::not_found(format!("object {bucket}/{path}")))?;
        match std::fs::read(self.file_path(bucket, path)) {
            Ok(bytes) => Ok((meta, bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::not_found(format!("object {bucket}/{path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the caller's avatar and point their profile at it. The URL
    /// carries `?v=` so clients refetch after an overwrite.
    pub fn upload_avatar(
        &self,
        backend: &Backend,
        ctx: &SessionContext,
        bytes: &[u8],
        content_type: &str,
    ) -> CoreResult<Profile> {
        if !content_type.starts_with("image/") {
            return Err(CoreError::validation("avatar must be an image"));
        }
        let path = format!("{}/avatar", ctx.actor_id());
        let stored = self.put(backend, ctx, AVATAR_BUCKET, &path, bytes, content_type)?;

        let mut profile = backend
            .storage
            .get_profile(ctx.actor_id())?
            .ok_or_else(|| CoreError::not_found(format!("profile {}", ctx.actor_id())))?;
        profile.avatar_url = Some(format!("{}?v={}", stored.url, stored.meta.updated_at));
        profile.updated_at = stored.meta.updated_at;
        backend.storage.update_profile_fields(&profile)?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::auth;
    use crate::clock::ManualClock;
    use crate::identity::resolve_session;

    #[test]
    fn test_put_get_overwrite_and_scope() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Backend::in_memory(clock.clone()).unwrap();
        let store = ObjectStore::new(dir.path(), "http://localhost:3000/", 1024);
        let s = auth::sign_up(&backend, "alice", "secret1").unwrap();
        let ctx = resolve_session(&backend, &s.token).unwrap();
        let path = format!("{}/pic.png", ctx.actor_id());

        let first = store
            .put(&backend, &ctx, "media", &path, b"one", "image/png")
            .unwrap();
        assert_eq!(
            first.url,
            format!("http://localhost:3000/objects/media/{path}")
        );
        store
            .put(&backend, &ctx, "media", &path, b"two!", "image/png")
            .unwrap();
        let (meta, bytes) = store.get(&backend, "media", &path).unwrap();
        assert_eq!(bytes, b"two!");
        assert_eq!(meta.size_bytes, 4);

        assert!(matches!(
            store.put(&backend, &ctx, "media", "someone-else/pic.png", b"x", "image/png"),
            Err(CoreError::Forbidden(_))
        ));
        assert!(store
            .put(&backend, &ctx, "media", &path, &[0u8; 2048], "image/png")
            .is_err());
        assert!(matches!(
            store.get(&backend, "media", "nobody/none"),
            Err(CoreError::NotFound(_))
        ));

        clock.advance(Duration::from_secs(1));
        let profile = store
            .upload_avatar(&backend, &ctx, b"face", "image/png")
            .unwrap();
        assert!(profile
            .avatar_url
            .unwrap()
            .ends_with(&format!("/objects/avatars/{}/avatar?v=2000", ctx.actor_id())));
    }

    #[test]
    fn test_failed_put_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::in_memory(Arc::new(ManualClock::new(1_000))).unwrap();
        let store = ObjectStore::new(dir.path(), "http://localhost:3000", 1024);
        let s = auth::sign_up(&backend, "alice", "secret1").unwrap();
        let ctx = resolve_session(&backend, &s.token).unwrap();

        // A non-empty directory where the file should go makes the rename fail.
        let owner_dir = dir.path().join("media").join(ctx.actor_id());
        std::fs::create_dir_all(owner_dir.join("blocked.png")).unwrap();
        std::fs::write(owner_dir.join("blocked.png").join("inner"), b"x").unwrap();

        let path = format!("{}/blocked.png", ctx.actor_id());
        assert!(store
            .put(&backend, &ctx, "media", &path, b"data", "image/png")
            .is_err());
        let names: Vec<String> = std::fs::read_dir(&owner_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["blocked.png".to_string()]);
        assert!(matches!(
            store.get(&backend, "media", &path),
            Err(CoreError::NotFound(_))
        ));
    }
}
