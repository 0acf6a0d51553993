//! Plugin installer: GitHub archives, local zips, uploaded bytes.
//!
//! Every zip entry is preflighted before any filesystem write: absolute
//! paths, `..` components, and Windows drive prefixes are rejected while the
//! plugins directory is still untouched. Extraction re-validates each
//! destination; a mid-extraction failure removes the target directory.

use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use zip::ZipArchive;

use cerise_domain::config::{InstalledPlugin, PluginManifest};
use cerise_domain::error::{Error, Result};

use crate::registry_file::PluginsJson;

pub struct PluginInstaller {
    plugins_dir: PathBuf,
    registry_file: PluginsJson,
}

impl PluginInstaller {
    pub fn new(plugins_dir: impl Into<PathBuf>, registry_file: PluginsJson) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            registry_file,
        }
    }

    /// Install from a public GitHub repository (`https://github.com/o/r`).
    pub async fn install_from_github(
        &self,
        repo_url: &str,
        branch: &str,
    ) -> Option<InstalledPlugin> {
        let trimmed = repo_url.trim_end_matches('/');
        let path = trimmed.strip_prefix("https://github.com/").unwrap_or("");
        let mut parts = path.split('/');
        let (Some(owner), Some(repo)) = (parts.next(), parts.next()) else {
            tracing::error!(url = %repo_url, "invalid GitHub URL");
            return None;
        };
        if owner.is_empty() || repo.is_empty() {
            tracing::error!(url = %repo_url, "invalid GitHub URL");
            return None;
        }

        let zip_url =
            format!("https://github.com/{owner}/{repo}/archive/refs/heads/{branch}.zip");
        tracing::info!(url = %zip_url, "downloading plugin archive");

        let bytes = match download(&zip_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(url = %zip_url, error = %e, "failed to download from GitHub");
                return None;
            }
        };
        self.install_zip_bytes(&bytes, "github", repo_url).await
    }

    /// Install from a zip file on disk.
    pub async fn install_from_zip(&self, zip_path: &Path) -> Option<InstalledPlugin> {
        let bytes = match std::fs::read(zip_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(path = %zip_path.display(), error = %e, "zip file not readable");
                return None;
            }
        };
        self.install_zip_bytes(&bytes, "zip", &zip_path.display().to_string())
            .await
    }

    /// Install from uploaded zip bytes.
    pub async fn install_from_zip_bytes(&self, zip_bytes: &[u8]) -> Option<InstalledPlugin> {
        self.install_zip_bytes(zip_bytes, "upload", "").await
    }

    async fn install_zip_bytes(
        &self,
        zip_bytes: &[u8],
        source: &str,
        source_url: &str,
    ) -> Option<InstalledPlugin> {
        match self.try_install(zip_bytes, source, source_url).await {
            Ok(plugin) => Some(plugin),
            Err(e) => {
                tracing::error!(error = %e, "failed to install plugin");
                None
            }
        }
    }

    async fn try_install(
        &self,
        zip_bytes: &[u8],
        source: &str,
        source_url: &str,
    ) -> Result<InstalledPlugin> {
        let mut archive = ZipArchive::new(Cursor::new(zip_bytes))
            .map_err(|e| Error::InvalidArgument(format!("invalid zip file: {e}")))?;

        let (plugin_root, manifest) = locate_manifest(&mut archive)?;
        let plugin_name = sanitize_manifest_name(&manifest.name)?;
        manifest
            .validate()
            .map_err(Error::InvalidArgument)?;

        // Preflight every entry before touching the filesystem.
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .map_err(|e| Error::InvalidArgument(format!("unreadable zip entry: {e}")))?;
            if entry.is_dir() {
                continue;
            }
            if let Some(rel_path) = relative_entry_path(entry.name(), &plugin_root) {
                validate_entry_path(&rel_path)?;
            }
        }

        let target_dir = self.plugins_dir.join(&plugin_name);
        if target_dir.exists() {
            tracing::warn!(plugin = %plugin_name, "removing existing plugin");
            std::fs::remove_dir_all(&target_dir).map_err(Error::Io)?;
        }
        std::fs::create_dir_all(&target_dir).map_err(Error::Io)?;

        if let Err(e) = extract_entries(&mut archive, &plugin_root, &target_dir) {
            let _ = std::fs::remove_dir_all(&target_dir);
            return Err(e);
        }

        tracing::info!(plugin = %plugin_name, version = %manifest.version, "installed plugin");

        let plugin = InstalledPlugin {
            name: plugin_name,
            version: manifest.version.clone(),
            source: source.to_string(),
            source_url: source_url.to_string(),
            enabled: true,
            installed_at: chrono::Utc::now().to_rfc3339(),
        };
        self.registry_file.upsert(plugin.clone())?;
        Ok(plugin)
    }
}

async fn download(url: &str) -> Result<Vec<u8>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| Error::Http(e.to_string()))?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?
        .error_for_status()
        .map_err(|e| Error::Http(e.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Find `manifest.json` at the archive root or one directory deep. Returns
/// the directory prefix (empty at root) and the parsed manifest.
fn locate_manifest(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<(String, PluginManifest)> {
    let mut found: Option<(String, usize)> = None;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| Error::InvalidArgument(format!("unreadable zip entry: {e}")))?;
        let name = entry.name();
        if name == "manifest.json" {
            found = Some((String::new(), index));
            break;
        }
        let parts: Vec<&str> = name.split('/').collect();
        if parts.len() == 2 && parts[1] == "manifest.json" {
            found = Some((parts[0].to_string(), index));
            break;
        }
    }
    let (root, index) =
        found.ok_or_else(|| Error::InvalidArgument("no manifest.json found in zip".into()))?;
    let mut entry = archive
        .by_index(index)
        .map_err(|e| Error::InvalidArgument(format!("unreadable zip entry: {e}")))?;
    let mut raw = String::new();
    entry
        .read_to_string(&mut raw)
        .map_err(|e| Error::InvalidArgument(format!("unreadable manifest.json: {e}")))?;
    let manifest: PluginManifest = serde_json::from_str(&raw)
        .map_err(|e| Error::InvalidArgument(format!("invalid manifest.json: {e}")))?;
    Ok((root, manifest))
}

/// Derive a safe on-disk name from the manifest name: path separators become
/// dashes; `.`/`..` and drive colons are rejected.
fn sanitize_manifest_name(raw: &str) -> Result<String> {
    let name = raw.trim().replace(['/', '\\'], "-");
    if name.is_empty() {
        return Err(Error::InvalidArgument(
            "plugin name not found in manifest".into(),
        ));
    }
    if name == "." || name == ".." || name.contains(':') {
        return Err(Error::InvalidArgument(format!(
            "unsafe plugin name in manifest: {raw}"
        )));
    }
    Ok(name)
}

/// The entry's path relative to the plugin root, or `None` when the entry is
/// outside the root (multi-directory archives) or is the root itself.
fn relative_entry_path(entry_name: &str, plugin_root: &str) -> Option<String> {
    let rel = if plugin_root.is_empty() {
        entry_name
    } else {
        entry_name.strip_prefix(&format!("{plugin_root}/"))?
    };
    if rel.is_empty() {
        return None;
    }
    Some(rel.to_string())
}

/// Reject absolute paths, `..` components, and `:` in the first component.
fn validate_entry_path(rel_path: &str) -> Result<()> {
    let unsafe_path = || Error::InvalidArgument(format!("unsafe path in plugin zip: {rel_path}"));
    if rel_path.starts_with('/') || rel_path.starts_with('\\') {
        return Err(unsafe_path());
    }
    let mut components = rel_path.split(['/', '\\']);
    if let Some(first) = components.next() {
        if first.contains(':') {
            return Err(unsafe_path());
        }
        if first == ".." {
            return Err(unsafe_path());
        }
    }
    for part in components {
        if part == ".." {
            return Err(unsafe_path());
        }
    }
    Ok(())
}

fn extract_entries(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    plugin_root: &str,
    target_dir: &Path,
) -> Result<()> {
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| Error::InvalidArgument(format!("unreadable zip entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let Some(rel_path) = relative_entry_path(entry.name(), plugin_root) else {
            continue;
        };
        validate_entry_path(&rel_path)?;

        let dest = target_dir.join(rel_path.replace('\\', "/"));
        // Re-check containment on the built destination path.
        if !dest.starts_with(target_dir)
            || dest.components().any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Error::InvalidArgument(format!(
                "unsafe path in plugin zip: {rel_path}"
            )));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let mut out = std::fs::File::create(&dest).map_err(Error::Io)?;
        std::io::copy(&mut entry, &mut out).map_err(Error::Io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::FileOptions;

    use super::*;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, content) in entries {
                writer
                    .start_file(*name, FileOptions::default())
                    .unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn manifest_json(name: &str) -> String {
        format!(
            r#"{{"name":"{name}","version":"0.1.0","entry_point":"plugin.py","class_name":"Plugin"}}"#
        )
    }

    fn installer(dir: &Path) -> PluginInstaller {
        PluginInstaller::new(
            dir.join("plugins"),
            PluginsJson::new(dir.join("plugins.json")),
        )
    }

    #[tokio::test]
    async fn installs_root_level_zip() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = installer(tmp.path());
        let zip = build_zip(&[
            ("manifest.json", &manifest_json("demo")),
            ("plugin.py", "print('hi')"),
            ("sub/data.txt", "x"),
        ]);
        let plugin = installer.install_from_zip_bytes(&zip).await.unwrap();
        assert_eq!(plugin.name, "demo");
        assert_eq!(plugin.source, "upload");
        let root = tmp.path().join("plugins/demo");
        assert!(root.join("manifest.json").exists());
        assert!(root.join("plugin.py").exists());
        assert!(root.join("sub/data.txt").exists());
    }

    #[tokio::test]
    async fn installs_one_level_deep_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = installer(tmp.path());
        let zip = build_zip(&[
            ("repo-main/manifest.json", &manifest_json("deep")),
            ("repo-main/plugin.py", "code"),
        ]);
        let plugin = installer.install_from_zip_bytes(&zip).await.unwrap();
        assert_eq!(plugin.name, "deep");
        assert!(tmp.path().join("plugins/deep/plugin.py").exists());
    }

    #[tokio::test]
    async fn rejects_traversal_entry_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = installer(tmp.path());
        let zip = build_zip(&[
            ("manifest.json", &manifest_json("bad-plugin")),
            ("../evil.txt", "pwn"),
        ]);
        assert!(installer.install_from_zip_bytes(&zip).await.is_none());
        assert!(!tmp.path().join("evil.txt").exists());
        assert!(!tmp.path().join("plugins/bad-plugin").exists());
        assert!(!tmp.path().join("plugins/evil.txt").exists());
    }

    #[tokio::test]
    async fn rejects_absolute_and_drive_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = installer(tmp.path());
        for evil in ["/etc/evil.txt", "C:\\evil.txt"] {
            let zip = build_zip(&[
                ("manifest.json", &manifest_json("bad")),
                (evil, "pwn"),
            ]);
            assert!(
                installer.install_from_zip_bytes(&zip).await.is_none(),
                "expected rejection for {evil}"
            );
            assert!(!tmp.path().join("plugins/bad").exists());
        }
    }

    #[tokio::test]
    async fn rejects_unsafe_manifest_names() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = installer(tmp.path());
        for bad in ["..", "c:drive"] {
            let zip = build_zip(&[("manifest.json", &manifest_json(bad))]);
            assert!(installer.install_from_zip_bytes(&zip).await.is_none());
        }
        // Separators are mapped to dashes rather than rejected.
        let zip = build_zip(&[("manifest.json", &manifest_json("a/b"))]);
        let plugin = installer.install_from_zip_bytes(&zip).await.unwrap();
        assert_eq!(plugin.name, "a-b");
    }

    #[tokio::test]
    async fn reinstall_replaces_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = installer(tmp.path());
        let v1 = build_zip(&[
            ("manifest.json", &manifest_json("demo")),
            ("old.txt", "old"),
        ]);
        installer.install_from_zip_bytes(&v1).await.unwrap();
        let v2 = build_zip(&[
            ("manifest.json", &manifest_json("demo")),
            ("new.txt", "new"),
        ]);
        installer.install_from_zip_bytes(&v2).await.unwrap();
        let root = tmp.path().join("plugins/demo");
        assert!(!root.join("old.txt").exists());
        assert!(root.join("new.txt").exists());
    }

    #[tokio::test]
    async fn registry_file_records_install() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = installer(tmp.path());
        let zip = build_zip(&[("manifest.json", &manifest_json("demo"))]);
        installer.install_from_zip_bytes(&zip).await.unwrap();
        let registry = PluginsJson::new(tmp.path().join("plugins.json"));
        let plugins = registry.list().unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "demo");
        assert!(plugins[0].enabled);
    }
}
