//! Client fingerprint store.
//!
//! The fingerprint file carries everything harvested from a desktop client
//! install: the user-agent template, the exact header order the client emits,
//! its static default headers, and the Chromium build the TLS stack must
//! impersonate. It is immutable at runtime except through [`FingerprintStore::reload`]
//! and the update watcher's version rewrite.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use {
    serde::{Deserialize, Serialize},
    tracing::{info, warn},
};

use courier_common::{Error, Result, fsio::atomic_write};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Fingerprint {
    /// Template filled with `{version}`, `{platform}`, `{arch}`.
    pub user_agent_template: String,
    pub chromium_version: String,
    pub app_version: String,
    pub build_number: String,
    /// Exact emission order; unknown headers are appended after these.
    pub header_order: Vec<String>,
    pub default_headers: BTreeMap<String, String>,
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self {
            user_agent_template:
                "Mozilla/5.0 ({platform}; {arch}) AppleWebKit/537.36 (KHTML, like Gecko) \
                 ChatGPT/{version} Chrome/136.0.0.0 Electron/36.4.0 Safari/537.36"
                    .into(),
            chromium_version: "136.0.7103.113".into(),
            app_version: "1.2025.146".into(),
            build_number: "1748214243".into(),
            header_order: [
                "host",
                "connection",
                "content-length",
                "authorization",
                "sec-ch-ua-platform",
                "user-agent",
                "sec-ch-ua",
                "chatgpt-account-id",
                "content-type",
                "sec-ch-ua-mobile",
                "originator",
                "accept",
                "sec-fetch-site",
                "sec-fetch-mode",
                "sec-fetch-dest",
                "accept-encoding",
                "accept-language",
                "cookie",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            default_headers: [
                ("accept-encoding", "gzip, deflate, br, zstd"),
                ("accept-language", "en-US,en;q=0.9"),
                ("sec-fetch-dest", "empty"),
                ("sec-fetch-mode", "cors"),
                ("sec-fetch-site", "none"),
            ]
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        }
    }
}

impl Fingerprint {
    /// Chromium major version, used for `sec-ch-ua` brand lists.
    pub fn chromium_major(&self) -> &str {
        self.chromium_version
            .split('.')
            .next()
            .unwrap_or(&self.chromium_version)
    }
}

/// Loads the fingerprint YAML and hands out snapshots.
pub struct FingerprintStore {
    path: PathBuf,
    inner: RwLock<Fingerprint>,
}

impl FingerprintStore {
    /// Load from `path`, falling back to the built-in fingerprint when the
    /// file is missing or malformed.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let fingerprint = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_yaml::from_str(&raw) {
                Ok(fp) => fp,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed fingerprint file, using built-in");
                    Fingerprint::default()
                },
            },
            Err(_) => {
                info!(path = %path.display(), "no fingerprint file, using built-in");
                Fingerprint::default()
            },
        };
        Self {
            path,
            inner: RwLock::new(fingerprint),
        }
    }

    /// Current fingerprint snapshot.
    pub fn get(&self) -> Fingerprint {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, replacing the in-memory fingerprint on success.
    pub fn reload(&self) -> Result<()> {
        let raw = std::fs::read_to_string(&self.path)?;
        let fingerprint: Fingerprint = serde_yaml::from_str(&raw)
            .map_err(|e| Error::message(format!("parse {}: {e}", self.path.display())))?;
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = fingerprint;
        Ok(())
    }

    /// Rewrite `app_version` / `build_number` in the YAML file in place,
    /// preserving every other key, then update the in-memory copy.
    ///
    /// Loads the file as a raw YAML value so harvested keys this build does
    /// not model survive the rewrite.
    pub fn set_client_version(&self, version: &str, build: &str) -> Result<()> {
        let mut doc: serde_yaml::Value = match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_yaml::from_str(&raw)
                .map_err(|e| Error::message(format!("parse {}: {e}", self.path.display())))?,
            // File may not exist yet; serialize the current snapshot.
            Err(_) => serde_yaml::to_value(self.get())
                .map_err(|e| Error::message(format!("serialize fingerprint: {e}")))?,
        };

        if let Some(map) = doc.as_mapping_mut() {
            map.insert("app_version".into(), version.into());
            map.insert("build_number".into(), build.into());
        }

        let yaml = serde_yaml::to_string(&doc)
            .map_err(|e| Error::message(format!("serialize fingerprint: {e}")))?;
        atomic_write(&self.path, yaml.as_bytes())?;

        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.app_version = version.to_string();
            inner.build_number = build.to_string();
        }
        info!(version, build, "client version updated");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_builtin() {
        let store = FingerprintStore::load("/nonexistent/fingerprint.yaml");
        let fp = store.get();
        assert_eq!(fp.chromium_major(), "136");
        assert!(!fp.header_order.is_empty());
    }

    #[test]
    fn set_client_version_preserves_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprint.yaml");
        std::fs::write(
            &path,
            "app_version: \"1.0.0\"\nbuild_number: \"1\"\nharvested_extra: keepme\n",
        )
        .unwrap();

        let store = FingerprintStore::load(&path);
        store.set_client_version("1.2025.200", "1760000000").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&raw).unwrap();
        assert_eq!(doc["app_version"], "1.2025.200");
        assert_eq!(doc["build_number"], "1760000000");
        assert_eq!(doc["harvested_extra"], "keepme");
        assert_eq!(store.get().app_version, "1.2025.200");
    }

    #[test]
    fn reload_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprint.yaml");
        let store = FingerprintStore::load(&path);

        let mut fp = Fingerprint::default();
        fp.chromium_version = "137.0.1.2".into();
        std::fs::write(&path, serde_yaml::to_string(&fp).unwrap()).unwrap();

        store.reload().unwrap();
        assert_eq!(store.get().chromium_major(), "137");
    }
}
