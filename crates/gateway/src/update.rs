//! Appcast watcher.
//!
//! Polls the desktop client's appcast, rewrites the fingerprint file's
//! version fields when a new build ships, and kicks the external harvester
//! to re-extract the full fingerprint from a fresh download. The harvester
//! is single-flight: a trigger while one runs is dropped.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    regex::Regex,
    serde::{Deserialize, Serialize},
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use {
    courier_common::{fsio, retry::jitter},
    courier_config::{FingerprintStore, UpdateConfig},
    courier_transport::{Transport, headers::HeaderBuilder},
};

const APPCAST_TIMEOUT: Duration = Duration::from_secs(30);

/// Persisted watcher state (`update-state.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpdateState {
    pub last_check: Option<u64>,
    pub latest_version: Option<String>,
    pub latest_build: Option<String>,
    pub download_url: Option<String>,
    pub update_available: bool,
    pub current_version: String,
    pub current_build: String,
}

/// The first `<item>` of the appcast, reduced to what the watcher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppcastItem {
    pub short_version: String,
    pub build: String,
    pub download_url: Option<String>,
}

pub struct UpdateWatcher {
    config: UpdateConfig,
    fingerprint: Arc<FingerprintStore>,
    transport: Arc<dyn Transport>,
    state_path: PathBuf,
    state: Mutex<UpdateState>,
    harvest_inflight: AtomicBool,
}

impl UpdateWatcher {
    pub fn new(
        config: UpdateConfig,
        fingerprint: Arc<FingerprintStore>,
        transport: Arc<dyn Transport>,
        state_path: PathBuf,
    ) -> Arc<Self> {
        let fp = fingerprint.get();
        let state = match std::fs::read_to_string(&state_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => UpdateState {
                current_version: fp.app_version.clone(),
                current_build: fp.build_number.clone(),
                ..UpdateState::default()
            },
        };
        Arc::new(Self {
            config,
            fingerprint,
            transport,
            state_path,
            state: Mutex::new(state),
            harvest_inflight: AtomicBool::new(false),
        })
    }

    pub async fn snapshot(&self) -> UpdateState {
        self.state.lock().await.clone()
    }

    pub async fn flush(&self) {
        let state = self.state.lock().await.clone();
        if let Err(e) = fsio::persist_json(&self.state_path, &state).await {
            warn!(error = %e, "failed to persist update state");
        }
    }

    /// Run once at start, then every interval ± 10% jitter.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let base = Duration::from_secs(self.config.check_interval_minutes * 60);
            loop {
                if let Err(e) = self.check_once().await {
                    warn!(error = %e, "appcast check failed");
                }
                tokio::time::sleep(jitter(base, 0.1)).await;
            }
        })
    }

    /// One appcast fetch/compare cycle.
    pub async fn check_once(self: &Arc<Self>) -> courier_common::Result<()> {
        let headers = HeaderBuilder::new(self.fingerprint.get()).anonymous();
        let response = tokio::time::timeout(
            APPCAST_TIMEOUT,
            self.transport.get(&self.config.appcast_url, &headers),
        )
        .await
        .map_err(|_| courier_common::Error::message("appcast fetch timed out"))?
        .map_err(|e| courier_common::Error::message(format!("appcast fetch: {e}")))?;

        if !(200..300).contains(&response.status) {
            return Err(courier_common::Error::message(format!(
                "appcast returned {}",
                response.status
            )));
        }

        let Some(item) = parse_appcast(&response.body) else {
            return Err(courier_common::Error::message("appcast had no parseable item"));
        };

        let fp = self.fingerprint.get();
        let changed = item.short_version != fp.app_version || item.build != fp.build_number;
        {
            let mut state = self.state.lock().await;
            state.last_check = Some(now_secs());
            state.latest_version = Some(item.short_version.clone());
            state.latest_build = Some(item.build.clone());
            state.download_url = item.download_url.clone();
            state.update_available = changed;
            state.current_version = fp.app_version.clone();
            state.current_build = fp.build_number.clone();
        }
        self.flush().await;

        if !changed {
            debug!(version = %item.short_version, "client is current");
            return Ok(());
        }

        info!(
            from = %fp.app_version,
            to = %item.short_version,
            "new desktop build published, rewriting client version"
        );
        self.fingerprint
            .set_client_version(&item.short_version, &item.build)?;
        {
            let mut state = self.state.lock().await;
            state.current_version = item.short_version.clone();
            state.current_build = item.build.clone();
            state.update_available = false;
        }
        self.flush().await;

        self.spawn_harvester(item.download_url.as_deref());
        Ok(())
    }

    /// Kick the external fingerprint harvester, at most one at a time.
    fn spawn_harvester(self: &Arc<Self>, download_url: Option<&str>) {
        let Some(harvester) = self.config.harvester_path.clone() else {
            debug!("no harvester configured, skipping fingerprint re-extraction");
            return;
        };
        if self.harvest_inflight.swap(true, Ordering::SeqCst) {
            debug!("harvester already running, trigger ignored");
            return;
        }

        let watcher = self.clone();
        let download_url = download_url.map(ToString::to_string);
        tokio::spawn(async move {
            let mut cmd = tokio::process::Command::new(&harvester);
            cmd.arg(watcher.fingerprint.path());
            if let Some(url) = &download_url {
                cmd.arg(url);
            }
            info!(harvester = %harvester, "harvester started");
            match cmd.status().await {
                Ok(status) if status.success() => {
                    info!("harvester finished, reloading fingerprint");
                    if let Err(e) = watcher.fingerprint.reload() {
                        warn!(error = %e, "fingerprint reload failed after harvest");
                    }
                },
                Ok(status) => warn!(code = ?status.code(), "harvester exited nonzero"),
                Err(e) => warn!(error = %e, "failed to run harvester"),
            }
            watcher.harvest_inflight.store(false, Ordering::SeqCst);
        });
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Pull shortVersionString / version / enclosure url out of the first
/// `<item>` of a Sparkle-style appcast.
pub fn parse_appcast(xml: &str) -> Option<AppcastItem> {
    let item_re = Regex::new(r"(?s)<item>(.*?)</item>").ok()?;
    let item = item_re.captures(xml)?.get(1)?.as_str();

    let attr = |name: &str| -> Option<String> {
        Regex::new(&format!(r#"{name}="([^"]+)""#))
            .ok()?
            .captures(item)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };
    let tag = |name: &str| -> Option<String> {
        Regex::new(&format!(r"(?s)<{name}>\s*(.*?)\s*</{name}>"))
            .ok()?
            .captures(item)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };

    let short_version = attr("sparkle:shortVersionString")
        .or_else(|| tag("sparkle:shortVersionString"))?;
    let build = attr("sparkle:version").or_else(|| tag("sparkle:version"))?;
    let download_url = Regex::new(r#"<enclosure[^>]*\burl="([^"]+)""#)
        .ok()?
        .captures(item)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    Some(AppcastItem {
        short_version,
        build,
        download_url,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const APPCAST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0" xmlns:sparkle="http://www.andymatuschak.org/xml-namespaces/sparkle">
  <channel>
    <title>ChatGPT</title>
    <item>
      <title>1.2025.200</title>
      <pubDate>Wed, 15 Jul 2026 10:00:00 +0000</pubDate>
      <enclosure url="https://persistent.oaistatic.com/sidekick/ChatGPT_1.2025.200.dmg"
                 sparkle:version="1760001234"
                 sparkle:shortVersionString="1.2025.200"
                 length="123456" type="application/octet-stream"/>
    </item>
    <item>
      <title>1.2025.146</title>
      <enclosure url="https://persistent.oaistatic.com/sidekick/ChatGPT_1.2025.146.dmg"
                 sparkle:version="1748214243"
                 sparkle:shortVersionString="1.2025.146"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_first_item_only() {
        let item = parse_appcast(APPCAST).unwrap();
        assert_eq!(item.short_version, "1.2025.200");
        assert_eq!(item.build, "1760001234");
        assert!(item.download_url.unwrap().contains("1.2025.200"));
    }

    #[test]
    fn tag_style_versions_also_parse() {
        let xml = "<item><sparkle:shortVersionString>2.0.1</sparkle:shortVersionString>\
                   <sparkle:version>42</sparkle:version></item>";
        let item = parse_appcast(xml).unwrap();
        assert_eq!(item.short_version, "2.0.1");
        assert_eq!(item.build, "42");
        assert_eq!(item.download_url, None);
    }

    #[test]
    fn garbage_yields_none() {
        assert!(parse_appcast("<html>not an appcast</html>").is_none());
    }

    #[test]
    fn update_state_round_trips() {
        let state = UpdateState {
            last_check: Some(1_750_000_000),
            latest_version: Some("1.2025.200".into()),
            latest_build: Some("1760001234".into()),
            download_url: None,
            update_available: true,
            current_version: "1.2025.146".into(),
            current_build: "1748214243".into(),
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: UpdateState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
