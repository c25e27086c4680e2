//! File-backed response cache with name-based TTL heuristics.

use super::envelope::ToolResult;
use crate::types::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Freshness windows. `None` never expires.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtl {
    pub realtime: Option<Duration>,
    pub historical: Option<Duration>,
    pub static_data: Option<Duration>,
    pub default: Option<Duration>,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            realtime: Some(Duration::from_secs(60)),
            historical: None,
            static_data: Some(Duration::from_secs(7 * 24 * 3600)),
            default: Some(Duration::from_secs(3600)),
        }
    }
}

const REALTIME_HINTS: &[&str] = &["spot", "realtime", "real_time", "current", "bid_ask", "intraday"];
const HISTORICAL_HINTS: &[&str] = &["hist", "daily", "minute", "min", "tick", "kline"];
const STATIC_HINTS: &[&str] = &[
    "info", "name", "code", "list", "category", "profile", "components", "cons",
];

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    timestamp: f64,
    result: ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub count: usize,
    pub size_bytes: u64,
    pub cache_dir: String,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    enabled: bool,
    ttl: CacheTtl,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
            ttl: CacheTtl::default(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), false)
    }

    pub fn with_ttl(mut self, ttl: CacheTtl) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Hex SHA-256 of `name:canonical-json(args)`.
    pub fn key(name: &str, args: &Map<String, Value>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(canonical_json(&Value::Object(args.clone())).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// First matching heuristic wins: realtime, historical, static, default.
    pub fn ttl_for(&self, name: &str) -> Option<Duration> {
        let lower = name.to_lowercase();
        let hit = |hints: &[&str]| hints.iter().any(|h| lower.contains(h));
        if hit(REALTIME_HINTS) {
            self.ttl.realtime
        } else if hit(HISTORICAL_HINTS) {
            self.ttl.historical
        } else if hit(STATIC_HINTS) {
            self.ttl.static_data
        } else {
            self.ttl.default
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// A fresh cached result, if any. Unreadable entries count as misses.
    pub async fn load(&self, name: &str, args: &Map<String, Value>) -> Option<ToolResult> {
        if !self.enabled {
            return None;
        }
        let bytes = tokio::fs::read(self.path(&Self::key(name, args))).await.ok()?;
        let entry: CacheEntry = serde_json::from_slice(&bytes).ok()?;
        if let Some(ttl) = self.ttl_for(name) {
            if now_secs() - entry.timestamp > ttl.as_secs_f64() {
                return None;
            }
        }
        Some(entry.result)
    }

    /// Persist a result. Written to a temp file then renamed into place.
    pub async fn save(&self, name: &str, args: &Map<String, Value>, result: &ToolResult) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let entry = CacheEntry {
            timestamp: now_secs(),
            result: result.clone(),
        };
        let path = self.path(&Self::key(name, args));
        write_atomic(&path, &serde_json::to_vec_pretty(&entry)?).await
    }

    /// Remove every cached entry; returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let mut removed = 0;
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return Ok(0);
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json")
                && tokio::fs::remove_file(&path).await.is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            enabled: self.enabled,
            count: 0,
            size_bytes: 0,
            cache_dir: self.dir.display().to_string(),
        };
        if !self.enabled {
            return stats;
        }
        if let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.path().extension().is_some_and(|e| e == "json") {
                    stats.count += 1;
                    stats.size_bytes += entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                }
            }
        }
        stats
    }
}

/// Write `bytes` to a sibling temp file, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

/// JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::with_capacity(map.len());
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::envelope::ToolMeta;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_key_ignores_argument_order() {
        let a = ResponseCache::key("t", &args(json!({"a": 1, "b": 2})));
        let b = ResponseCache::key("t", &args(json!({"b": 2, "a": 1})));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, ResponseCache::key("u", &args(json!({"a": 1, "b": 2}))));
    }

    #[test]
    fn test_ttl_heuristics() {
        let cache = ResponseCache::disabled();
        assert_eq!(
            cache.ttl_for("stock_zh_a_spot_em"),
            Some(Duration::from_secs(60))
        );
        assert_eq!(cache.ttl_for("stock_zh_a_hist"), None);
        assert_eq!(
            cache.ttl_for("stock_info_a_code_name"),
            Some(Duration::from_secs(7 * 24 * 3600))
        );
        assert_eq!(
            cache.ttl_for("stock_fund_flow_big_deal"),
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let v = json!({"b": {"y": 1, "x": 2}, "a": [ {"d": 1, "c": 2} ]});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":[{"c":2,"d":1}],"b":{"x":2,"y":1}}"#
        );
    }

    #[tokio::test]
    async fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), true);
        let a = args(json!({"symbol": "000001"}));
        let result = ToolResult::ok(ToolMeta::new("akshare", "stock_zh_a_hist"), json!([1, 2]));

        assert!(cache.load("stock_zh_a_hist", &a).await.is_none());
        cache.save("stock_zh_a_hist", &a, &result).await.unwrap();
        assert_eq!(cache.load("stock_zh_a_hist", &a).await, Some(result));
        assert_eq!(cache.stats().await.count, 1);
        assert_eq!(cache.clear().await.unwrap(), 1);
        assert!(cache.load("stock_zh_a_hist", &a).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), true).with_ttl(CacheTtl {
            default: Some(Duration::ZERO),
            ..CacheTtl::default()
        });
        let a = Map::new();
        let result = ToolResult::ok(ToolMeta::new("akshare", "x"), json!([]));
        cache.save("stock_fund_flow_big_deal", &a, &result).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.load("stock_fund_flow_big_deal", &a).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_is_inert() {
        let cache = ResponseCache::disabled();
        let result = ToolResult::ok(ToolMeta::new("akshare", "x"), json!([]));
        cache.save("x", &Map::new(), &result).await.unwrap();
        assert!(cache.load("x", &Map::new()).await.is_none());
        assert!(!cache.stats().await.enabled);
    }
}
