use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex as AsyncMutex;

use super::network::{parse_network, NetworkGeometry};
use super::GeometryError;

/// Where the network comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkSource {
    /// A `.net.xml` file read on load.
    File(PathBuf),
    /// XML text held in memory.
    Inline(String),
}

/// Loads the network once and hands out shared, immutable copies.
///
/// A failed load leaves the cache empty; the next [`GeometryCache::load`]
/// retries. Loads are serialized so concurrent callers parse at most once.
#[derive(Debug)]
pub struct GeometryCache {
    source: Option<NetworkSource>,
    allow_list: Option<Vec<String>>,
    loaded: RwLock<Option<Arc<NetworkGeometry>>>,
    loading: AsyncMutex<()>,
}

impl GeometryCache {
    /// A cache for `source`. `allow_list` restricts which junctions become
    /// traffic lights.
    pub fn new(source: Option<NetworkSource>, allow_list: Option<Vec<String>>) -> Self {
        Self {
            source,
            allow_list,
            loaded: RwLock::new(None),
            loading: AsyncMutex::new(()),
        }
    }

    /// A cache with nothing to load; every query fails with `NoSource`.
    pub fn empty() -> Self {
        Self::new(None, None)
    }

    /// Whether a source is configured.
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// The cached network, loading it first if needed.
    pub async fn load(&self) -> Result<Arc<NetworkGeometry>, GeometryError> {
        if let Ok(geometry) = self.get() {
            return Ok(geometry);
        }
        let _loading = self.loading.lock().await;
        // Someone else may have finished while we waited.
        if let Ok(geometry) = self.get() {
            return Ok(geometry);
        }

        let source = self.source.as_ref().ok_or(GeometryError::NoSource)?;
        let xml = match source {
            NetworkSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|source| GeometryError::Io { path: path.clone(), source })?,
            NetworkSource::Inline(text) => text.clone(),
        };

        let geometry = match parse_network(&xml, self.allow_list.as_deref()) {
            Ok(g) => Arc::new(g),
            Err(e) => {
                log::error!("Network geometry failed to load: {}", e);
                return Err(e);
            }
        };
        log::info!(
            "Network geometry loaded: {} lanes, {} points, {} traffic lights",
            geometry.lanes.len(),
            geometry.point_count(),
            geometry.tls.len()
        );

        *self.loaded.write().unwrap_or_else(|p| p.into_inner()) = Some(Arc::clone(&geometry));
        Ok(geometry)
    }

    /// The cached network without loading.
    pub fn get(&self) -> Result<Arc<NetworkGeometry>, GeometryError> {
        self.loaded
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(GeometryError::NotLoaded)
    }

    /// Drops the cached network; the next `load` rebuilds it.
    pub fn invalidate(&self) {
        *self.loaded.write().unwrap_or_else(|p| p.into_inner()) = None;
        log::info!("Network geometry cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET: &str = r#"<net>
        <edge id="E0"><lane id="E0_0" shape="0,0 10,0 10,10"/></edge>
        <junction id="J1" type="traffic_light" x="10" y="0"/>
    </net>"#;

    #[tokio::test]
    async fn get_before_load_is_not_loaded() {
        let cache = GeometryCache::new(Some(NetworkSource::Inline(NET.into())), None);
        assert!(matches!(cache.get(), Err(GeometryError::NotLoaded)));
        let loaded = cache.load().await.unwrap();
        assert!(Arc::ptr_eq(&loaded, &cache.get().unwrap()));
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let cache = GeometryCache::new(Some(NetworkSource::Inline(NET.into())), None);
        let first = cache.load().await.unwrap();
        cache.invalidate();
        assert!(cache.get().is_err());
        let second = cache.load().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn failed_load_retries_next_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.net.xml");
        let cache = GeometryCache::new(Some(NetworkSource::File(path.clone())), None);

        assert!(matches!(cache.load().await, Err(GeometryError::Io { .. })));
        assert!(matches!(cache.get(), Err(GeometryError::NotLoaded)));

        tokio::fs::write(&path, NET).await.unwrap();
        assert_eq!(cache.load().await.unwrap().lanes.len(), 1);
    }

    #[tokio::test]
    async fn no_source() {
        let cache = GeometryCache::empty();
        assert!(!cache.has_source());
        assert!(matches!(cache.load().await, Err(GeometryError::NoSource)));
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_result() {
        let cache = Arc::new(GeometryCache::new(Some(NetworkSource::Inline(NET.into())), None));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.load().await.unwrap() })
            })
            .collect();
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
