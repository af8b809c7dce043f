//! ConfigStore - cameras and counting zones
//!
//! ## Responsibilities
//!
//! - Camera source descriptors (resolved when a stream starts by camera_id)
//! - Zone persistence and validation (also applied to rows loaded from MySQL)
//! - Read-only zone lookup for counting jobs
//!
//! Backed by MySQL when a pool is configured, otherwise in-memory only.
//! Reads are always served from the cache.

mod repository;
mod types;

pub use repository::ConfigRepository;
pub use types::*;

use crate::error::{Error, Result};
use sqlx::MySqlPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// ConfigStore instance
pub struct ConfigStore {
    repo: Option<ConfigRepository>,
    /// In-memory cache for frequent reads
    cache: RwLock<ConfigCache>,
    next_zone_id: AtomicU64,
}

/// In-memory cache for ConfigStore
#[derive(Default)]
struct ConfigCache {
    cameras: HashMap<String, Camera>,
    zones: Vec<Zone>,
}

impl ConfigStore {
    /// Store without a database
    pub fn in_memory() -> Self {
        Self {
            repo: None,
            cache: RwLock::new(ConfigCache::default()),
            next_zone_id: AtomicU64::new(1),
        }
    }

    /// Store backed by MySQL, with the cache loaded up front
    pub async fn with_pool(pool: MySqlPool) -> Result<Self> {
        let store = Self {
            repo: Some(ConfigRepository::new(pool)),
            cache: RwLock::new(ConfigCache::default()),
            next_zone_id: AtomicU64::new(1),
        };
        store.refresh_cache().await?;
        Ok(store)
    }

    /// Refresh in-memory cache from the database
    pub async fn refresh_cache(&self) -> Result<()> {
        let Some(repo) = &self.repo else {
            return Ok(());
        };
        let cameras = repo.get_all_cameras().await?;
        let zones = retain_valid_zones(repo.get_all_zones().await?);

        let mut cache = self.cache.write().await;
        cache.cameras = cameras
            .into_iter()
            .map(|c| (c.camera_id.clone(), c))
            .collect();
        cache.zones = zones;

        tracing::info!(
            cameras = cache.cameras.len(),
            zones = cache.zones.len(),
            "ConfigStore cache refreshed"
        );

        Ok(())
    }

    pub fn has_database(&self) -> bool {
        self.repo.is_some()
    }

    pub async fn db_connected(&self) -> bool {
        match &self.repo {
            Some(repo) => repo.ping().await,
            None => false,
        }
    }

    pub async fn list_cameras(&self) -> Vec<Camera> {
        let cache = self.cache.read().await;
        let mut cameras: Vec<Camera> = cache.cameras.values().cloned().collect();
        cameras.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        cameras
    }

    pub async fn get_camera(&self, camera_id: &str) -> Result<Camera> {
        self.cache
            .read()
            .await
            .cameras
            .get(camera_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Camera {} not found", camera_id)))
    }

    /// Create or replace a camera's source descriptor
    pub async fn upsert_camera(&self, camera_id: &str, req: UpsertCameraRequest) -> Result<Camera> {
        if camera_id.is_empty() || camera_id.len() > 64 {
            return Err(Error::Validation(
                "camera_id must be 1-64 characters".to_string(),
            ));
        }
        req.source.build_url()?;

        let now = chrono::Utc::now();
        let created_at = self
            .cache
            .read()
            .await
            .cameras
            .get(camera_id)
            .map(|c| c.created_at)
            .unwrap_or(now);

        let camera = Camera {
            camera_id: camera_id.to_string(),
            name: req.name.unwrap_or_else(|| camera_id.to_string()),
            source: req.source,
            enabled: req.enabled.unwrap_or(true),
            created_at,
            updated_at: now,
        };

        if let Some(repo) = &self.repo {
            repo.upsert_camera(&camera).await?;
        }

        self.cache
            .write()
            .await
            .cameras
            .insert(camera.camera_id.clone(), camera.clone());

        tracing::info!(camera_id = %camera.camera_id, "Camera saved");
        Ok(camera)
    }

    /// Validate and persist a zone
    pub async fn create_zone(&self, req: CreateZoneRequest) -> Result<Zone> {
        req.validate()?;

        let created_at = chrono::Utc::now();
        let id = match &self.repo {
            Some(repo) => repo.insert_zone(&req, created_at).await?,
            None => self.next_zone_id.fetch_add(1, Ordering::Relaxed),
        };

        let zone = Zone {
            id,
            camera_id: req.camera_id,
            name: req.name,
            polygon: req.polygon,
            direction_line: req.direction_line,
            entry_direction: req.entry_direction,
            active: req.active.unwrap_or(true),
            created_at,
        };

        self.cache.write().await.zones.push(zone.clone());

        tracing::info!(
            zone_id = zone.id,
            camera_id = %zone.camera_id,
            vertices = zone.polygon.len(),
            has_direction_line = zone.direction_line.is_some(),
            "Zone saved"
        );
        Ok(zone)
    }

    /// Replace a zone's shape, name and direction
    pub async fn update_zone(&self, zone_id: u64, req: UpdateZoneRequest) -> Result<Zone> {
        req.validate()?;
        let mut zone = self.get_zone(zone_id).await?;
        zone.name = req.name;
        zone.polygon = req.polygon;
        zone.direction_line = req.direction_line;
        zone.entry_direction = req.entry_direction;
        if let Some(active) = req.active {
            zone.active = active;
        }

        if let Some(repo) = &self.repo {
            repo.update_zone(&zone).await?;
        }
        self.replace_cached_zone(&zone).await?;

        tracing::info!(
            zone_id = zone.id,
            camera_id = %zone.camera_id,
            vertices = zone.polygon.len(),
            "Zone updated"
        );
        Ok(zone)
    }

    /// Enable or disable a zone without touching its geometry
    pub async fn set_zone_active(&self, zone_id: u64, active: bool) -> Result<Zone> {
        let mut zone = self.get_zone(zone_id).await?;
        zone.active = active;

        if let Some(repo) = &self.repo {
            repo.set_zone_active(zone_id, active).await?;
        }
        self.replace_cached_zone(&zone).await?;

        tracing::info!(zone_id, active, "Zone status changed");
        Ok(zone)
    }

    pub async fn delete_zone(&self, zone_id: u64) -> Result<()> {
        self.get_zone(zone_id).await?;
        if let Some(repo) = &self.repo {
            repo.delete_zone(zone_id).await?;
        }
        self.cache.write().await.zones.retain(|z| z.id != zone_id);

        tracing::info!(zone_id, "Zone deleted");
        Ok(())
    }

    pub async fn get_zone(&self, zone_id: u64) -> Result<Zone> {
        self.cache
            .read()
            .await
            .zones
            .iter()
            .find(|z| z.id == zone_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Zone {} not found", zone_id)))
    }

    async fn replace_cached_zone(&self, zone: &Zone) -> Result<()> {
        let mut cache = self.cache.write().await;
        let slot = cache
            .zones
            .iter_mut()
            .find(|z| z.id == zone.id)
            .ok_or_else(|| Error::NotFound(format!("Zone {} not found", zone.id)))?;
        *slot = zone.clone();
        Ok(())
    }

    /// All zones for a camera, newest last
    pub async fn zones_for_camera(&self, camera_id: &str) -> Vec<Zone> {
        self.cache
            .read()
            .await
            .zones
            .iter()
            .filter(|z| z.camera_id == camera_id)
            .cloned()
            .collect()
    }

    /// Active zones a counting job should evaluate
    pub async fn active_zones(&self, camera_id: &str) -> Vec<Zone> {
        self.zones_for_camera(camera_id)
            .await
            .into_iter()
            .filter(|z| z.active)
            .collect()
    }
}

/// Drop zones that would not survive validation on create
fn retain_valid_zones(zones: Vec<Zone>) -> Vec<Zone> {
    zones
        .into_iter()
        .filter(|zone| match zone.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    zone_id = zone.id,
                    camera_id = %zone.camera_id,
                    error = %e,
                    "Skipping invalid zone from database"
                );
                false
            }
        })
        .collect()
}
