//! ConfigStore Repository
//!
//! Database access layer for cameras and zones

use super::types::*;
use crate::error::{Error, Result};
use crate::geometry::{EntryDirection, Point};
use crate::stream_manager::{StreamProtocol, StreamSource};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::MySqlPool;

/// ConfigStore repository for database operations
#[derive(Clone)]
pub struct ConfigRepository {
    pool: MySqlPool,
}

#[derive(sqlx::FromRow)]
struct CameraRow {
    camera_id: String,
    name: String,
    protocol: String,
    address: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    channel: Option<u32>,
    username: Option<String>,
    password: Option<String>,
    url: Option<String>,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CameraRow> for Camera {
    type Error = Error;

    fn try_from(row: CameraRow) -> Result<Self> {
        Ok(Camera {
            camera_id: row.camera_id,
            name: row.name,
            source: StreamSource {
                protocol: row.protocol.parse::<StreamProtocol>()?,
                address: row.address,
                port: row.port,
                path: row.path,
                channel: row.channel,
                username: row.username,
                password: row.password,
                url: row.url,
            },
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ZoneRow {
    id: u64,
    camera_id: String,
    name: Option<String>,
    polygon_json: Json<Vec<Point>>,
    direction_line_json: Option<Json<Vec<Point>>>,
    entry_direction: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<ZoneRow> for Zone {
    type Error = Error;

    fn try_from(row: ZoneRow) -> Result<Self> {
        Ok(Zone {
            id: row.id,
            camera_id: row.camera_id,
            name: row.name,
            polygon: row.polygon_json.0,
            direction_line: row.direction_line_json.map(|j| j.0),
            entry_direction: row.entry_direction.parse::<EntryDirection>()?,
            active: row.active,
            created_at: row.created_at,
        })
    }
}

impl ConfigRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    const CAMERA_COLUMNS: &'static str = r#"
        camera_id, name, protocol, address, port, path, channel,
        username, password, url, enabled, created_at, updated_at
    "#;

    const ZONE_COLUMNS: &'static str = r#"
        id, camera_id, name, polygon_json, direction_line_json,
        entry_direction, active, created_at
    "#;

    /// Get all cameras
    pub async fn get_all_cameras(&self) -> Result<Vec<Camera>> {
        let query = format!(
            "SELECT {} FROM cameras ORDER BY camera_id",
            Self::CAMERA_COLUMNS
        );
        let rows = sqlx::query_as::<_, CameraRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Camera::try_from).collect()
    }

    /// Insert or update a camera
    pub async fn upsert_camera(&self, camera: &Camera) -> Result<()> {
        let s = &camera.source;
        sqlx::query(
            r#"
            INSERT INTO cameras (
                camera_id, name, protocol, address, port, path, channel,
                username, password, url, enabled, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                name = VALUES(name), protocol = VALUES(protocol),
                address = VALUES(address), port = VALUES(port), path = VALUES(path),
                channel = VALUES(channel), username = VALUES(username),
                password = VALUES(password), url = VALUES(url),
                enabled = VALUES(enabled), updated_at = VALUES(updated_at)
            "#,
        )
        .bind(&camera.camera_id)
        .bind(&camera.name)
        .bind(s.protocol.as_str())
        .bind(&s.address)
        .bind(s.port)
        .bind(&s.path)
        .bind(s.channel)
        .bind(&s.username)
        .bind(&s.password)
        .bind(&s.url)
        .bind(camera.enabled)
        .bind(camera.created_at)
        .bind(camera.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get all zones
    pub async fn get_all_zones(&self) -> Result<Vec<Zone>> {
        let query = format!(
            "SELECT {} FROM zone_config ORDER BY camera_id, id",
            Self::ZONE_COLUMNS
        );
        let rows = sqlx::query_as::<_, ZoneRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Zone::try_from).collect()
    }

    /// Insert a zone, returning its id
    pub async fn insert_zone(&self, req: &CreateZoneRequest, created_at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO zone_config (
                camera_id, name, polygon_json, direction_line_json,
                entry_direction, active, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.camera_id)
        .bind(&req.name)
        .bind(Json(&req.polygon))
        .bind(req.direction_line.as_ref().map(Json))
        .bind(req.entry_direction.as_str())
        .bind(req.active.unwrap_or(true))
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_id())
    }

    pub async fn update_zone(&self, zone: &Zone) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE zone_config SET
                name = ?, polygon_json = ?, direction_line_json = ?,
                entry_direction = ?, active = ?
            WHERE id = ?
            "#,
        )
        .bind(&zone.name)
        .bind(Json(&zone.polygon))
        .bind(zone.direction_line.as_ref().map(Json))
        .bind(zone.entry_direction.as_str())
        .bind(zone.active)
        .bind(zone.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_zone_active(&self, zone_id: u64, active: bool) -> Result<()> {
        sqlx::query("UPDATE zone_config SET active = ? WHERE id = ?")
            .bind(active)
            .bind(zone_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete_zone(&self, zone_id: u64) -> Result<()> {
        sqlx::query("DELETE FROM zone_config WHERE id = ?")
            .bind(zone_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Connectivity check
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
