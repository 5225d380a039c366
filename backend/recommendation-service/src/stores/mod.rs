//! Read-through accessors for the vehicle catalog and interaction summaries
//! (C3, spec §4.3).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cache::CacheFacade;
use crate::error::{AppError, Result};
use crate::models::{InteractionType, UserId, Vehicle, VehicleId, VehicleSpecs};

#[derive(Debug, FromRow)]
struct VehicleRow {
    id: i64,
    make: String,
    model: String,
    year: i32,
    price: f64,
    mileage: i64,
    color: String,
    fuel_type: String,
    transmission: String,
    status: String,
}

/// `data/car-features.json`: nested per spec §6, keyed by
/// (make, model, year).
#[derive(Debug, Deserialize)]
struct CarFeaturesFile {
    #[serde(flatten)]
    entries: HashMap<String, CarFeaturesEntry>,
}

#[derive(Debug, Deserialize)]
struct CarFeaturesEntry {
    make: String,
    model: String,
    year: i32,
    features: CarFeaturesNested,
}

#[derive(Debug, Deserialize, Default)]
struct CarFeaturesNested {
    #[serde(default)]
    engine: EngineFeatures,
    #[serde(default, rename = "fuelEconomy")]
    fuel_economy: FuelEconomyFeatures,
    #[serde(default)]
    performance: PerformanceFeatures,
    #[serde(default)]
    drivetrain: DrivetrainFeatures,
}

#[derive(Debug, Deserialize, Default)]
struct EngineFeatures {
    horsepower: Option<f64>,
    torque: Option<f64>,
    #[serde(rename = "engineSize")]
    engine_size: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct FuelEconomyFeatures {
    #[serde(rename = "cityMpg")]
    city_mpg: Option<f64>,
    #[serde(rename = "co2Emissions")]
    co2_emissions: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct PerformanceFeatures {
    #[serde(rename = "zeroTo60")]
    zero_to_60: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DrivetrainFeatures {
    #[serde(rename = "type")]
    drivetrain_type: Option<String>,
}

/// In-memory index of the static features file, keyed by (make, model, year).
struct FeaturesIndex(HashMap<(String, String, i32), VehicleSpecs>);

impl FeaturesIndex {
    async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<CarFeaturesFile>(&raw) {
                Ok(file) => {
                    let mut map = HashMap::new();
                    for entry in file.entries.into_values() {
                        let key = (entry.make.clone(), entry.model.clone(), entry.year);
                        map.insert(
                            key,
                            VehicleSpecs {
                                horsepower: entry.features.engine.horsepower,
                                torque: entry.features.engine.torque,
                                engine_size: entry.features.engine.engine_size,
                                city_mpg: entry.features.fuel_economy.city_mpg,
                                co2_emissions: entry.features.fuel_economy.co2_emissions,
                                zero_to_60: entry.features.performance.zero_to_60,
                                drivetrain_type: entry.features.drivetrain.drivetrain_type,
                            },
                        );
                    }
                    info!(count = map.len(), "car features file loaded");
                    FeaturesIndex(map)
                }
                Err(e) => {
                    warn!(error = %e, "car features file malformed, enrichment disabled");
                    FeaturesIndex(HashMap::new())
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "car features file missing, enrichment disabled");
                FeaturesIndex(HashMap::new())
            }
        }
    }

    fn lookup(&self, make: &str, model: &str, year: i32) -> VehicleSpecs {
        self.0
            .get(&(make.to_string(), model.to_string(), year))
            .cloned()
            .unwrap_or_default()
    }
}

pub struct VehicleStore {
    db: PgPool,
    cache: CacheFacade,
    features: FeaturesIndex,
    loaded: Mutex<Option<Arc<HashMap<VehicleId, Vehicle>>>>,
    catalog_limit: i64,
}

impl VehicleStore {
    pub async fn new(db: PgPool, cache: CacheFacade, features_path: impl AsRef<Path>) -> Self {
        Self {
            db,
            cache,
            features: FeaturesIndex::load(features_path.as_ref()).await,
            loaded: Mutex::new(None),
            catalog_limit: 50_000,
        }
    }

    /// Guarded by a mutex so the first requester absorbs the load cost and
    /// subsequent readers see the fully populated map (spec §4.3, §5).
    async fn ensure_loaded(&self) -> Result<Arc<HashMap<VehicleId, Vehicle>>> {
        let mut guard = self.loaded.lock().await;
        if let Some(map) = &*guard {
            return Ok(map.clone());
        }

        if let Some(cached) = self.cache.get_vehicle_features::<HashMap<VehicleId, Vehicle>>().await {
            let arc = Arc::new(cached);
            *guard = Some(arc.clone());
            return Ok(arc);
        }

        let rows: Vec<VehicleRow> = sqlx::query_as(
            "SELECT id, make, model, year, price, mileage, color, fuel_type, transmission, status \
             FROM \"Vehicles\" ORDER BY id LIMIT $1",
        )
        .bind(self.catalog_limit)
        .fetch_all(&self.db)
        .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let specs = self.features.lookup(&row.make, &row.model, row.year);
            map.insert(
                row.id,
                Vehicle {
                    id: row.id,
                    make: row.make,
                    model: row.model,
                    year: row.year,
                    price: row.price,
                    mileage: row.mileage,
                    color: row.color,
                    fuel_type: row.fuel_type,
                    transmission: row.transmission,
                    status: row.status,
                    specs,
                },
            );
        }

        self.cache.set_vehicle_features(&map).await;
        let arc = Arc::new(map);
        *guard = Some(arc.clone());
        Ok(arc)
    }

    pub async fn get(&self, id: VehicleId) -> Result<Vehicle> {
        let map = self.ensure_loaded().await?;
        map.get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("vehicle {id}")))
    }

    pub async fn get_many(&self, ids: impl IntoIterator<Item = VehicleId>) -> Vec<Vehicle> {
        let map = match self.ensure_loaded().await {
            Ok(m) => m,
            Err(_) => return Vec::new(),
        };
        ids.into_iter().filter_map(|id| map.get(&id).cloned()).collect()
    }

    pub async fn exists(&self, id: VehicleId) -> bool {
        match self.ensure_loaded().await {
            Ok(map) => map.contains_key(&id),
            Err(_) => false,
        }
    }
}

pub struct UserStore {
    db: PgPool,
    summary: Mutex<Option<Arc<HashMap<(UserId, VehicleId), f64>>>>,
}

impl UserStore {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            summary: Mutex::new(None),
        }
    }

    pub async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT \"Id\" FROM \"Users\" WHERE \"Id\" = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.is_some())
    }

    /// Aggregated once, cached in the process, for the lifetime of the
    /// running instance (spec §4.3). Weighted by `InteractionType::weight`.
    async fn ensure_summary(&self) -> Result<Arc<HashMap<(UserId, VehicleId), f64>>> {
        let mut guard = self.summary.lock().await;
        if let Some(map) = &*guard {
            return Ok(map.clone());
        }

        let rows: Vec<InteractionRow> = sqlx::query_as(
            "SELECT \"UserId\" as user_id, \"VehicleId\" as vehicle_id, \"InteractionType\" as interaction_type \
             FROM \"UserInteractions\"",
        )
        .fetch_all(&self.db)
        .await?;

        let mut map: HashMap<(UserId, VehicleId), f64> = HashMap::new();
        for row in rows {
            if let Some(kind) = parse_interaction_type(&row.interaction_type) {
                *map.entry((row.user_id, row.vehicle_id)).or_insert(0.0) += kind.weight();
            }
        }

        let arc = Arc::new(map);
        *guard = Some(arc.clone());
        Ok(arc)
    }

    pub async fn interactions_summary(&self) -> Result<Arc<HashMap<(UserId, VehicleId), f64>>> {
        self.ensure_summary().await
    }

    /// Per-vehicle weighted interaction counts for one user.
    pub async fn interactions_for(&self, user_id: UserId) -> Result<HashMap<VehicleId, f64>> {
        let summary = self.ensure_summary().await?;
        Ok(summary
            .iter()
            .filter(|((uid, _), _)| *uid == user_id)
            .map(|((_, vid), weight)| (*vid, *weight))
            .collect())
    }

    pub async fn interaction_count(&self, user_id: UserId) -> Result<usize> {
        Ok(self.interactions_for(user_id).await?.len())
    }
}

#[derive(Debug, FromRow)]
struct InteractionRow {
    user_id: i64,
    vehicle_id: i64,
    interaction_type: String,
}

fn parse_interaction_type(raw: &str) -> Option<InteractionType> {
    match raw.to_lowercase().as_str() {
        "view" => Some(InteractionType::View),
        "share" => Some(InteractionType::Share),
        "favorite_added" | "favorite" => Some(InteractionType::FavoriteAdded),
        "contacted_seller" | "contact_seller" => Some(InteractionType::ContactedSeller),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interaction_weights_are_fixed() {
        assert_eq!(InteractionType::View.weight(), 1.0);
        assert_eq!(InteractionType::Share.weight(), 2.0);
        assert_eq!(InteractionType::FavoriteAdded.weight(), 3.0);
        assert_eq!(InteractionType::ContactedSeller.weight(), 5.0);
    }

    #[test]
    fn parses_known_interaction_types() {
        assert_eq!(parse_interaction_type("view"), Some(InteractionType::View));
        assert_eq!(
            parse_interaction_type("favorite_added"),
            Some(InteractionType::FavoriteAdded)
        );
        assert_eq!(parse_interaction_type("bogus"), None);
    }
}
