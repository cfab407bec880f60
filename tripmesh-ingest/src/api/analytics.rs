//! Read-only analytics endpoints

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{BoundingBox, TripGroupSummary, WeeklyAverage};
use crate::AppState;

const DEFAULT_GROUP_LIMIT: u32 = 50;
const MAX_GROUP_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
pub struct TripGroupsQuery {
    pub limit: Option<u32>,
}

/// GET /trip-groups?limit=N
pub async fn list_trip_groups(
    State(state): State<AppState>,
    Query(query): Query<TripGroupsQuery>,
) -> ApiResult<Json<Vec<TripGroupSummary>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_GROUP_LIMIT)
        .clamp(1, MAX_GROUP_LIMIT);

    let mut conn = state.db.acquire().await?;
    let groups = db::analytics::list_trip_groups(&mut conn, limit).await?;
    Ok(Json(groups))
}

#[derive(Debug, Default, Deserialize)]
pub struct WeeklyAverageQuery {
    pub region: Option<String>,
    pub min_lat: Option<f64>,
    pub max_lat: Option<f64>,
    pub min_lng: Option<f64>,
    pub max_lng: Option<f64>,
}

impl WeeklyAverageQuery {
    /// Bounding box when all four edges are given, error when only some are
    fn bounding_box(&self) -> ApiResult<Option<BoundingBox>> {
        match (self.min_lat, self.max_lat, self.min_lng, self.max_lng) {
            (None, None, None, None) => Ok(None),
            (Some(min_lat), Some(max_lat), Some(min_lng), Some(max_lng)) => {
                let bbox = BoundingBox {
                    min_lat,
                    min_lng,
                    max_lat,
                    max_lng,
                };
                if !bbox.is_valid() {
                    return Err(ApiError::BadRequest(
                        "Bounding box minimum exceeds maximum".to_string(),
                    ));
                }
                Ok(Some(bbox))
            }
            _ => Err(ApiError::BadRequest(
                "Bounding box needs min_lat, max_lat, min_lng and max_lng".to_string(),
            )),
        }
    }
}

/// GET /analytics/weekly-average response
#[derive(Debug, Serialize)]
pub struct WeeklyAverageResponse {
    pub area_description: String,
    #[serde(flatten)]
    pub average: WeeklyAverage,
}

/// Human-readable name of the filtered area
fn area_description(region: Option<&str>, bbox: Option<BoundingBox>) -> String {
    match (region, bbox) {
        (Some(region), Some(bbox)) => format!("{} {}", region, bbox),
        (Some(region), None) => region.to_string(),
        (None, Some(bbox)) => bbox.to_string(),
        (None, None) => "All regions".to_string(),
    }
}

/// GET /analytics/weekly-average
pub async fn weekly_average(
    State(state): State<AppState>,
    Query(query): Query<WeeklyAverageQuery>,
) -> ApiResult<Json<WeeklyAverageResponse>> {
    let bbox = query.bounding_box()?;

    let mut conn = state.db.acquire().await?;
    let average =
        db::analytics::compute_weekly_average(&mut conn, query.region.as_deref(), bbox).await?;

    if average.total_trips == 0 {
        return Err(ApiError::NotFound(
            "No trips match the requested filters".to_string(),
        ));
    }
    Ok(Json(WeeklyAverageResponse {
        area_description: area_description(query.region.as_deref(), bbox),
        average,
    }))
}

/// Build analytics routes
pub fn analytics_routes() -> Router<AppState> {
    Router::new()
        .route("/trip-groups", get(list_trip_groups))
        .route("/analytics/weekly-average", get(weekly_average))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_requires_all_edges() {
        let partial = WeeklyAverageQuery {
            min_lat: Some(1.0),
            ..Default::default()
        };
        assert!(partial.bounding_box().is_err());
        assert!(WeeklyAverageQuery::default().bounding_box().unwrap().is_none());
    }

    #[test]
    fn test_inverted_bounding_box_rejected() {
        let inverted = WeeklyAverageQuery {
            min_lat: Some(51.0),
            max_lat: Some(50.0),
            min_lng: Some(14.0),
            max_lng: Some(15.0),
            ..Default::default()
        };
        assert!(matches!(inverted.bounding_box(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_area_description() {
        let bbox = BoundingBox {
            min_lat: 50.0,
            min_lng: 14.25,
            max_lat: 50.5,
            max_lng: 14.75,
        };
        assert_eq!(area_description(Some("Prague"), None), "Prague");
        assert_eq!(area_description(None, Some(bbox)), "BBox(50,14.25)-(50.5,14.75)");
        assert_eq!(
            area_description(Some("Prague"), Some(bbox)),
            "Prague BBox(50,14.25)-(50.5,14.75)"
        );
        assert_eq!(area_description(None, None), "All regions");
    }
}
