use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::error::CopilotError;
use crate::features::{
    build_fare_features, build_hotspot_features, estimate_duration_minutes,
    haversine_distance_miles,
};
use crate::model::{argmax_class, ModelRegistry};
use crate::session::{PointTarget, SessionState, SessionStore};
use crate::types::{FareOut, GeoPoint, HotspotOut, HotspotRequest, TripRequest};

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub models: ModelRegistry,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(models: ModelRegistry) -> Self {
        Self::with_sessions(models, SessionStore::new())
    }

    pub fn with_sessions(models: ModelRegistry, sessions: SessionStore) -> Self {
        Self {
            models,
            sessions: Arc::new(sessions),
        }
    }
}

// ---------- Request bodies ----------

/// `Json` whose rejections come back as `INVALID_INPUT` like every other bad input.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(CopilotError))]
struct ApiJson<T>(T);

const JSON_DATA_PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";

impl From<JsonRejection> for CopilotError {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();
        if let JsonRejection::JsonDataError(_) = rejection {
            let detail = text.strip_prefix(JSON_DATA_PREFIX).unwrap_or(&text);
            return match detail.split_once(": ") {
                // serde path, e.g. `pickup.latitude: invalid type ...`
                Some((path, reason)) if !path.contains(' ') => CopilotError::invalid(path, reason),
                _ => CopilotError::invalid(missing_field(detail).unwrap_or("body"), detail),
            };
        }
        CopilotError::invalid("body", text)
    }
}

// `missing field `hour` at line 1 column 80` -> `hour`
fn missing_field(detail: &str) -> Option<&str> {
    let rest = detail.strip_prefix("missing field `")?;
    rest.split_once('`').map(|(name, _)| name)
}

// ---------- Error mapping ----------

impl IntoResponse for CopilotError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            CopilotError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            CopilotError::FeatureDerivation { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "FEATURE_DERIVATION")
            }
            CopilotError::ModelLoad { .. } => {
                tracing::error!(error = %self, "model unavailable");
                (StatusCode::INTERNAL_SERVER_ERROR, "MODEL_UNAVAILABLE")
            }
            CopilotError::Model(e) => {
                tracing::error!(error = %e, "prediction failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "PREDICTION_FAILED")
            }
        };
        let body = json!({ "error": self.to_string(), "code": code });
        (status, Json(body)).into_response()
    }
}

// ---------- Handlers ----------

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn fare(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TripRequest>,
) -> Result<Json<FareOut>, CopilotError> {
    let features = build_fare_features(&req)?;
    let distance = haversine_distance_miles(req.pickup, req.dropoff);

    tracing::debug!(
        "fare request hour={} dow={} weekend={} night={} dist={:.3}mi",
        features.pickup_hour,
        features.pickup_day_of_week,
        features.is_weekend,
        features.is_night,
        distance
    );

    let fare = state.models.fare.predict(&features)?;
    tracing::info!("fare estimate ${:.2} for {:.2}mi", fare, distance);

    Ok(Json(FareOut {
        fare,
        trip_distance_miles: distance,
        estimated_duration_min: estimate_duration_minutes(distance),
        features: features.to_json(),
    }))
}

async fn hotspot(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<HotspotRequest>,
) -> Result<Json<HotspotOut>, CopilotError> {
    let features = build_hotspot_features(&req)?;

    // one forward pass; the class is the argmax of the probabilities
    let proba = state.models.hotspot.predict_proba(&features)?;
    let prediction = argmax_class(proba);
    let p_hot = proba[1];
    let label = if prediction == 1 { "hotspot" } else { "coldspot" };
    tracing::info!(
        "hotspot check lat={:.4} lon={:.4} hour={} -> {} (p={:.2})",
        req.location.latitude,
        req.location.longitude,
        req.hour,
        label,
        p_hot
    );

    Ok(Json(HotspotOut {
        prediction,
        label,
        hotspot_probability: p_hot,
        features: features.to_json(),
    }))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Json<SessionState> {
    Json(state.sessions.get(&id))
}

async fn set_session(
    State(state): State<AppState>,
    Path((id, target)): Path<(String, String)>,
    ApiJson(point): ApiJson<GeoPoint>,
) -> Result<Json<SessionState>, CopilotError> {
    let target: PointTarget = target.parse()?;
    let updated = state.sessions.set(&id, target, point)?;
    Ok(Json(updated))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/fare", post(fare))
        .route("/hotspot", post(hotspot))
        .route("/session/:id", get(get_session))
        .route("/session/:id/:target", put(set_session))
        .with_state(state)
}
