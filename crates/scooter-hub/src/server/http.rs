//! HTTP surface of the hub.
//!
//! | Route | |
//! |---|---|
//! | `GET /scooter` | live feed, one SSE event per ingested telemetry message |
//! | `GET /scooters` | fleet records |
//! | `GET /stations` | station records |
//! | `GET /vehicles` | vehicles currently bound to a stream |
//! | `POST /order` | rent a scooter and dispatch it to a station |
//! | `GET /stats` | routing, ingestion and live feed counters |

use crate::server::{
    collab::{Scooter, Station},
    dispatch::{DropReason, RouteOutcome},
    hub::{Hub, HubStats},
    registry::SessionId,
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use scooter_core::{
    Error,
    types::{StationId, VehicleId},
};
use serde::{Deserialize, Serialize};

pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/scooter", get(live_feed))
        .route("/scooters", get(list_scooters))
        .route("/stations", get(list_stations))
        .route("/vehicles", get(list_vehicles))
        .route("/order", post(place_order))
        .route("/stats", get(stats))
        .with_state(hub)
}

/// [`Error`] rendered as a JSON body with a matching status code.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Upstream { .. } | Error::Transport { .. } => StatusCode::BAD_GATEWAY,
            Error::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Error::ChannelError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(%status, "Request failed: {}", self.0);
        }

        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

async fn live_feed(
    State(hub): State<Hub>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = hub.fanout().subscribe();
    tracing::debug!(subscriber = subscription.id(), "Live feed opened");

    // Ends as soon as the fanout drops the subscriber, without draining.
    let done = subscription.done().cancelled_owned();
    let stream = subscription
        .map(|msg| Event::default().json_data(&*msg))
        .take_until(done);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn stats(State(hub): State<Hub>) -> Json<HubStats> {
    Json(hub.stats())
}

async fn list_scooters(State(hub): State<Hub>) -> Result<Json<Vec<Scooter>>, ApiError> {
    Ok(Json(hub.collaborators().fleet.get_all_scooters().await?))
}

async fn list_stations(State(hub): State<Hub>) -> Result<Json<Vec<Station>>, ApiError> {
    Ok(Json(hub.collaborators().fleet.get_all_stations().await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BoundVehicle {
    vehicle_id: VehicleId,
    session: SessionId,
    bound_at: u64,
}

async fn list_vehicles(State(hub): State<Hub>) -> Result<Json<Vec<BoundVehicle>>, ApiError> {
    let entries = hub.registry().snapshot().await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|entry| BoundVehicle {
                vehicle_id: entry.vehicle_id,
                session: entry.handle.session(),
                bound_at: entry.bound_at,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest {
    scooter_id: VehicleId,
    station_id: StationId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    routed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<DropReason>,
}

async fn place_order(
    State(hub): State<Hub>,
    Json(req): Json<OrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let receipt = hub.place_order(req.scooter_id, req.station_id).await?;
    let reason = match receipt.outcome {
        RouteOutcome::Delivered { .. } => None,
        RouteOutcome::Dropped { reason } => Some(reason),
    };

    Ok(Json(OrderResponse {
        order_id: receipt.order_id,
        routed: reason.is_none(),
        reason,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        collab::{Collaborators, memory::MemoryFleet},
        config::ServerConfig,
        registry::{ChannelHandle, CommandSlot},
    };
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use scooter_core::types::TelemetryMessage;
    use std::sync::Arc;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn hub() -> Hub {
        Hub::new(
            ServerConfig::default(),
            Collaborators::in_memory(MemoryFleet::demo()),
        )
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn order(body: &str) -> Request<Body> {
        Request::post("/order")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn lists_fleet_records() {
        let app = router(hub());

        let resp = app
            .oneshot(Request::get("/scooters").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 3);
        assert_eq!(body[0]["batteryRemain"], 100.0);
        assert_eq!(body[0]["canBeRent"], true);
    }

    #[tokio::test]
    async fn order_for_offline_scooter_reports_the_miss() {
        let app = router(hub());

        let resp = app
            .oneshot(order(r#"{"scooterId": 1, "stationId": 2}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["orderId"], 1);
        assert_eq!(body["routed"], false);
        assert_eq!(body["reason"], "unbound");
    }

    #[tokio::test]
    async fn order_for_connected_scooter_is_routed() {
        let hub = hub();
        let (tx, _rx) = watch::channel(None);
        let slot: Arc<CommandSlot> = Arc::new(tx);
        hub.registry()
            .bind(2, ChannelHandle::new(hub.next_session(), &slot))
            .await
            .unwrap();

        let resp = router(hub)
            .oneshot(order(r#"{"scooterId": 2, "stationId": 1}"#))
            .await
            .unwrap();

        let body = json_body(resp).await;
        assert_eq!(body["routed"], true);
        assert!(body.get("reason").is_none());
    }

    #[tokio::test]
    async fn unknown_scooter_is_404() {
        let resp = router(hub())
            .oneshot(order(r#"{"scooterId": 99, "stationId": 1}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert!(body["error"].as_str().unwrap().contains("scooter 99"));
    }

    #[tokio::test]
    async fn vehicles_lists_bindings() {
        let hub = hub();
        let (tx, _rx) = watch::channel(None);
        let slot: Arc<CommandSlot> = Arc::new(tx);
        hub.registry()
            .bind(7, ChannelHandle::new(11, &slot))
            .await
            .unwrap();

        let resp = router(hub)
            .oneshot(Request::get("/vehicles").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = json_body(resp).await;
        assert_eq!(body[0]["vehicleId"], 7);
        assert_eq!(body[0]["session"], 11);
    }

    #[tokio::test]
    async fn stats_reports_routing_misses() {
        let hub = hub();
        hub.place_order(1, 2).await.unwrap();

        let resp = router(hub)
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["commandsDropped"], 1);
        assert_eq!(body["commandsDelivered"], 0);
        assert_eq!(body["subscribers"], 0);
    }

    #[tokio::test]
    async fn live_feed_after_shutdown_ends_the_response() {
        let hub = hub();
        hub.shutdown().await.unwrap();

        let resp = router(hub.clone())
            .oneshot(Request::get("/scooter").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let mut frames = resp.into_body().into_data_stream();
        let next = tokio::time::timeout(core::time::Duration::from_millis(200), frames.next())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(hub.fanout().is_empty());
    }

    #[tokio::test]
    async fn live_feed_streams_telemetry_as_json_events() {
        let hub = hub();

        let resp = router(hub.clone())
            .oneshot(Request::get("/scooter").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(hub.fanout().len(), 1);

        hub.fanout().publish(Arc::new(TelemetryMessage {
            vehicle_id: 9,
            latitude: 52.18,
            longitude: 47.17,
            battery_remain: 52.7,
            timestamp: 1,
        }));

        let mut frames = resp.into_body().into_data_stream();
        let frame = frames.next().await.unwrap().unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.contains(r#""vehicleId":9"#));
        assert!(text.contains(r#""batteryRemain":52.7"#));

        drop(frames);
        assert!(hub.fanout().is_empty());
    }
}
