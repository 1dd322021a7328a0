use crate::server::model::{
    status_code, ErrorBody, HeatmapQuery, NearModel, NearQuery, RollupQuery, StatusModel, VerifyRequest,
};
use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use minefusion::aggregation::{BucketWidth, TimeWindow};
use minefusion::ingest::{connect, DeviceSession, Inbound};
use minefusion::{FusionError, FusionResult, FusionService};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;
use warp::filters::BoxedFilter;
use warp::reply::{Reply, Response};
use warp::ws::{Message, WebSocket, Ws};
use warp::Filter;

const DEFAULT_HEATMAP_RESOLUTION: u8 = 9;

fn respond<T: Serialize>(result: FusionResult<T>) -> Response {
    match result {
        Ok(body) => warp::reply::json(&body).into_response(),
        Err(err) => {
            let status = status_code(&err);
            if status.is_server_error() {
                warn!("request failed: {}", err);
            }
            warp::reply::with_status(
                warp::reply::json(&ErrorBody {
                    error: err.to_string(),
                }),
                status,
            )
            .into_response()
        }
    }
}

/// HTTP and WebSocket front of a running [`FusionService`].
pub struct DeviceGateway {
    service: Arc<FusionService>,
}

impl DeviceGateway {
    pub fn new(service: Arc<FusionService>) -> Self {
        Self { service }
    }

    pub fn routes(&self) -> BoxedFilter<(Response,)> {
        let service = Arc::clone(&self.service);
        let service_filter = warp::any().map(move || Arc::clone(&service));

        let stream = warp::path!("devices" / Uuid / "stream")
            .and(warp::ws())
            .and(service_filter.clone())
            .and_then(open_stream);

        let detections = warp::path!("scans" / Uuid / "detections")
            .and(warp::get())
            .and(service_filter.clone())
            .and_then(list_detections);

        let detect = warp::path!("scans" / Uuid / "detect")
            .and(warp::post())
            .and(service_filter.clone())
            .and_then(run_detection);

        let verify = warp::path!("detections" / Uuid / "verify")
            .and(warp::post())
            .and(warp::body::json())
            .and(service_filter.clone())
            .and_then(verify_detection);

        let heatmap = warp::path!("scans" / Uuid / "heatmap")
            .and(warp::get())
            .and(warp::query::<HeatmapQuery>())
            .and(service_filter.clone())
            .and_then(build_heatmap);

        let rollup = warp::path!("scans" / Uuid / "rollup")
            .and(warp::get())
            .and(warp::query::<RollupQuery>())
            .and(service_filter.clone())
            .and_then(build_rollup);

        let near = warp::path!("scans" / Uuid / "near")
            .and(warp::get())
            .and(warp::query::<NearQuery>())
            .and(service_filter.clone())
            .and_then(evidence_near);

        let report = warp::path!("scans" / Uuid / "report")
            .and(warp::get())
            .and(service_filter.clone())
            .and_then(scan_report);

        let status = warp::path!("status")
            .and(warp::get())
            .and(service_filter)
            .map(|service: Arc<FusionService>| {
                warp::reply::json(&StatusModel {
                    connected_devices: service.registry().len(),
                    metrics: service.metrics().snapshot(),
                })
                .into_response()
            });

        stream
            .or(detections)
            .unify()
            .or(detect)
            .unify()
            .or(verify)
            .unify()
            .or(heatmap)
            .unify()
            .or(rollup)
            .unify()
            .or(near)
            .unify()
            .or(report)
            .unify()
            .or(status)
            .unify()
            .boxed()
    }

    /// Serves until Ctrl+C, then stops accepting connections.
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        let (bound, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(addr, async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!("ctrl-c handler failed: {}", err);
                }
            })
            .with_context(|| format!("binding gateway to {}", addr))?;
        info!("gateway listening on {}", bound);
        server.await;
        info!("gateway stopped");
        Ok(())
    }
}

async fn open_stream(device_id: Uuid, ws: Ws, service: Arc<FusionService>) -> Result<Response, Infallible> {
    match connect(service, device_id).await {
        Ok(session) => Ok(ws.on_upgrade(move |socket| pump(socket, session)).into_response()),
        Err(err) => Ok(respond::<()>(Err(err))),
    }
}

/// Shuttles socket messages into the device worker and its replies back out
/// until either side closes.
async fn pump(socket: WebSocket, session: DeviceSession) {
    let DeviceSession {
        device_id,
        inbound,
        mut outbound,
        handle,
        ..
    } = session;
    let (mut sink, mut source) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(reply) = outbound.recv().await {
            let text = match serde_json::to_string(&reply) {
                Ok(text) => text,
                Err(err) => {
                    warn!("device {}: unencodable reply: {}", device_id, err);
                    continue;
                }
            };
            if sink.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        // Socket may already be gone.
        let _ = sink.close().await;
    });

    while let Some(message) = source.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!("device {}: socket error: {}", device_id, err);
                break;
            }
        };
        let item = if message.is_binary() {
            Inbound::Binary(message.into_bytes())
        } else if message.is_text() {
            match message.to_str() {
                Ok(text) => Inbound::Text(text.to_owned()),
                Err(()) => continue,
            }
        } else if message.is_close() {
            break;
        } else {
            continue;
        };
        if inbound.send(item).await.is_err() {
            break;
        }
    }

    drop(inbound);
    if let Err(err) = handle.await {
        warn!("device {}: worker task failed: {}", device_id, err);
    }
    if let Err(err) = writer.await {
        warn!("device {}: writer task failed: {}", device_id, err);
    }
}

async fn list_detections(scan_id: Uuid, service: Arc<FusionService>) -> Result<Response, Infallible> {
    let result = async {
        service.stores().scans.scan(scan_id).await?;
        service.stores().detections.detections_for_scan(scan_id).await
    }
    .await;
    Ok(respond(result))
}

async fn run_detection(scan_id: Uuid, service: Arc<FusionService>) -> Result<Response, Infallible> {
    Ok(respond(service.pipeline().run_scan(scan_id).await))
}

async fn verify_detection(
    detection_id: Uuid,
    request: VerifyRequest,
    service: Arc<FusionService>,
) -> Result<Response, Infallible> {
    Ok(respond(
        service
            .pipeline()
            .verify(detection_id, request.decision, &request.verifier)
            .await,
    ))
}

async fn build_heatmap(scan_id: Uuid, query: HeatmapQuery, service: Arc<FusionService>) -> Result<Response, Infallible> {
    let result = async {
        let window = TimeWindow::between(query.start, query.end)?;
        let aggregation = service.aggregation();
        match query.grid_size_m {
            Some(size) => {
                aggregation
                    .heatmap_for_grid_size(scan_id, query.sensor, window, size)
                    .await
            }
            None => {
                let resolution = query.resolution.unwrap_or(DEFAULT_HEATMAP_RESOLUTION);
                aggregation.heatmap(scan_id, query.sensor, window, resolution).await
            }
        }
    }
    .await;
    Ok(respond(result))
}

async fn build_rollup(scan_id: Uuid, query: RollupQuery, service: Arc<FusionService>) -> Result<Response, Infallible> {
    let result = async {
        let window = TimeWindow::between(query.start, query.end)?;
        let aggregation = service.aggregation();
        match query.interval.as_deref() {
            Some(interval) => aggregation.rollup(scan_id, query.sensor, window, interval).await,
            None => {
                aggregation
                    .rollup_with(scan_id, query.sensor, window, BucketWidth::FiveMinutes)
                    .await
            }
        }
    }
    .await;
    Ok(respond(result))
}

async fn evidence_near(scan_id: Uuid, query: NearQuery, service: Arc<FusionService>) -> Result<Response, Infallible> {
    let result = async {
        if !(query.radius_m.is_finite() && query.radius_m > 0.0) {
            return Err(FusionError::InvalidParameter(format!(
                "radius_m must be positive, got {}",
                query.radius_m
            )));
        }
        let stores = service.stores();
        stores.scans.scan(scan_id).await?;
        let readings = stores
            .readings
            .readings_near(scan_id, query.sensor, query.lat, query.lon, query.radius_m)
            .await?;
        let mut detections = stores
            .detections
            .detections_near(query.lat, query.lon, query.radius_m)
            .await?;
        detections.retain(|d| d.scan_id == scan_id);
        Ok(NearModel { readings, detections })
    }
    .await;
    Ok(respond(result))
}

async fn scan_report(scan_id: Uuid, service: Arc<FusionService>) -> Result<Response, Infallible> {
    Ok(respond(service.aggregation().report(scan_id).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use minefusion::interface::{
        Detection, Device, QualityIndicators, Reading, Scan, ScanStatus, SensorPayload, SensorType,
        VerificationStatus,
    };
    use minefusion::store::{MemoryStore, ReadingStore, ScanStore};
    use minefusion::PipelineConfig;
    use warp::http::StatusCode;

    async fn gateway() -> (DeviceGateway, Arc<MemoryStore>, Uuid) {
        let (service, store) = FusionService::in_memory(PipelineConfig::default()).unwrap();
        let device = Device::register("multi_sensor_rover", "SN-0100", Utc::now());
        let scan = Scan::start(Uuid::new_v4(), None, device.id, "survey", Utc::now());
        let scan_id = scan.id;
        store.insert_device(device);
        store.insert_scan(scan).await.unwrap();
        (DeviceGateway::new(Arc::new(service)), store, scan_id)
    }

    fn reading(scan_id: Uuid, sensor_type: SensorType, value: f64) -> Reading {
        Reading {
            id: Uuid::new_v4(),
            scan_id,
            sensor_type,
            timestamp: Utc::now(),
            latitude: 48.4647,
            longitude: 35.0462,
            altitude: 112.0,
            value,
            variance: 0.1,
            quality: QualityIndicators { signal_strength: 255 },
            payload: SensorPayload::Ranging {
                median_deviation: value * 0.05,
                sample_count: 32,
            },
        }
    }

    #[tokio::test]
    async fn unknown_scan_is_not_found() {
        let (gateway, _, _) = gateway().await;
        let response = warp::test::request()
            .method("GET")
            .path(&format!("/scans/{}/detections", Uuid::new_v4()))
            .reply(&gateway.routes())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = serde_json::from_slice(response.body()).unwrap();
        assert!(body.error.contains("not found"));
    }

    #[tokio::test]
    async fn unsupported_interval_is_bad_request() {
        let (gateway, _, scan_id) = gateway().await;
        let response = warp::test::request()
            .method("GET")
            .path(&format!("/scans/{}/rollup?interval=7%20minutes", scan_id))
            .reply(&gateway.routes())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn report_requires_completed_scan() {
        let (gateway, _, scan_id) = gateway().await;
        let response = warp::test::request()
            .method("GET")
            .path(&format!("/scans/{}/report", scan_id))
            .reply(&gateway.routes())
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn detect_then_verify_over_http() {
        let (gateway, store, scan_id) = gateway().await;
        store
            .insert_batch(&[
                reading(scan_id, SensorType::Ranging, 2.0),
                reading(scan_id, SensorType::Magnetic, 2.2),
            ])
            .await
            .unwrap();
        let routes = gateway.routes();

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/scans/{}/detect", scan_id))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = warp::test::request()
            .method("GET")
            .path(&format!("/scans/{}/detections", scan_id))
            .reply(&routes)
            .await;
        let detections: Vec<Detection> = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(detections.len(), 1);

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/detections/{}/verify", detections[0].id))
            .json(&serde_json::json!({"decision": "confirm", "verifier": "eod-team-3"}))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let verified: Detection = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(verified.verification_status, VerificationStatus::Confirmed);

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/detections/{}/verify", detections[0].id))
            .json(&serde_json::json!({"decision": "dismiss", "verifier": "eod-team-3"}))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn heatmap_by_grid_size() {
        let (gateway, store, scan_id) = gateway().await;
        store
            .insert_batch(&[reading(scan_id, SensorType::Ranging, 1.0)])
            .await
            .unwrap();
        let response = warp::test::request()
            .method("GET")
            .path(&format!("/scans/{}/heatmap?sensor=ranging&grid_size_m=200", scan_id))
            .reply(&gateway.routes())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let heatmap: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(heatmap["key"]["resolution"], 8);
        assert_eq!(heatmap["cells"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn evidence_near_a_point_is_scoped_to_the_scan() {
        let (gateway, store, scan_id) = gateway().await;
        let mut distant = reading(scan_id, SensorType::Magnetic, 1.0);
        distant.latitude = 48.4747;
        store
            .insert_batch(&[
                reading(scan_id, SensorType::Ranging, 1.0),
                reading(scan_id, SensorType::Magnetic, 1.2),
                reading(Uuid::new_v4(), SensorType::Ranging, 1.0),
                distant,
            ])
            .await
            .unwrap();
        let routes = gateway.routes();

        let response = warp::test::request()
            .method("GET")
            .path(&format!("/scans/{}/near?lat=48.4647&lon=35.0462&radius_m=25", scan_id))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["readings"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["detections"].as_array().map(Vec::len), Some(0));

        let response = warp::test::request()
            .method("GET")
            .path(&format!(
                "/scans/{}/near?lat=48.4647&lon=35.0462&radius_m=25&sensor=magnetic",
                scan_id
            ))
            .reply(&routes)
            .await;
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["readings"].as_array().map(Vec::len), Some(1));

        let response = warp::test::request()
            .method("GET")
            .path(&format!("/scans/{}/near?lat=48.4647&lon=35.0462&radius_m=-1", scan_id))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_requires_known_device() {
        let (gateway, _, _) = gateway().await;
        let result = warp::test::ws()
            .path(&format!("/devices/{}/stream", Uuid::new_v4()))
            .handshake(gateway.routes())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stream_acknowledges_scan_lifecycle() {
        let (service, store) = FusionService::in_memory(PipelineConfig::default()).unwrap();
        let device = Device::register("multi_sensor_rover", "SN-0101", Utc::now());
        let device_id = device.id;
        store.insert_device(device);
        let gateway = DeviceGateway::new(Arc::new(service));

        let mut client = warp::test::ws()
            .path(&format!("/devices/{}/stream", device_id))
            .handshake(gateway.routes())
            .await
            .unwrap();
        let new_scan = Uuid::new_v4();
        client
            .send_text(format!(r#"{{"type":"scan_start","scan_id":"{}"}}"#, new_scan))
            .await;
        let reply = client.recv().await.unwrap();
        let text = reply.to_str().unwrap();
        assert!(text.contains("scan_ack"));
        assert!(text.contains("in_progress"));

        client
            .send_text(format!(
                r#"{{"type":"scan_end","scan_id":"{}","status":"completed"}}"#,
                new_scan
            ))
            .await;
        let reply = client.recv().await.unwrap();
        assert!(reply.to_str().unwrap().contains("completed"));
        let scan = store.scan(new_scan).await.unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
    }
}
