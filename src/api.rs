use crate::{
    device_client::DeviceStateClient,
    http_client::{JsonResponse, handle_service_result},
    services::{
        firmware::{FirmwareService, ReleaseFeed, UpdateOutcome, UpdateVersionRequest},
        reconnect::{ReconnectError, ReconnectMonitor, ReconnectOptions},
        wifi::{SelectStationOutcome, SelectStationRequest, WifiSettingsService},
    },
};
use actix_web::{HttpResponse, Responder, web};
use log::{debug, error};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Serialize)]
struct Healthcheck {
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStarted {
    session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    submit_error: Option<String>,
}

#[derive(Serialize)]
struct Cancelled {
    cancelled: bool,
}

pub struct Api<Device, Releases>
where
    Device: DeviceStateClient + Send + Sync + 'static,
    Releases: ReleaseFeed + Send + Sync + 'static,
{
    pub device: Arc<Device>,
    pub releases: Arc<Releases>,
    pub monitor: Arc<ReconnectMonitor<Device>>,
    pub reconnect_options: ReconnectOptions,
}

impl<Device, Releases> Clone for Api<Device, Releases>
where
    Device: DeviceStateClient + Send + Sync + 'static,
    Releases: ReleaseFeed + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            releases: self.releases.clone(),
            monitor: self.monitor.clone(),
            reconnect_options: self.reconnect_options,
        }
    }
}

impl<Device, Releases> Api<Device, Releases>
where
    Device: DeviceStateClient + Send + Sync + 'static,
    Releases: ReleaseFeed + Send + Sync + 'static,
{
    pub fn new(device: Device, releases: Releases, reconnect_options: ReconnectOptions) -> Self {
        let device = Arc::new(device);

        Api {
            monitor: Arc::new(ReconnectMonitor::new(device.clone())),
            device,
            releases: Arc::new(releases),
            reconnect_options,
        }
    }

    pub async fn healthcheck() -> impl Responder {
        HttpResponse::Ok().json(Healthcheck {
            version: env!("CARGO_PKG_VERSION"),
        })
    }

    pub async fn state(api: web::Data<Self>) -> impl Responder {
        debug!("state() called");

        handle_service_result(api.device.state().await.map(JsonResponse), "state")
    }

    pub async fn stations(api: web::Data<Self>) -> impl Responder {
        debug!("stations() called");

        handle_service_result(
            WifiSettingsService::selectable_stations(api.device.as_ref())
                .await
                .map(JsonResponse),
            "stations",
        )
    }

    pub async fn select_station(
        body: web::Json<SelectStationRequest>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("select_station() called");

        match WifiSettingsService::select_station(
            &api.monitor,
            body.into_inner(),
            api.reconnect_options,
        )
        .await
        {
            Ok(SelectStationOutcome::Declined) => {
                HttpResponse::Conflict().body("station change not confirmed")
            }
            Ok(SelectStationOutcome::Started(started)) => {
                HttpResponse::Accepted().json(SessionStarted {
                    session_id: started.handle.id(),
                    submit_error: started.submitted.err().map(|e| e.to_string()),
                })
            }
            Err(
                e @ (ReconnectError::InvalidCredentials(_)
                | ReconnectError::InvalidOptions(_)
                | ReconnectError::NotSelectable(_)),
            ) => HttpResponse::BadRequest().body(e.to_string()),
            Err(e) => {
                error!("select_station failed: {e}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn reconnect(api: web::Data<Self>) -> impl Responder {
        debug!("reconnect() called");

        match api.monitor.latest_snapshot() {
            Some(snapshot) => HttpResponse::Ok().json(snapshot),
            None => HttpResponse::NoContent().finish(),
        }
    }

    pub async fn cancel_reconnect(api: web::Data<Self>) -> impl Responder {
        debug!("cancel_reconnect() called");

        HttpResponse::Ok().json(Cancelled {
            cancelled: api.monitor.cancel_active(),
        })
    }

    pub async fn versions(api: web::Data<Self>) -> impl Responder {
        debug!("versions() called");

        handle_service_result(
            FirmwareService::releases(api.releases.as_ref())
                .await
                .map(JsonResponse),
            "versions",
        )
    }

    pub async fn update_version(
        body: web::Json<UpdateVersionRequest>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("update_version() called: {body:?}");

        match FirmwareService::update_version(api.device.as_ref(), body.into_inner()).await {
            Ok(UpdateOutcome::Declined) => {
                HttpResponse::Conflict().body("version update not confirmed")
            }
            Ok(UpdateOutcome::Requested) => HttpResponse::Accepted().finish(),
            Err(e) => handle_service_result::<()>(Err(e), "update_version"),
        }
    }
}

/// Register all API routes for the given device and release feed types
pub fn configure<Device, Releases>(cfg: &mut web::ServiceConfig)
where
    Device: DeviceStateClient + Send + Sync + 'static,
    Releases: ReleaseFeed + Send + Sync + 'static,
{
    cfg.route(
        "/healthcheck",
        web::get().to(Api::<Device, Releases>::healthcheck),
    )
    .route("/api/state", web::get().to(Api::<Device, Releases>::state))
    .route(
        "/api/stations",
        web::get().to(Api::<Device, Releases>::stations),
    )
    .route(
        "/api/stations/select",
        web::post().to(Api::<Device, Releases>::select_station),
    )
    .route(
        "/api/reconnect",
        web::get().to(Api::<Device, Releases>::reconnect),
    )
    .route(
        "/api/reconnect/cancel",
        web::post().to(Api::<Device, Releases>::cancel_reconnect),
    )
    .route(
        "/api/versions",
        web::get().to(Api::<Device, Releases>::versions),
    )
    .route(
        "/api/versions/update",
        web::post().to(Api::<Device, Releases>::update_version),
    );
}
