use crate::{device_client::DeviceError, services::firmware::FirmwareError};
use actix_web::HttpResponse;
use anyhow::{Context, Result, ensure};
use log::error;
use reqwest::{Client, Response};
use serde::Serialize;
use std::time::Duration;

/// Create an HTTP client for talking to the device over its WiFi link
///
/// Every request made through the client is bounded by `timeout`, so an
/// unreachable device turns into an error instead of a hanging request.
///
/// # Arguments
/// * `timeout` - Upper bound for connect plus response
///
/// # Examples
/// ```no_run
/// use airguard_ui::http_client::device_client;
/// use std::time::Duration;
///
/// let client = device_client(Duration::from_secs(3))
///     .expect("failed to create client");
/// ```
pub fn device_client(timeout: Duration) -> Result<Client> {
    ensure!(!timeout.is_zero(), "failed since device timeout is zero");

    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .context("failed to create device HTTP client")
}

/// Trait for converting service results into HTTP responses
pub trait ServiceResultResponse {
    fn into_response(self) -> HttpResponse;
}

impl ServiceResultResponse for () {
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok().finish()
    }
}

/// Serialize the wrapped value as a JSON body
pub struct JsonResponse<T>(pub T);

impl<T> ServiceResultResponse for JsonResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok().json(self.0)
    }
}

/// Handle Result and convert data to Response
///
/// Puts the data or the error into a corresponding Response and logs errors
/// with their full context chain. An unreachable device maps to 503 and a
/// rejected firmware version to 400, everything else to 500.
///
/// # Arguments
/// * `result` - The Result to handle
/// * `operation` - Context message describing the operation
///
/// # Returns
/// * `HttpResponse` - The ServiceResultResponse (HttpResponse::Ok or HttpResponse::InternalServerError)
pub fn handle_service_result<T>(result: Result<T>, operation: &str) -> HttpResponse
where
    T: ServiceResultResponse,
{
    match result {
        Ok(data) => data.into_response(),
        Err(e) => {
            error!("{operation} failed: {e:#}");

            let mut response = if matches!(
                e.downcast_ref::<DeviceError>(),
                Some(DeviceError::Unreachable { .. })
            ) {
                HttpResponse::ServiceUnavailable()
            } else if e.downcast_ref::<FirmwareError>().is_some() {
                HttpResponse::BadRequest()
            } else {
                HttpResponse::InternalServerError()
            };

            response.body(e.to_string())
        }
    }
}

/// Handle HTTP response by checking status and extracting body
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `context_msg` - Context message describing the request (e.g., "GET /api/state")
///
/// # Returns
/// * `Ok(String)` - The response body if the status is successful
/// * `Err` - If the status is not successful or reading the body fails
pub async fn handle_http_response(res: Response, context_msg: &str) -> Result<String> {
    let status = res.status();
    let body = res.text().await.context("failed to read response body")?;

    ensure!(
        status.is_success(),
        "{context_msg} failed with status {status} and body: {body}"
    );

    Ok(body)
}
