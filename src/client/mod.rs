use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::DispatchError;
use crate::models::courier::GeoPoint;

const MIN_LATITUDE: f64 = -90.0;
const MAX_LATITUDE: f64 = 90.0;
const MIN_LONGITUDE: f64 = -180.0;
const MAX_LONGITUDE: f64 = 180.0;

/// Client for the external route-optimizer service. Validates inputs before
/// any network call and retries transient failures with linear backoff
/// (n x base delay after attempt n). The routing service is treated as
/// unreliable by contract; callers decide whether its failure is fatal.
pub struct RouteOptimizerClient {
    http: reqwest::Client,
    base_url: String,
    max_attempts: u32,
    base_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&GeoPoint> for RouteLocation {
    fn from(point: &GeoPoint) -> Self {
        Self {
            latitude: point.lat,
            longitude: point.lng,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRouteRequest {
    delivery_id: Uuid,
    courier_id: Uuid,
    pickup_location: RouteLocation,
    delivery_location: RouteLocation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRouteResponse {
    route_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct UpdateRouteStatusRequest<'a> {
    status: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDetails {
    pub route_id: Uuid,
    pub delivery_id: Uuid,
    pub courier_id: Uuid,
    pub status: String,
    #[serde(default)]
    pub pickup_location: Option<RouteLocation>,
    #[serde(default)]
    pub delivery_location: Option<RouteLocation>,
}

#[derive(Debug, Deserialize)]
struct RouteListResponse {
    #[serde(default)]
    routes: Vec<RouteDetails>,
}

impl RouteOptimizerClient {
    pub fn new(base_url: impl Into<String>, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.route_service_url.clone(),
            config.route_retry_attempts,
            config.route_retry_base_delay,
        )
    }

    /// Creates a route for an assigned delivery and returns its id. A
    /// successful response without a route id is an external-service error
    /// and is not retried.
    pub async fn create_route(
        &self,
        delivery_id: Uuid,
        courier_id: Uuid,
        pickup: &GeoPoint,
        dropoff: &GeoPoint,
    ) -> Result<Uuid, DispatchError> {
        validate_id(delivery_id, "delivery id")?;
        validate_id(courier_id, "courier id")?;
        validate_point(pickup, "pickup")?;
        validate_point(dropoff, "dropoff")?;

        let url = format!("{}/api/routes", self.base_url);
        let body = CreateRouteRequest {
            delivery_id,
            courier_id,
            pickup_location: pickup.into(),
            delivery_location: dropoff.into(),
        };

        let response = self
            .execute_with_retry("create_route", || {
                let request = self.http.post(&url).json(&body);
                async move {
                    request
                        .send()
                        .await?
                        .error_for_status()?
                        .json::<CreateRouteResponse>()
                        .await
                }
            })
            .await?;

        let route_id = response.route_id.ok_or_else(|| {
            DispatchError::ExternalService("route service response missing routeId".to_string())
        })?;

        info!(%delivery_id, %courier_id, %route_id, "route created");
        Ok(route_id)
    }

    pub async fn get_route(&self, route_id: Uuid) -> Result<RouteDetails, DispatchError> {
        validate_id(route_id, "route id")?;

        let url = format!("{}/api/routes/{route_id}", self.base_url);
        self.execute_with_retry("get_route", || {
            let request = self.http.get(&url);
            async move {
                request
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<RouteDetails>()
                    .await
            }
        })
        .await
    }

    pub async fn update_route_status(
        &self,
        route_id: Uuid,
        status: &str,
    ) -> Result<bool, DispatchError> {
        validate_id(route_id, "route id")?;
        if status.trim().is_empty() {
            return Err(DispatchError::Validation(
                "route status must not be empty".to_string(),
            ));
        }

        let url = format!("{}/api/routes/{route_id}/status", self.base_url);
        let body = UpdateRouteStatusRequest { status };

        let code = self
            .execute_with_retry("update_route_status", || {
                let request = self.http.put(&url).json(&body);
                async move { Ok(request.send().await?.error_for_status()?.status()) }
            })
            .await?;

        Ok(code == StatusCode::OK)
    }

    pub async fn delete_route(&self, route_id: Uuid) -> Result<bool, DispatchError> {
        validate_id(route_id, "route id")?;

        let url = format!("{}/api/routes/{route_id}", self.base_url);
        let code = self
            .execute_with_retry("delete_route", || {
                let request = self.http.delete(&url);
                async move { Ok(request.send().await?.error_for_status()?.status()) }
            })
            .await?;

        Ok(code == StatusCode::NO_CONTENT)
    }

    pub async fn routes_by_courier(
        &self,
        courier_id: Uuid,
        status: Option<&str>,
    ) -> Result<Vec<RouteDetails>, DispatchError> {
        validate_id(courier_id, "courier id")?;

        let url = format!("{}/api/routes", self.base_url);
        let mut query = vec![("courierId", courier_id.to_string())];
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }

        let response = self
            .execute_with_retry("routes_by_courier", || {
                let request = self.http.get(&url).query(&query);
                async move {
                    request
                        .send()
                        .await?
                        .error_for_status()?
                        .json::<RouteListResponse>()
                        .await
                }
            })
            .await?;

        Ok(response.routes)
    }

    /// Runs `call` up to `max_attempts` times. After failed attempt n the
    /// wait is n x base_delay (1s, 2s with the defaults), via an async sleep
    /// so a shared worker is never stalled. Dropping the future cancels the
    /// wait and the whole call with it.
    async fn execute_with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, reqwest::Error>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => {
                    warn!(operation, attempt, error = %err, "route service call failed");
                    return Err(DispatchError::ExternalService(format!(
                        "{operation} failed after {attempt} attempts: {err}"
                    )));
                }
                Err(err) => {
                    warn!(operation, attempt, error = %err, "route service call failed, retrying");
                    sleep(self.base_delay * attempt).await;
                }
            }
        }
    }
}

fn validate_id(id: Uuid, label: &str) -> Result<(), DispatchError> {
    if id.is_nil() {
        return Err(DispatchError::Validation(format!("{label} must be set")));
    }
    Ok(())
}

fn validate_point(point: &GeoPoint, label: &str) -> Result<(), DispatchError> {
    if !point.lat.is_finite() || !point.lng.is_finite() {
        return Err(DispatchError::Validation(format!(
            "{label} coordinates must be finite numbers"
        )));
    }
    if point.lat < MIN_LATITUDE || point.lat > MAX_LATITUDE {
        return Err(DispatchError::Validation(format!(
            "{label} latitude must be between {MIN_LATITUDE} and {MAX_LATITUDE}"
        )));
    }
    if point.lng < MIN_LONGITUDE || point.lng > MAX_LONGITUDE {
        return Err(DispatchError::Validation(format!(
            "{label} longitude must be between {MIN_LONGITUDE} and {MAX_LONGITUDE}"
        )));
    }
    Ok(())
}
