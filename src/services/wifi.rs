//! WiFi settings service
//!
//! Turns a station selection from the dashboard into a reconnection session.

use crate::{
    device_client::{AuthMode, DeviceStateClient, NetworkId, Station, WifiCredentials},
    services::reconnect::{ReconnectError, ReconnectMonitor, ReconnectOptions, Started},
};
use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Longest SSID allowed by 802.11, in bytes
const MAX_SSID_LEN: usize = 32;

/// Station change requested by the user
///
/// Intentionally has no `Debug` impl since it carries the plain passphrase.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectStationRequest {
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub bssid: Option<String>,
    #[serde(default, alias = "psk")]
    pub password: Option<String>,
    #[serde(default)]
    pub authmode: Option<AuthMode>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub options: Option<ReconnectOptions>,
}

pub enum SelectStationOutcome {
    /// The user did not confirm, nothing was sent to the device
    Declined,
    Started(Started),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectableStation {
    #[serde(flatten)]
    pub station: Station,
    pub selectable: bool,
}

/// Service for WiFi station selection
pub struct WifiSettingsService;

impl WifiSettingsService {
    /// List the stations the device sees, marking which ones can be selected
    pub async fn selectable_stations<T>(client: &T) -> Result<Vec<SelectableStation>>
    where
        T: DeviceStateClient,
    {
        Ok(client
            .stations()
            .await?
            .into_iter()
            .map(|station| SelectableStation {
                selectable: station.authmode.is_selectable(),
                station,
            })
            .collect())
    }

    /// Apply a confirmed station change and start waiting for reconnection
    ///
    /// # Arguments
    /// * `monitor` - Reconnect monitor owning the device's session slot
    /// * `request` - Selection from the dashboard
    /// * `default_options` - Retry budget used when the request carries none
    ///
    /// # Returns
    /// `Declined` without any device call if the change was not confirmed,
    /// otherwise the started session
    pub async fn select_station<T>(
        monitor: &ReconnectMonitor<T>,
        request: SelectStationRequest,
        default_options: ReconnectOptions,
    ) -> Result<SelectStationOutcome, ReconnectError>
    where
        T: DeviceStateClient + Send + Sync + 'static,
    {
        if !request.confirmed {
            info!("station change declined");
            return Ok(SelectStationOutcome::Declined);
        }

        let mut request = request;
        if request.authmode.is_none() {
            request.authmode = Self::lookup_authmode(monitor.client(), &request).await;
        }

        let options = request.options.unwrap_or(default_options);
        let credentials = Self::credentials(request)?;

        monitor
            .start(credentials, options)
            .await
            .map(SelectStationOutcome::Started)
    }

    /// Authmode of the requested network as the device reports it
    ///
    /// `None` if the network is not in range or the list cannot be fetched, in
    /// which case the request is treated as a protected network.
    async fn lookup_authmode<T>(client: &T, request: &SelectStationRequest) -> Option<AuthMode>
    where
        T: DeviceStateClient,
    {
        let stations = match client.stations().await {
            Ok(stations) => stations,
            Err(e) => {
                warn!("failed to look up authmode: {e:#}");
                return None;
            }
        };

        let bssid = request
            .bssid
            .as_deref()
            .map(str::trim)
            .filter(|bssid| !bssid.is_empty());
        let ssid = request.ssid.as_deref().filter(|ssid| !ssid.trim().is_empty());

        stations
            .iter()
            .find(|station| bssid.is_some_and(|bssid| station.bssid.eq_ignore_ascii_case(bssid)))
            .or_else(|| {
                stations
                    .iter()
                    .find(|station| ssid.is_some_and(|ssid| station.ssid == ssid))
            })
            .map(|station| station.authmode)
    }

    /// Build credentials from a request
    ///
    /// The SSID takes precedence, the BSSID is only used when no SSID is given
    /// since the firmware selects by name. Open networks never carry a
    /// passphrase, whatever the user typed.
    pub fn credentials(request: SelectStationRequest) -> Result<WifiCredentials, ReconnectError> {
        let network_id = Self::network_id(request.bssid.as_deref(), request.ssid.as_deref())?;

        let passphrase = match request.authmode {
            Some(AuthMode::Unknown) => {
                return Err(ReconnectError::NotSelectable(
                    network_id.as_str().to_string(),
                ));
            }
            Some(AuthMode::Open) => None,
            _ => request.password.filter(|password| !password.is_empty()),
        };

        Ok(match passphrase {
            Some(passphrase) => WifiCredentials::with_passphrase(network_id, passphrase),
            None => WifiCredentials::open(network_id),
        })
    }

    fn network_id(bssid: Option<&str>, ssid: Option<&str>) -> Result<NetworkId, ReconnectError> {
        if let Some(ssid) = ssid.filter(|ssid| !ssid.trim().is_empty()) {
            if ssid.len() > MAX_SSID_LEN {
                return Err(ReconnectError::InvalidCredentials(format!(
                    "ssid longer than {MAX_SSID_LEN} bytes"
                )));
            }
            return Ok(NetworkId::Ssid(ssid.to_string()));
        }

        match bssid.map(str::trim).filter(|bssid| !bssid.is_empty()) {
            Some(bssid) if !Self::is_bssid(bssid) => Err(ReconnectError::InvalidCredentials(
                format!("invalid bssid: {bssid}"),
            )),
            Some(bssid) => Ok(NetworkId::Bssid(bssid.to_ascii_lowercase())),
            None => Err(ReconnectError::InvalidCredentials(
                "ssid or bssid required".to_string(),
            )),
        }
    }

    fn is_bssid(value: &str) -> bool {
        let octets: Vec<&str> = value.split(':').collect();
        octets.len() == 6
            && octets
                .iter()
                .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
    }
}
