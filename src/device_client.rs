#![cfg_attr(feature = "mock", allow(dead_code, unused_imports))]

use crate::{
    config::DeviceConfig,
    http_client::{device_client, handle_http_response},
};
use anyhow::{Context, Result};
use log::info;
#[cfg(feature = "mock")]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trait_variant::make;

/// Failures that callers distinguish from generic request errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unreachable at {url}")]
    Unreachable { url: String },

    #[error("device returned an unexpected {what} payload")]
    InvalidPayload { what: &'static str },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DeviceState {
    pub wifi: WifiState,
    pub co2: Co2Reading,
}

impl DeviceState {
    /// Connectivity as the reconnection check sees it
    ///
    /// Only the station link counts. Internet reachability is reported
    /// separately and does not gate a successful reconnection.
    pub fn is_connected(&self) -> bool {
        self.wifi.connected
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct WifiState {
    pub connected: bool,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub internet: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Co2Reading {
    #[serde(default)]
    pub ppm: Option<f64>,
    pub status: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AuthMode {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "wep")]
    Wep,
    #[serde(rename = "wpa-psk")]
    WpaPsk,
    #[serde(rename = "wpa2-psk", alias = "wpa2")]
    Wpa2Psk,
    #[serde(rename = "wpa/wpa2-psk")]
    WpaWpa2Psk,
    #[serde(rename = "unknown", other)]
    Unknown,
}

impl AuthMode {
    pub fn is_selectable(self) -> bool {
        self != AuthMode::Unknown
    }

    pub fn needs_passphrase(self) -> bool {
        !matches!(self, AuthMode::Open | AuthMode::Unknown)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Station {
    pub ssid: String,
    pub bssid: String,
    #[serde(default)]
    pub channel: Option<u8>,
    #[serde(default)]
    pub rssi: Option<i16>,
    pub authmode: AuthMode,
    #[serde(default)]
    pub hidden: Option<bool>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetworkId {
    Ssid(String),
    Bssid(String),
}

impl NetworkId {
    pub fn as_str(&self) -> &str {
        match self {
            NetworkId::Ssid(id) | NetworkId::Bssid(id) => id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

/// Target network for a station change
///
/// The passphrase is `None` for open networks.
#[derive(Debug)]
pub struct WifiCredentials {
    pub network_id: NetworkId,
    pub passphrase: Option<SecretString>,
}

impl WifiCredentials {
    pub fn open(network_id: NetworkId) -> Self {
        Self {
            network_id,
            passphrase: None,
        }
    }

    pub fn with_passphrase(network_id: NetworkId, passphrase: impl Into<String>) -> Self {
        Self {
            network_id,
            passphrase: Some(SecretString::from(passphrase.into())),
        }
    }
}

/// Body of `POST /api/stations/select`
///
/// The firmware accepts `ssid` + `password` as well as `bssid` + `psk`.
#[derive(Debug, PartialEq, Serialize)]
struct SelectStation<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ssid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bssid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    psk: Option<&'a str>,
}

impl<'a> From<&'a WifiCredentials> for SelectStation<'a> {
    fn from(credentials: &'a WifiCredentials) -> Self {
        let secret = credentials
            .passphrase
            .as_ref()
            .map(|passphrase| passphrase.expose_secret());

        match &credentials.network_id {
            NetworkId::Ssid(ssid) => SelectStation {
                ssid: Some(ssid),
                password: secret,
                bssid: None,
                psk: None,
            },
            NetworkId::Bssid(bssid) => SelectStation {
                ssid: None,
                password: None,
                bssid: Some(bssid),
                psk: secret,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct PrepareOta<'a> {
    version_name: &'a str,
}

#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait DeviceStateClient {
    async fn state(&self) -> Result<DeviceState>;
    async fn stations(&self) -> Result<Vec<Station>>;
    async fn select_station(&self, credentials: WifiCredentials) -> Result<()>;
    async fn prepare_ota(&self, version_name: String) -> Result<()>;
}

#[derive(Clone)]
pub struct AirguardDeviceClient {
    client: Client,
    base_url: String,
}

impl AirguardDeviceClient {
    // API endpoint constants
    const STATE_ENDPOINT: &str = "/api/state";
    const STATIONS_ENDPOINT: &str = "/api/stations";
    const SELECT_STATION_ENDPOINT: &str = "/api/stations/select";
    const OTA_PREPARE_ENDPOINT: &str = "/api/ota/prepare";

    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let client = device_client(config.timeout)?;

        Ok(AirguardDeviceClient {
            client,
            base_url: config.url.clone(),
        })
    }

    fn build_url(&self, path: &str) -> String {
        // Normalize path to always start with a single "/"
        let normalized_path = path.trim_start_matches('/');
        format!("{}/{normalized_path}", self.base_url)
    }

    /// GET request to the device API
    async fn get(&self, path: &str) -> Result<String> {
        let url = self.build_url(path);
        info!("GET {url}");

        let res = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| DeviceError::Unreachable { url: url.clone() })?;

        handle_http_response(res, &format!("GET {url}")).await
    }

    /// POST request to the device API with JSON body
    ///
    /// The body is not logged since it may carry a passphrase.
    async fn post_json(&self, path: &str, body: impl Serialize) -> Result<String> {
        let url = self.build_url(path);
        info!("POST {url}");

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| DeviceError::Unreachable { url: url.clone() })?;

        handle_http_response(res, &format!("POST {url}")).await
    }
}

impl DeviceStateClient for AirguardDeviceClient {
    async fn state(&self) -> Result<DeviceState> {
        let body = self.get(Self::STATE_ENDPOINT).await?;
        serde_json::from_str(&body).context(DeviceError::InvalidPayload { what: "state" })
    }

    async fn stations(&self) -> Result<Vec<Station>> {
        let body = self.get(Self::STATIONS_ENDPOINT).await?;
        serde_json::from_str(&body).context(DeviceError::InvalidPayload { what: "stations" })
    }

    async fn select_station(&self, credentials: WifiCredentials) -> Result<()> {
        info!(
            "selecting station {} ({})",
            credentials.network_id.as_str(),
            if credentials.passphrase.is_some() {
                "with passphrase"
            } else {
                "open"
            }
        );

        self.post_json(
            Self::SELECT_STATION_ENDPOINT,
            SelectStation::from(&credentials),
        )
        .await?;
        Ok(())
    }

    async fn prepare_ota(&self, version_name: String) -> Result<()> {
        self.post_json(
            Self::OTA_PREPARE_ENDPOINT,
            PrepareOta {
                version_name: &version_name,
            },
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod build_url {
        use super::*;

        fn create_test_client(base_url: &str) -> AirguardDeviceClient {
            AirguardDeviceClient {
                client: reqwest::Client::new(),
                base_url: base_url.to_string(),
            }
        }

        #[test]
        fn normalizes_path_with_leading_slash() {
            let client = create_test_client("http://192.168.4.1");
            assert_eq!(client.build_url("/api/state"), "http://192.168.4.1/api/state");
        }

        #[test]
        fn normalizes_path_without_leading_slash() {
            let client = create_test_client("http://192.168.4.1");
            assert_eq!(client.build_url("api/state"), "http://192.168.4.1/api/state");
        }

        #[test]
        fn handles_root_path() {
            let client = create_test_client("http://192.168.4.1");
            assert_eq!(client.build_url("/"), "http://192.168.4.1/");
        }
    }

    mod wire_format {
        use super::*;

        #[test]
        fn state_parses_firmware_payload() {
            let state: DeviceState = serde_json::from_str(
                r#"{"co2":{"ppm":612,"status":"AIR_QUALITY_UNKNOWN"},
                    "wifi":{"connected":true,"internet":false,"ssid":"Skola"}}"#,
            )
            .unwrap();

            assert!(state.is_connected());
            assert_eq!(state.wifi.ssid.as_deref(), Some("Skola"));
            assert!(!state.wifi.internet);
            assert_eq!(state.co2.ppm, Some(612.0));
        }

        #[test]
        fn state_accepts_null_ssid_and_ppm() {
            let state: DeviceState = serde_json::from_str(
                r#"{"co2":{"ppm":null,"status":"AIR_QUALITY_UNKNOWN"},
                    "wifi":{"connected":false,"internet":false,"ssid":null}}"#,
            )
            .unwrap();

            assert!(!state.is_connected());
            assert_eq!(state.wifi.ssid, None);
            assert_eq!(state.co2.ppm, None);
        }

        #[test]
        fn stations_map_unrecognized_authmode_to_unknown() {
            let stations: Vec<Station> = serde_json::from_str(
                r#"[{"ssid":"a","bssid":"aa:bb:cc:dd:ee:ff","channel":6,"rssi":-60,"authmode":"wpa2-psk","hidden":false},
                    {"ssid":"b","bssid":"11:22:33:44:55:66","authmode":"wpa3-sae"},
                    {"ssid":"c","bssid":"11:22:33:44:55:67","authmode":"open"},
                    {"ssid":"d","bssid":"11:22:33:44:55:68","authmode":"wpa2"}]"#,
            )
            .unwrap();

            assert_eq!(stations[0].authmode, AuthMode::Wpa2Psk);
            assert_eq!(stations[0].rssi, Some(-60));
            assert_eq!(stations[0].hidden, Some(false));
            assert_eq!(stations[1].hidden, None);
            assert_eq!(stations[1].authmode, AuthMode::Unknown);
            assert!(!stations[1].authmode.is_selectable());
            assert_eq!(stations[2].authmode, AuthMode::Open);
            assert!(!stations[2].authmode.needs_passphrase());
            assert_eq!(stations[3].authmode, AuthMode::Wpa2Psk);
        }

        #[test]
        fn select_by_ssid_sends_password() {
            let credentials =
                WifiCredentials::with_passphrase(NetworkId::Ssid("Skola".into()), "hunter22");
            let body = serde_json::to_value(SelectStation::from(&credentials)).unwrap();
            assert_eq!(
                body,
                serde_json::json!({"ssid": "Skola", "password": "hunter22"})
            );
        }

        #[test]
        fn select_by_bssid_sends_psk() {
            let credentials = WifiCredentials::with_passphrase(
                NetworkId::Bssid("aa:bb:cc:dd:ee:ff".into()),
                "hunter22",
            );
            let body = serde_json::to_value(SelectStation::from(&credentials)).unwrap();
            assert_eq!(
                body,
                serde_json::json!({"bssid": "aa:bb:cc:dd:ee:ff", "psk": "hunter22"})
            );
        }

        #[test]
        fn select_open_network_omits_password() {
            let credentials = WifiCredentials::open(NetworkId::Ssid("Kafejnica".into()));
            let body = serde_json::to_value(SelectStation::from(&credentials)).unwrap();
            assert_eq!(body, serde_json::json!({"ssid": "Kafejnica"}));
        }

        #[test]
        fn credentials_debug_does_not_leak_passphrase() {
            let credentials =
                WifiCredentials::with_passphrase(NetworkId::Ssid("Skola".into()), "hunter22");
            assert!(!format!("{credentials:?}").contains("hunter22"));
        }
    }
}
