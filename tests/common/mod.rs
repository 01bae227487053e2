#![allow(dead_code)]

use airguard_ui::{
    device_client::{
        AuthMode, Co2Reading, DeviceError, DeviceState, DeviceStateClient, NetworkId, Station,
        WifiCredentials, WifiState,
    },
    services::firmware::{FirmwareRelease, ReleaseFeed},
};
use anyhow::{Result, anyhow, bail};
use chrono::{TimeZone, Utc};
use std::{collections::VecDeque, sync::Mutex, time::Duration};
use tokio::time::Instant;

/// What the device answers to one status poll
#[derive(Clone, Copy, Debug)]
pub enum Poll {
    Connected,
    NotConnected,
    Unreachable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub network: NetworkId,
    pub with_passphrase: bool,
}

/// Device double that answers status polls from a script
///
/// Once the script is used up every poll gets `fallback`.
pub struct ScriptedDevice {
    script: Mutex<VecDeque<Poll>>,
    fallback: Poll,
    submit_fails: bool,
    submit_delay: Option<Duration>,
    fetches: Mutex<Vec<Instant>>,
    submissions: Mutex<Vec<Submission>>,
    ota_requests: Mutex<Vec<String>>,
}

impl ScriptedDevice {
    pub fn new(script: impl IntoIterator<Item = Poll>, fallback: Poll) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            submit_fails: false,
            submit_delay: None,
            fetches: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            ota_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn never_connects() -> Self {
        Self::new([], Poll::NotConnected)
    }

    pub fn failing_submit(mut self) -> Self {
        self.submit_fails = true;
        self
    }

    /// Hold every submission for `delay` before acknowledging it
    pub fn slow_submit(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    /// Milliseconds between `start` and each status poll
    pub fn fetch_offsets_ms(&self, start: Instant) -> Vec<u128> {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .map(|at| (*at - start).as_millis())
            .collect()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn ota_requests(&self) -> Vec<String> {
        self.ota_requests.lock().unwrap().clone()
    }
}

pub fn device_state(connected: bool) -> DeviceState {
    DeviceState {
        wifi: WifiState {
            connected,
            ssid: connected.then(|| "Skola".to_string()),
            internet: connected,
        },
        co2: Co2Reading {
            ppm: Some(780.0),
            status: "AIR_QUALITY_UNKNOWN".to_string(),
        },
    }
}

impl DeviceStateClient for ScriptedDevice {
    async fn state(&self) -> Result<DeviceState> {
        self.fetches.lock().unwrap().push(Instant::now());

        let poll = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match poll {
            Poll::Connected => Ok(device_state(true)),
            Poll::NotConnected => Ok(device_state(false)),
            Poll::Unreachable => Err(anyhow!("connection timed out").context(
                DeviceError::Unreachable {
                    url: "http://192.168.4.1/api/state".to_string(),
                },
            )),
        }
    }

    async fn stations(&self) -> Result<Vec<Station>> {
        Ok(vec![
            Station {
                ssid: "Skola".to_string(),
                bssid: "aa:bb:cc:dd:ee:01".to_string(),
                channel: Some(6),
                rssi: Some(-52),
                authmode: AuthMode::Wpa2Psk,
                hidden: Some(false),
            },
            Station {
                ssid: "Kafejnica".to_string(),
                bssid: "aa:bb:cc:dd:ee:02".to_string(),
                channel: Some(11),
                rssi: Some(-70),
                authmode: AuthMode::Open,
                hidden: Some(false),
            },
            Station {
                ssid: "Korporativais".to_string(),
                bssid: "aa:bb:cc:dd:ee:03".to_string(),
                channel: None,
                rssi: None,
                authmode: AuthMode::Unknown,
                hidden: None,
            },
        ])
    }

    async fn select_station(&self, credentials: WifiCredentials) -> Result<()> {
        self.submissions.lock().unwrap().push(Submission {
            network: credentials.network_id.clone(),
            with_passphrase: credentials.passphrase.is_some(),
        });

        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }

        if self.submit_fails {
            bail!("POST http://192.168.4.1/api/stations/select failed with status 500");
        }
        Ok(())
    }

    async fn prepare_ota(&self, version_name: String) -> Result<()> {
        self.ota_requests.lock().unwrap().push(version_name);
        Ok(())
    }
}

pub struct StaticFeed(pub Vec<FirmwareRelease>);

impl StaticFeed {
    pub fn airguard() -> Self {
        Self(vec![
            FirmwareRelease {
                tag_name: "micropython-1.3.2".to_string(),
                published_at: Utc.with_ymd_and_hms(2021, 2, 11, 8, 0, 0).unwrap(),
                body: Some("Stabilitātes labojumi".to_string()),
            },
            FirmwareRelease {
                tag_name: "micropython-1.4.0".to_string(),
                published_at: Utc.with_ymd_and_hms(2021, 3, 7, 9, 30, 0).unwrap(),
                body: None,
            },
        ])
    }
}

impl ReleaseFeed for StaticFeed {
    async fn releases(&self) -> Result<Vec<FirmwareRelease>> {
        Ok(self.0.clone())
    }
}

pub fn ssid(name: &str) -> WifiCredentials {
    WifiCredentials::with_passphrase(NetworkId::Ssid(name.to_string()), "hunter22")
}

/// Assert each offset is within a few milliseconds of the expected one
pub fn assert_offsets(actual: &[u128], expected: &[u128]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "fetch offsets {actual:?}, expected {expected:?}"
    );
    for (actual, expected) in actual.iter().zip(expected) {
        assert!(
            actual.abs_diff(*expected) <= 5,
            "fetch at {actual}ms, expected {expected}ms"
        );
    }
}

pub fn near(elapsed: Duration, expected_ms: u128) -> bool {
    elapsed.as_millis().abs_diff(expected_ms) <= 5
}
