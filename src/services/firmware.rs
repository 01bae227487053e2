//! Firmware update service
//!
//! Lists published firmware releases and asks the device to update itself.

use crate::{config::FirmwareConfig, device_client::DeviceStateClient};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use log::{debug, info};
#[cfg(feature = "mock")]
use mockall::automock;
use reqwest::Client;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::{cmp::Reverse, time::Duration};
use thiserror::Error;
use trait_variant::make;

#[derive(Debug, Error, PartialEq)]
pub enum FirmwareError {
    #[error("invalid version name: {0}")]
    InvalidVersion(String),
}

/// Release entry as published by the GitHub releases API
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FirmwareRelease {
    pub tag_name: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub name: String,
    pub date: String,
    pub notes: Option<String>,
    pub latest: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateVersionRequest {
    pub version: String,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Eq, PartialEq)]
pub enum UpdateOutcome {
    /// The user did not confirm, nothing was sent to the device
    Declined,
    Requested,
}

#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait ReleaseFeed {
    async fn releases(&self) -> Result<Vec<FirmwareRelease>>;
}

#[derive(Clone)]
pub struct GithubReleaseFeed {
    client: Client,
    url: String,
}

impl GithubReleaseFeed {
    pub fn new(config: &FirmwareConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create release feed HTTP client")?;

        Ok(Self {
            client,
            url: config.releases_url.clone(),
        })
    }
}

impl ReleaseFeed for GithubReleaseFeed {
    async fn releases(&self) -> Result<Vec<FirmwareRelease>> {
        info!("GET {}", self.url);

        self.client
            .get(&self.url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .context("failed to send release feed request")?
            .error_for_status()
            .context("release feed returned error status")?
            .json()
            .await
            .context("failed to parse release feed")
    }
}

/// Service for firmware version operations
pub struct FirmwareService;

impl FirmwareService {
    /// Fetch releases newest first
    ///
    /// Releases whose tag carries a semantic version are ordered by it, the
    /// rest by publication date after them.
    pub async fn releases<F>(feed: &F) -> Result<Vec<ReleaseInfo>>
    where
        F: ReleaseFeed,
    {
        let mut releases = feed.releases().await?;

        releases.sort_by_key(|release| {
            Reverse((
                Version::parse(Self::version_number(&release.tag_name)).ok(),
                release.published_at,
            ))
        });

        Ok(releases
            .into_iter()
            .enumerate()
            .map(|(index, release)| ReleaseInfo {
                version: Self::version_number(&release.tag_name).to_string(),
                name: Self::display_name(&release.tag_name),
                date: Self::display_date(&release.published_at),
                notes: release.body.filter(|body| !body.trim().is_empty()),
                latest: index == 0,
            })
            .collect())
    }

    /// Strip a leading `<word>-` prefix, e.g. `micropython-1.4.0` to `1.4.0`
    ///
    /// A word is ASCII letters, digits and underscores.
    pub fn version_number(tag: &str) -> &str {
        match tag.split_once('-') {
            Some((prefix, rest))
                if !prefix.is_empty()
                    && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                rest
            }
            _ => tag,
        }
    }

    pub fn display_name(tag: &str) -> String {
        format!("Gaisa Sargs {}", Self::version_number(tag))
    }

    pub fn display_date(published_at: &DateTime<Utc>) -> String {
        published_at.format("%Y-%m-%d").to_string()
    }

    /// Ask the device to update to `version` once the user confirmed
    ///
    /// # Arguments
    /// * `client` - Device client used for the OTA request
    /// * `request` - Version and confirmation from the dashboard
    ///
    /// # Returns
    /// `Declined` without any device call if not confirmed, `Requested` once
    /// the device accepted the update. The device reboots afterwards.
    pub async fn update_version<T>(client: &T, request: UpdateVersionRequest) -> Result<UpdateOutcome>
    where
        T: DeviceStateClient,
    {
        if !request.confirmed {
            info!("version update declined");
            return Ok(UpdateOutcome::Declined);
        }

        let version = Self::version_number(request.version.trim());

        if !Self::is_device_version(version) {
            bail!(FirmwareError::InvalidVersion(request.version));
        }

        debug!("requesting update to {version}");
        client
            .prepare_ota(version.to_string())
            .await
            .context("failed to prepare ota update")?;

        info!("update to {version} requested, device will restart");
        Ok(UpdateOutcome::Requested)
    }

    /// Same rule the firmware applies: one digit major, numeric minor and patch
    fn is_device_version(version: &str) -> bool {
        let parts: Vec<&str> = version.split('.').collect();

        let [major, minor, patch] = parts.as_slice() else {
            return false;
        };

        major.len() == 1
            && [major, minor, patch]
                .iter()
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
    }
}
