//! # Update descriptors and the checks applied before any I/O.
//!
//! - [`Manifest`] candidate build: version, artifact location, checksum, target.
//! - [`UpdateCheckRequest`] / [`UpdateCheckResponse`] the messaging exchange.
//! - [`Platform`] the running host in the naming used by release manifests.
//! - [`parse_version`] lenient semantic-version parsing (`v1.2` → `1.2.0`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Candidate update build. Transient: produced and consumed within one cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub version: String,
    #[serde(alias = "download_url")]
    pub url: String,
    /// Hex SHA-256 of the artifact; `None` skips verification.
    pub sha256: Option<String>,
    pub size: Option<u64>,
    pub os: String,
    pub arch: String,
    pub channel: String,
}

/// Why a manifest was filtered out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incompatibility {
    Channel { manifest: String, wanted: String },
    Platform { manifest: Platform, host: Platform },
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incompatibility::Channel { manifest, wanted } => {
                write!(f, "channel {manifest:?} does not match {wanted:?}")
            }
            Incompatibility::Platform { manifest, host } => {
                write!(f, "built for {manifest}, host is {host}")
            }
        }
    }
}

impl Manifest {
    /// Checks channel and target against the host.
    ///
    /// Empty fields on either side match anything; channels compare case-insensitively.
    pub fn check(&self, channel: &str, host: &Platform) -> Result<(), Incompatibility> {
        if !self.channel.is_empty() && !channel.is_empty() && !self.channel.eq_ignore_ascii_case(channel) {
            return Err(Incompatibility::Channel {
                manifest: self.channel.clone(),
                wanted: channel.to_string(),
            });
        }
        let os_ok = self.os.is_empty() || self.os == host.os;
        let arch_ok = self.arch.is_empty() || self.arch == host.arch;
        if !(os_ok && arch_ok) {
            return Err(Incompatibility::Platform {
                manifest: Platform {
                    os: self.os.clone(),
                    arch: self.arch.clone(),
                },
                host: host.clone(),
            });
        }
        Ok(())
    }

    /// Checksum, ignoring an empty string.
    pub fn checksum(&self) -> Option<&str> {
        self.sha256.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Emitted to the messaging collaborator to ask for an update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheckRequest {
    pub current_version: String,
    /// Correlation token echoed back by servers that support it.
    pub request_id: String,
}

/// Reply to an [`UpdateCheckRequest`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateCheckResponse {
    pub new_version: String,
    pub update_available: bool,
    #[serde(rename = "downloadURL", skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(rename = "request_id", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Operating system and CPU architecture, named as release manifests name them
/// (`linux`/`darwin`/`windows`, `amd64`/`arm64`/`arm`/`386`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn host() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Parses a version leniently: surrounding whitespace and a leading `v` are
/// ignored, and missing minor/patch components are zero-filled.
pub fn parse_version(input: &str) -> Result<semver::Version, UpdateError> {
    let trimmed = input.trim();
    let s = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let split = s.find(['-', '+']).unwrap_or(s.len());
    let (core, rest) = s.split_at(split);
    let padded = match core.matches('.').count() {
        0 => format!("{core}.0.0{rest}"),
        1 => format!("{core}.0{rest}"),
        _ => s.to_string(),
    };

    semver::Version::parse(&padded).map_err(|e| UpdateError::InvalidVersion {
        version: input.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_amd64() -> Platform {
        Platform {
            os: "linux".into(),
            arch: "amd64".into(),
        }
    }

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("1.2.0").unwrap(), semver::Version::new(1, 2, 0));
        assert_eq!(parse_version("v1.2").unwrap(), semver::Version::new(1, 2, 0));
        assert_eq!(parse_version(" 3 ").unwrap(), semver::Version::new(3, 0, 0));
        assert!(parse_version("1.2-rc.1").unwrap().pre.as_str() == "rc.1");
        assert!(parse_version("1.10.0").unwrap() > parse_version("1.9.0").unwrap());

        let err = parse_version("latest").unwrap_err();
        assert_eq!(err.as_label(), "update_invalid_version");
    }

    #[test]
    fn test_channel_filter() {
        let m = Manifest {
            channel: "Beta".into(),
            ..Manifest::default()
        };
        assert!(m.check("beta", &linux_amd64()).is_ok());
        assert!(matches!(
            m.check("stable", &linux_amd64()),
            Err(Incompatibility::Channel { .. })
        ));
        assert!(m.check("", &linux_amd64()).is_ok());
    }

    #[test]
    fn test_platform_filter() {
        let m = Manifest {
            os: "linux".into(),
            arch: "arm64".into(),
            ..Manifest::default()
        };
        let err = m.check("stable", &linux_amd64()).unwrap_err();
        assert_eq!(err.to_string(), "built for linux/arm64, host is linux/amd64");

        let any_arch = Manifest {
            os: "linux".into(),
            ..Manifest::default()
        };
        assert!(any_arch.check("stable", &linux_amd64()).is_ok());
    }

    #[test]
    fn test_response_wire_names() {
        let resp: UpdateCheckResponse = serde_json::from_str(
            r#"{"newVersion":"1.2.0","updateAvailable":true,"downloadURL":"http://x/a","checksum":"ab"}"#,
        )
        .unwrap();
        assert_eq!(resp.new_version, "1.2.0");
        assert!(resp.update_available);
        assert_eq!(resp.download_url.as_deref(), Some("http://x/a"));
        assert_eq!(resp.request_id, None);

        let req = serde_json::to_value(UpdateCheckRequest {
            current_version: "1.1.0".into(),
            request_id: "r1".into(),
        })
        .unwrap();
        assert_eq!(req["current_version"], "1.1.0");
    }

    #[test]
    fn test_empty_checksum_is_none() {
        let m = Manifest {
            sha256: Some("  ".into()),
            ..Manifest::default()
        };
        assert_eq!(m.checksum(), None);
    }
}
