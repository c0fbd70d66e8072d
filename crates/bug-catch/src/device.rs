// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Device, browser and OS snapshot attached to every event.

use crate::error::Error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameVersion {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device: String,
    pub browser: NameVersion,
    pub os: NameVersion,
}

impl DeviceInfo {
    pub fn lowercased(self) -> Self {
        Self {
            device: self.device.to_lowercase(),
            browser: NameVersion {
                name: self.browser.name.to_lowercase(),
                version: self.browser.version.to_lowercase(),
            },
            os: NameVersion {
                name: self.os.name.to_lowercase(),
                version: self.os.version.to_lowercase(),
            },
        }
    }
}

pub trait DeviceDetector: Send + Sync {
    fn detect(&self) -> Result<DeviceInfo, Error>;
}

/// Always reports the same snapshot.
#[derive(Debug, Clone)]
pub struct StaticDetector(pub DeviceInfo);

impl DeviceDetector for StaticDetector {
    fn detect(&self) -> Result<DeviceInfo, Error> {
        Ok(self.0.clone())
    }
}

/// Derives device kind, browser and OS from a user-agent string.
#[derive(Debug, Clone)]
pub struct UserAgentDetector {
    user_agent: String,
}

struct Patterns {
    browsers: Vec<(&'static str, Regex)>,
    os: Vec<(&'static str, Regex)>,
    devices: Vec<(&'static str, Regex)>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERNS.get_or_init(|| {
        let compile = |table: &[(&'static str, &str)]| -> Vec<(&'static str, Regex)> {
            table
                .iter()
                .map(|(name, re)| (*name, Regex::new(re).expect("user agent regex is valid")))
                .collect()
        };
        Patterns {
            // First match wins, so engines that embed other tokens go first.
            browsers: compile(&[
                ("edge", r"Edg(?:e|A|iOS)?/([\d.]+)"),
                ("opera", r"(?:OPR|Opera)/([\d.]+)"),
                ("samsung browser", r"SamsungBrowser/([\d.]+)"),
                ("firefox", r"(?:Firefox|FxiOS)/([\d.]+)"),
                ("chrome", r"(?:Chrome|CriOS)/([\d.]+)"),
                ("safari", r"Version/([\d.]+).*Safari/"),
            ]),
            os: compile(&[
                ("windows", r"Windows NT ([\d.]+)"),
                ("ios", r"(?:iPhone|iPad|iPod).*? OS ([\d_]+)"),
                ("android", r"Android ([\d.]+)"),
                ("mac os", r"Mac OS X ([\d_.]+)"),
                ("chrome os", r"CrOS \S+ ([\d.]+)"),
                ("linux", r"Linux()"),
            ]),
            devices: compile(&[
                ("smarttv", r"(?i)smart-?tv|googletv|appletv"),
                ("console", r"PlayStation|Xbox|Nintendo"),
                ("tablet", r"iPad|Tablet|Android(?:.*Mobile)?"),
                ("mobile", r"Mobi|iPhone|iPod"),
            ]),
        }
    })
}

fn windows_version(nt: &str) -> &str {
    match nt {
        "10.0" => "10",
        "6.3" => "8.1",
        "6.2" => "8",
        "6.1" => "7",
        "6.0" => "vista",
        "5.1" | "5.2" => "xp",
        other => other,
    }
}

impl UserAgentDetector {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    fn browser(&self) -> Option<NameVersion> {
        patterns().browsers.iter().find_map(|(name, re)| {
            re.captures(&self.user_agent).map(|caps| {
                let full = caps.get(1).map_or("", |m| m.as_str());
                NameVersion {
                    name: name.to_string(),
                    version: full.split('.').next().unwrap_or_default().to_string(),
                }
            })
        })
    }

    fn os(&self) -> Option<NameVersion> {
        patterns().os.iter().find_map(|(name, re)| {
            re.captures(&self.user_agent).map(|caps| {
                let raw = caps.get(1).map_or("", |m| m.as_str()).replace('_', ".");
                let version = if *name == "windows" {
                    windows_version(&raw).to_string()
                } else {
                    raw
                };
                NameVersion {
                    name: name.to_string(),
                    version,
                }
            })
        })
    }

    fn device(&self) -> &'static str {
        let ua = self.user_agent.as_str();
        for (kind, re) in &patterns().devices {
            if !re.is_match(ua) {
                continue;
            }
            // Android phones advertise "Mobile"; tablets do not.
            if *kind == "tablet" && ua.contains("Android") && ua.contains("Mobile") {
                return "mobile";
            }
            return kind;
        }
        "browser"
    }
}

impl DeviceDetector for UserAgentDetector {
    fn detect(&self) -> Result<DeviceInfo, Error> {
        let browser = self.browser().ok_or_else(|| {
            Error::DeviceDetection(format!("unrecognized browser in '{}'", self.user_agent))
        })?;
        let os = self.os().ok_or_else(|| {
            Error::DeviceDetection(format!("unrecognized OS in '{}'", self.user_agent))
        })?;
        Ok(DeviceInfo {
            device: self.device().to_string(),
            browser,
            os,
        })
    }
}
