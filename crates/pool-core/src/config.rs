//! Layered service configuration.
//!
//! A config source holds top-level defaults and an optional, ordered
//! `services` table. [`resolve`] merges defaults, the selected service and
//! command-line overrides (lowest to highest precedence) into the one
//! [`EffectiveConfig`] a [`crate::Service`] is built from.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{BackendKind, Error, Result};

/// Settings recognized at the top level and inside each service entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceSettings {
    pub url: Option<String>,
    pub user: Option<String>,
    pub token: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub vmpooler_fallback: Option<String>,
    /// Request priority, only meaningful for abs.
    pub priority: Option<i64>,
    /// Backend-specific keys passed through untouched.
    #[serde(flatten)]
    pub extra: Extra,
}

impl ServiceSettings {
    /// Layer `top` over `self`: every field `top` sets wins.
    pub fn overlay(&self, top: &ServiceSettings) -> ServiceSettings {
        let mut extra = self.extra.clone();
        extra.0.extend(top.extra.0.clone());

        ServiceSettings {
            url: top.url.clone().or_else(|| self.url.clone()),
            user: top.user.clone().or_else(|| self.user.clone()),
            token: top.token.clone().or_else(|| self.token.clone()),
            kind: top.kind.clone().or_else(|| self.kind.clone()),
            vmpooler_fallback: top
                .vmpooler_fallback
                .clone()
                .or_else(|| self.vmpooler_fallback.clone()),
            priority: top.priority.or(self.priority),
            extra,
        }
    }
}

/// Scalar pass-through keys, stringified. Nested tables are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extra(pub BTreeMap<String, String>);

impl<'de> Deserialize<'de> for Extra {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Scalar {
            Str(String),
            Int(i64),
            Float(f64),
            Bool(bool),
            Other(IgnoredAny),
        }

        let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
        let values = raw
            .into_iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    Scalar::Str(s) => s,
                    Scalar::Int(i) => i.to_string(),
                    Scalar::Float(f) => f.to_string(),
                    Scalar::Bool(b) => b.to_string(),
                    Scalar::Other(_) => return None,
                };
                Some((key, value))
            })
            .collect();
        Ok(Extra(values))
    }
}

/// The parsed configuration source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GlobalConfig {
    #[serde(default, deserialize_with = "ordered_services")]
    pub services: Option<Vec<(String, ServiceSettings)>>,
    #[serde(flatten)]
    pub defaults: ServiceSettings,
}

impl GlobalConfig {
    pub fn new(defaults: ServiceSettings) -> Self {
        Self {
            services: None,
            defaults,
        }
    }

    /// Append a service entry, keeping declaration order.
    pub fn with_service(mut self, name: impl Into<String>, settings: ServiceSettings) -> Self {
        self.services
            .get_or_insert_with(Vec::new)
            .push((name.into(), settings));
        self
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSettings> {
        self.services
            .as_ref()?
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services
            .iter()
            .flatten()
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

/// Keep the `services` table in declaration order: the first entry is the
/// default service.
fn ordered_services<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Vec<(String, ServiceSettings)>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Ordered;

    impl<'de> Visitor<'de> for Ordered {
        type Value = Vec<(String, ServiceSettings)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a table of named services")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
            let mut services = Vec::new();
            while let Some((name, settings)) = map.next_entry::<String, ServiceSettings>()? {
                services.push((name, settings));
            }
            Ok(services)
        }
    }

    deserializer.deserialize_map(Ordered).map(Some)
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub service: Option<String>,
    pub url: Option<String>,
    pub user: Option<String>,
    pub token: Option<String>,
    pub priority: Option<i64>,
}

impl CliOverrides {
    fn as_settings(&self) -> ServiceSettings {
        ServiceSettings {
            url: self.url.clone(),
            user: self.user.clone(),
            token: self.token.clone(),
            priority: self.priority,
            ..Default::default()
        }
    }
}

/// The merged configuration for one backend connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    /// Name of the selected service entry, if any.
    pub service: Option<String>,
    pub url: Option<String>,
    pub user: Option<String>,
    pub token: Option<String>,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub vmpooler_fallback: Option<String>,
    pub priority: Option<i64>,
    pub extra: BTreeMap<String, String>,
}

impl EffectiveConfig {
    fn from_settings(service: Option<String>, settings: ServiceSettings) -> Result<Self> {
        Ok(Self {
            service,
            kind: BackendKind::from_config(settings.kind.as_deref())?,
            url: settings.url,
            user: settings.user,
            token: settings.token,
            vmpooler_fallback: settings.vmpooler_fallback,
            priority: settings.priority,
            extra: settings.extra.0,
        })
    }
}

/// Merge defaults, the selected service and CLI overrides.
///
/// The service is the one named on the command line, or the first declared
/// one. Without a `services` table the `service` override is ignored.
pub fn resolve(global: &GlobalConfig, cli: &CliOverrides) -> Result<EffectiveConfig> {
    let mut settings = global.defaults.clone();
    let mut name = None;

    if let Some(services) = &global.services {
        let selected = match &cli.service {
            Some(wanted) => Some(services.iter().find(|(n, _)| n == wanted).ok_or_else(|| {
                Error::Configuration(format!("service '{wanted}' is not configured"))
            })?),
            None => services.first(),
        };

        if let Some((service_name, service)) = selected {
            tracing::debug!(service = %service_name, "using configured service");
            settings = settings.overlay(service);
            name = Some(service_name.clone());
        }
    }

    let settings = settings.overlay(&cli.as_settings());
    EffectiveConfig::from_settings(name, settings)
}

/// Config for the vmpooler service an abs service falls back to when
/// enriching host details.
///
/// Top-level `url`, `user` and `token` act as defaults; the `type` is always
/// vmpooler.
pub fn vmpooler_fallback(global: &GlobalConfig, fallback: Option<&str>) -> Result<EffectiveConfig> {
    let Some(name) = fallback else {
        return Err(Error::Configuration(
            "vmpooler_fallback not configured: the abs service needs a 'vmpooler_fallback' key \
             naming a configured vmpooler service"
                .into(),
        ));
    };

    let entry = global
        .service(name)
        .filter(|s| s.url.is_some())
        .ok_or_else(|| {
            Error::Configuration(format!(
                "vmpooler_fallback '{name}' is not configured: add a service named '{name}' with a url"
            ))
        })?;

    let defaults = ServiceSettings {
        url: global.defaults.url.clone(),
        user: global.defaults.user.clone(),
        token: global.defaults.token.clone(),
        ..Default::default()
    };
    let mut settings = defaults.overlay(entry);
    settings.kind = None;
    settings.vmpooler_fallback = None;

    EffectiveConfig::from_settings(Some(name.to_string()), settings)
}
