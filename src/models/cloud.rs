//! Models for the SolarEdge monitoring API site inventory.
//!
//! The API is inconsistent about casing and field names between accounts and
//! firmware generations, so the wire types accept every variant seen in practice
//! and are flattened into [`CloudInventory`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CloudInventory {
    pub inverters: Vec<CloudInverter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudInverter {
    pub serial: String,
    pub name: Option<String>,
    pub model: Option<String>,
    pub status: Option<String>,
    pub connected_optimizers: Option<u32>,
}

impl CloudInventory {
    /// Optimizer counts keyed by serial. Serials with a `-XX` suffix are also
    /// reachable through their base part, which is what Modbus usually reports.
    pub fn optimizer_counts(&self) -> BTreeMap<String, u32> {
        let mut out = BTreeMap::new();
        for inv in &self.inverters {
            let Some(count) = inv.connected_optimizers else { continue };
            out.insert(inv.serial.clone(), count);
            if let Some((base, _)) = inv.serial.split_once('-')
                && !base.is_empty()
            {
                out.entry(base.to_string()).or_insert(count);
            }
        }
        out
    }
}

/// Look up a serial case-insensitively, falling back to the part before the first `-`.
pub fn lookup_by_serial<'a, T>(map: &'a BTreeMap<String, T>, serial: &str) -> Option<&'a T> {
    let wanted = serial.trim();
    let base = wanted.split('-').next().unwrap_or(wanted);
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
        .or_else(|| map.iter().find(|(k, _)| k.eq_ignore_ascii_case(base)))
        .or_else(|| {
            map.iter()
                .find(|(k, _)| k.split('-').next().is_some_and(|kb| kb.eq_ignore_ascii_case(base)))
        })
        .map(|(_, v)| v)
}

// =====================
// Wire format
// =====================

#[derive(Debug, Deserialize)]
pub(crate) struct InventoryResponse {
    #[serde(rename = "Inventory", alias = "inventory")]
    inventory: InventoryBody,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryBody {
    #[serde(rename = "inverters", alias = "Inverters", default)]
    inverters: Vec<WireInverter>,
}

#[derive(Debug, Deserialize)]
struct WireInverter {
    #[serde(rename = "serialNumber", alias = "SN", alias = "serial", default)]
    serial: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    status: WireStatus,
    #[serde(rename = "connectedOptimizers", default)]
    connected_optimizers: Option<u32>,
    #[serde(default)]
    optimizers: Option<Vec<Value>>,
}

/// Either `"status": "UP"` or `"status": {"status": "UP", ...}`.
#[derive(Debug, Default)]
struct WireStatus(Option<String>);

impl<'de> serde::Deserialize<'de> for WireStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;
        impl<'de> serde::de::Visitor<'de> for V {
            type Value = WireStatus;

            fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, "a status string or an object with a `status` field")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(WireStatus(Some(value.to_string())))
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(WireStatus(None))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut status = None;
                while let Some(key) = map.next_key::<String>()? {
                    if key == "status" {
                        status = map.next_value::<Option<String>>()?;
                    } else {
                        map.next_value::<serde::de::IgnoredAny>()?;
                    }
                }
                Ok(WireStatus(status))
            }
        }

        deserializer.deserialize_any(V)
    }
}

impl From<InventoryResponse> for CloudInventory {
    fn from(resp: InventoryResponse) -> Self {
        let inverters = resp
            .inventory
            .inverters
            .into_iter()
            .filter_map(|w| {
                let serial = w.serial.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())?;
                let connected_optimizers = w
                    .connected_optimizers
                    .or_else(|| w.optimizers.as_ref().map(|o| o.len() as u32));
                Some(CloudInverter {
                    serial,
                    name: w.name,
                    model: w.model,
                    status: w.status.0,
                    connected_optimizers,
                })
            })
            .collect();
        CloudInventory { inverters }
    }
}
