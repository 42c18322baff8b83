use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{Channel, ServiceClass};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueTier {
    Standard,
    Vip,
}

impl ValueTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueTier::Standard => "standard",
            ValueTier::Vip => "vip",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "vip" => ValueTier::Vip,
            _ => ValueTier::Standard,
        }
    }
}

/// Snapshot of a customer synced from the booking provider. The engine reads
/// visit history from here and never writes back to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub value_tier: ValueTier,
    pub preferred_channel: Option<Channel>,
    pub last_channel: Option<Channel>,
    pub last_visit_at: Option<NaiveDateTime>,
    pub visit_count: i64,
    pub typical_rebook_days: Option<i64>,
    pub most_common_service: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogService {
    pub name: String,
    pub class: ServiceClass,
    pub repeat_interval_days: Option<i64>,
    pub seasonal_months: Option<Vec<u32>>,
}

impl CatalogService {
    pub fn in_season(&self, month: u32) -> bool {
        self.seasonal_months
            .as_ref()
            .map(|months| months.contains(&month))
            .unwrap_or(false)
    }
}
