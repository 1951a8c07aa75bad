// Channel naming conventions and grouping of channels into monitored units
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Limit,
    Enable,
    Status,
    Output,
}

/// A channel name split into the unit prefix and its role suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    pub unit: String,
    pub role: Role,
}

/// Role suffixes appended to a unit prefix to form channel names.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SuffixConvention {
    pub limit: String,
    pub enable: String,
    pub status: String,
    pub output: String,
}

impl Default for SuffixConvention {
    fn default() -> Self {
        Self {
            limit: "_LIMIT".to_string(),
            enable: "_LIMEN".to_string(),
            status: "_SWSTAT".to_string(),
            output: "_OUTPUT".to_string(),
        }
    }
}

impl SuffixConvention {
    pub fn parse(&self, name: &str) -> Option<ChannelId> {
        [
            (&self.limit, Role::Limit),
            (&self.enable, Role::Enable),
            (&self.status, Role::Status),
            (&self.output, Role::Output),
        ]
        .into_iter()
        .find_map(|(suffix, role)| {
            name.strip_suffix(suffix.as_str())
                .filter(|unit| !unit.is_empty())
                .map(|unit| ChannelId {
                    unit: unit.to_string(),
                    role,
                })
        })
    }

    pub fn channel(&self, unit: &str, role: Role) -> String {
        let suffix = match role {
            Role::Limit => &self.limit,
            Role::Enable => &self.enable,
            Role::Status => &self.status,
            Role::Output => &self.output,
        };
        format!("{}{}", unit, suffix)
    }
}

/// Which companion channel gates a unit's limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Enable,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredUnit {
    pub unit: String,
    pub indicator: Indicator,
}

impl MonitoredUnit {
    /// Output, limit and gate channel names, in that order.
    pub fn channels(&self, convention: &SuffixConvention) -> [String; 3] {
        let gate = match self.indicator {
            Indicator::Enable => Role::Enable,
            Indicator::Status => Role::Status,
        };
        [
            convention.channel(&self.unit, Role::Output),
            convention.channel(&self.unit, Role::Limit),
            convention.channel(&self.unit, gate),
        ]
    }
}

/// Unit prefixes whose limit channel has a matching companion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitPairs {
    pub enable_paired: Vec<String>,
    pub status_paired: Vec<String>,
}

impl LimitPairs {
    pub fn len(&self) -> usize {
        self.enable_paired.len() + self.status_paired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn units(&self) -> Vec<MonitoredUnit> {
        let enable = self.enable_paired.iter().map(|unit| MonitoredUnit {
            unit: unit.clone(),
            indicator: Indicator::Enable,
        });
        let status = self.status_paired.iter().map(|unit| MonitoredUnit {
            unit: unit.clone(),
            indicator: Indicator::Status,
        });
        enable.chain(status).collect()
    }
}

fn is_skipped(name: &str, skip: &[String]) -> bool {
    skip.iter().any(|s| name.contains(s.as_str()))
}

/// Pairs every limit channel with its enable word, or failing that its status
/// word. Units with neither companion are left out; the two groups are
/// disjoint and sorted by unit prefix.
pub fn find_limit_channels(
    channels: &[String],
    skip: &[String],
    convention: &SuffixConvention,
) -> LimitPairs {
    let mut roles: BTreeMap<String, BTreeSet<Role>> = BTreeMap::new();
    for name in channels.iter().filter(|n| !is_skipped(n, skip)) {
        if let Some(id) = convention.parse(name) {
            if id.role != Role::Output {
                roles.entry(id.unit).or_default().insert(id.role);
            }
        }
    }

    let mut pairs = LimitPairs::default();
    for (unit, found) in roles {
        if !found.contains(&Role::Limit) {
            continue;
        }
        if found.contains(&Role::Enable) {
            pairs.enable_paired.push(unit);
        } else if found.contains(&Role::Status) {
            pairs.status_paired.push(unit);
        }
    }
    pairs
}

/// Naming of the overflow accumulators owned by a front-end controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverflowConvention {
    pub indicator_suffix: String,
    pub member_marker: String,
}

impl Default for OverflowConvention {
    fn default() -> Self {
        Self {
            indicator_suffix: "_ACCUM_OVERFLOW".to_string(),
            member_marker: "_ADC_OVERFLOW_".to_string(),
        }
    }
}

/// A front-end controller: one cumulative indicator and its member channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowUnit {
    pub unit: String,
    pub indicator: String,
    pub members: Vec<String>,
}

pub fn group_overflow_channels(
    channels: &[String],
    skip: &[String],
    convention: &OverflowConvention,
) -> Vec<OverflowUnit> {
    let mut indicators: BTreeMap<String, String> = BTreeMap::new();
    let mut members: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for name in channels.iter().filter(|n| !is_skipped(n, skip)) {
        if let Some(unit) = name.strip_suffix(convention.indicator_suffix.as_str()) {
            indicators.insert(unit.to_string(), name.clone());
        } else if let Some(pos) = name.find(convention.member_marker.as_str()) {
            members
                .entry(name[..pos].to_string())
                .or_default()
                .insert(name.clone());
        }
    }

    indicators
        .into_iter()
        .filter_map(|(unit, indicator)| {
            let members = members.remove(&unit)?;
            Some(OverflowUnit {
                unit,
                indicator,
                members: members.into_iter().collect(),
            })
        })
        .collect()
}
