use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::known_device::KnownDevice;

/// A user-defined rule that raises an alert when any device in a batch
/// satisfies its filter.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct RadarProfile {
    /// Assigned by the store; `None` until persisted.
    pub id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub filter: Filter,
}

impl RadarProfile {
    #[must_use]
    pub fn new(name: impl Into<String>, filter: Filter) -> RadarProfile {
        RadarProfile {
            id: None,
            name: name.into(),
            description: None,
            enabled: true,
            filter,
        }
    }
}

/// Boolean expression tree over device attributes.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Substring match on the advertised or custom name.
    Name { name: String, ignore_case: bool },
    NamePattern { pattern: String },
    Address { address: String },
    AddressPattern { pattern: String },
    MinRssi { rssi: i16 },
    Manufacturer { id: u16 },
    IsFavorite { favorite: bool },
    Tag { tag: String },
    ServiceUuid { uuid: String },
    IsPaired { paired: bool },
    FirstDetectionInterval { from: DateTime<Utc>, to: DateTime<Utc> },
    LastDetectionInterval { from: DateTime<Utc>, to: DateTime<Utc> },
    /// The device was out of sight for at least this long before its latest
    /// sighting. Never matches a first sighting.
    MinLostTime { millis: i64 },
    AnyOf { filters: Vec<Filter> },
    AllOf { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn matches(&self, device: &KnownDevice) -> bool {
        use Filter::{
            Address, AddressPattern, AllOf, AnyOf, FirstDetectionInterval, IsFavorite, IsPaired,
            LastDetectionInterval, Manufacturer, MinLostTime, MinRssi, Name, NamePattern, Not,
            ServiceUuid, Tag,
        };
        match self {
            Name { name, ignore_case } => [device.name.as_deref(), device.custom_name.as_deref()]
                .into_iter()
                .flatten()
                .any(|candidate| contains(candidate, name, *ignore_case)),
            NamePattern { pattern } => [device.name.as_deref(), device.custom_name.as_deref()]
                .into_iter()
                .flatten()
                .any(|candidate| regex_matches(candidate, pattern)),
            Address { address } => device.address.eq_ignore_ascii_case(address),
            AddressPattern { pattern } => regex_matches(&device.address, pattern),
            MinRssi { rssi } => device.rssi >= *rssi,
            Manufacturer { id } => device.manufacturer_id == Some(*id),
            IsFavorite { favorite } => device.favorite == *favorite,
            Tag { tag } => device.tags.contains(tag),
            ServiceUuid { uuid } => device
                .service_uuids
                .iter()
                .any(|known| known.eq_ignore_ascii_case(uuid)),
            IsPaired { paired } => device.is_paired == *paired,
            FirstDetectionInterval { from, to } => {
                *from <= device.first_seen && device.first_seen <= *to
            }
            LastDetectionInterval { from, to } => {
                *from <= device.last_seen && device.last_seen <= *to
            }
            MinLostTime { millis } => device.previous_seen.is_some_and(|previous| {
                device.last_seen - previous >= Duration::milliseconds(*millis)
            }),
            AnyOf { filters } => filters.iter().any(|filter| filter.matches(device)),
            AllOf { filters } => filters.iter().all(|filter| filter.matches(device)),
            Not { filter } => !filter.matches(device),
        }
    }

    /// Compiles every pattern once, for matching many devices. An invalid
    /// pattern is reported here and then never matches.
    pub fn compile(&self) -> CompiledFilter {
        CompiledFilter(Node::from(self))
    }
}

/// A [Filter] with its regular expressions built ahead of matching.
#[derive(Debug, Clone)]
pub struct CompiledFilter(Node);

impl CompiledFilter {
    pub fn matches(&self, device: &KnownDevice) -> bool {
        self.0.matches(device)
    }
}

#[derive(Debug, Clone)]
enum Node {
    /// A filter without patterns or children.
    Plain(Filter),
    NamePattern(Option<Regex>),
    AddressPattern(Option<Regex>),
    AnyOf(Vec<Node>),
    AllOf(Vec<Node>),
    Not(Box<Node>),
}

impl From<&Filter> for Node {
    fn from(filter: &Filter) -> Self {
        match filter {
            Filter::NamePattern { pattern } => Node::NamePattern(compile_pattern(pattern)),
            Filter::AddressPattern { pattern } => Node::AddressPattern(compile_pattern(pattern)),
            Filter::AnyOf { filters } => Node::AnyOf(filters.iter().map(Node::from).collect()),
            Filter::AllOf { filters } => Node::AllOf(filters.iter().map(Node::from).collect()),
            Filter::Not { filter } => Node::Not(Box::new(Node::from(filter.as_ref()))),
            plain => Node::Plain(plain.clone()),
        }
    }
}

impl Node {
    fn matches(&self, device: &KnownDevice) -> bool {
        match self {
            Node::Plain(filter) => filter.matches(device),
            Node::NamePattern(regex) => regex.as_ref().is_some_and(|regex| {
                [device.name.as_deref(), device.custom_name.as_deref()]
                    .into_iter()
                    .flatten()
                    .any(|candidate| regex.is_match(candidate))
            }),
            Node::AddressPattern(regex) => regex
                .as_ref()
                .is_some_and(|regex| regex.is_match(&device.address)),
            Node::AnyOf(nodes) => nodes.iter().any(|node| node.matches(device)),
            Node::AllOf(nodes) => nodes.iter().all(|node| node.matches(device)),
            Node::Not(node) => !node.matches(device),
        }
    }
}

fn contains(candidate: &str, needle: &str, ignore_case: bool) -> bool {
    if ignore_case {
        candidate.to_lowercase().contains(&needle.to_lowercase())
    } else {
        candidate.contains(needle)
    }
}

/// An invalid pattern never matches.
fn regex_matches(candidate: &str, pattern: &str) -> bool {
    compile_pattern(pattern).is_some_and(|regex| regex.is_match(candidate))
}

fn compile_pattern(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Ignoring invalid filter pattern {pattern:?}: {e}");
            None
        }
    }
}

/// One trigger of a profile: which devices matched and when.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct ProfileDetectEvent {
    pub id: Option<i64>,
    pub profile_id: i64,
    pub trigger_time: DateTime<Utc>,
    pub device_addresses: Vec<String>,
}

impl ProfileDetectEvent {
    #[must_use]
    pub fn new(profile_id: i64, trigger_time: DateTime<Utc>, device_addresses: Vec<String>) -> Self {
        ProfileDetectEvent {
            id: None,
            profile_id,
            trigger_time,
            device_addresses,
        }
    }
}
