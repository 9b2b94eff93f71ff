//! INDI device and property data model.
//!
//! Devices expose named property vectors; each vector holds an ordered list
//! of elements of exactly one kind (text, number, switch, light or BLOB).
//! The model is a closed tagged enum over those five kinds, so every consumer
//! dispatches with a `match` instead of runtime type inspection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// State of a single switch element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    /// Parse the wire spelling (`On` / `Off`, whitespace and case tolerated).
    pub fn from_wire(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    /// The spelling used in outbound protocol messages.
    pub fn wire_value(&self) -> &'static str {
        match self {
            Self::On => "On",
            Self::Off => "Off",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }
}

impl std::fmt::Display for SwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::On => write!(f, "ON"),
            Self::Off => write!(f, "OFF"),
        }
    }
}

/// State of a property vector or a light element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    pub fn from_wire(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "ok" => Some(Self::Ok),
            "busy" => Some(Self::Busy),
            "alert" => Some(Self::Alert),
            _ => None,
        }
    }

    pub fn wire_value(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Ok => "Ok",
            Self::Busy => "Busy",
            Self::Alert => "Alert",
        }
    }
}

impl std::fmt::Display for PropertyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Ok => write!(f, "OK"),
            Self::Busy => write!(f, "BUSY"),
            Self::Alert => write!(f, "ALERT"),
        }
    }
}

/// Access permission advertised for a property vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Permission {
    pub fn from_wire(text: &str) -> Option<Self> {
        match text.trim() {
            "ro" => Some(Self::ReadOnly),
            "wo" => Some(Self::WriteOnly),
            "rw" => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

/// Text element: name to string value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextElement {
    pub name: String,
    pub label: Option<String>,
    pub value: String,
}

/// Number element: name to floating-point value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberElement {
    pub name: String,
    pub label: Option<String>,
    pub value: f64,
}

/// Switch element: name to On/Off state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchElement {
    pub name: String,
    pub label: Option<String>,
    pub state: SwitchState,
}

/// Light element: a read-only indicator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightElement {
    pub name: String,
    pub label: Option<String>,
    pub state: PropertyState,
}

/// BLOB element. Only the advertised byte length is retained; payloads are
/// never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobElement {
    pub name: String,
    pub label: Option<String>,
    pub size: usize,
}

/// Discriminant of the five property kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Number => write!(f, "number"),
            Self::Switch => write!(f, "switch"),
            Self::Light => write!(f, "light"),
            Self::Blob => write!(f, "blob"),
        }
    }
}

/// The elements of one property vector, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyElements {
    Text(Vec<TextElement>),
    Number(Vec<NumberElement>),
    Switch(Vec<SwitchElement>),
    Light(Vec<LightElement>),
    Blob(Vec<BlobElement>),
}

impl PropertyElements {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Text(_) => PropertyKind::Text,
            Self::Number(_) => PropertyKind::Number,
            Self::Switch(_) => PropertyKind::Switch,
            Self::Light(_) => PropertyKind::Light,
            Self::Blob(_) => PropertyKind::Blob,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(items) => items.len(),
            Self::Number(items) => items.len(),
            Self::Switch(items) => items.len(),
            Self::Light(items) => items.len(),
            Self::Blob(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named, typed, ordered group of elements belonging to one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyVector {
    pub device: String,
    pub name: String,
    pub label: Option<String>,
    pub group: Option<String>,
    pub state: PropertyState,
    pub perm: Permission,
    pub elements: PropertyElements,
}

impl PropertyVector {
    pub fn kind(&self) -> PropertyKind {
        self.elements.kind()
    }

    pub fn switches(&self) -> Option<&[SwitchElement]> {
        match &self.elements {
            PropertyElements::Switch(items) => Some(items),
            _ => None,
        }
    }

    pub fn numbers(&self) -> Option<&[NumberElement]> {
        match &self.elements {
            PropertyElements::Number(items) => Some(items),
            _ => None,
        }
    }

    /// Set one switch element by index. Returns false when the vector is not
    /// a switch vector or the index is out of range.
    pub fn set_switch(&mut self, index: usize, state: SwitchState) -> bool {
        match &mut self.elements {
            PropertyElements::Switch(items) => match items.get_mut(index) {
                Some(item) => {
                    item.state = state;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Turn exactly one switch element on and every other element off, for
    /// one-of-many selector vectors. Returns false when the vector is not a
    /// switch vector or the index is out of range.
    pub fn set_exclusive_switch(&mut self, index: usize) -> bool {
        match &mut self.elements {
            PropertyElements::Switch(items) => {
                if index >= items.len() {
                    return false;
                }
                for (i, item) in items.iter_mut().enumerate() {
                    item.state = if i == index {
                        SwitchState::On
                    } else {
                        SwitchState::Off
                    };
                }
                true
            }
            _ => false,
        }
    }

    /// Set one number element by index. Returns false when the vector is not
    /// a number vector or the index is out of range.
    pub fn set_number(&mut self, index: usize, value: f64) -> bool {
        match &mut self.elements {
            PropertyElements::Number(items) => match items.get_mut(index) {
                Some(item) => {
                    item.value = value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

/// One device as the INDI server currently describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    /// Driver interface bitmask, as reported by `DRIVER_INFO.DRIVER_INTERFACE`.
    pub interface: u32,
    pub properties: BTreeMap<String, PropertyVector>,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interface: 0,
            properties: BTreeMap::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyVector> {
        self.properties.get(name)
    }

    /// The key the device appears under in the snapshot document: whitespace
    /// runs collapsed to single underscores, upper-cased.
    pub fn display_name(&self) -> String {
        self.name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_uppercase()
    }
}

/// Coarse device class derived from the driver interface bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCategory {
    General,
    Telescope,
    Ccd,
    Guider,
    Focuser,
    Filter,
    Dome,
    Gps,
    Weather,
    Ao,
    DustCap,
    LightBox,
    Detector,
    Rotator,
    Spectrograph,
    Aux,
    Unknown,
}

/// Classification table, tested in order with the first set bit winning.
/// The GENERAL entry carries a zero mask and can never match; an all-zero
/// mask therefore resolves to UNKNOWN unless `classify` is told otherwise.
const INTERFACE_TABLE: &[(u32, DeviceCategory)] = &[
    (0, DeviceCategory::General),
    (1 << 0, DeviceCategory::Telescope),
    (1 << 1, DeviceCategory::Ccd),
    (1 << 2, DeviceCategory::Guider),
    (1 << 3, DeviceCategory::Focuser),
    (1 << 4, DeviceCategory::Filter),
    (1 << 5, DeviceCategory::Dome),
    (1 << 6, DeviceCategory::Gps),
    (1 << 7, DeviceCategory::Weather),
    (1 << 8, DeviceCategory::Ao),
    (1 << 9, DeviceCategory::DustCap),
    (1 << 10, DeviceCategory::LightBox),
    (1 << 11, DeviceCategory::Detector),
    (1 << 12, DeviceCategory::Rotator),
    (1 << 13, DeviceCategory::Spectrograph),
    (1 << 15, DeviceCategory::Aux),
];

impl DeviceCategory {
    /// Resolve a driver interface bitmask to its category.
    ///
    /// `zero_is_general` maps an all-zero mask to GENERAL instead of UNKNOWN.
    /// Off by default, so GENERAL is unreachable.
    pub fn classify(interface: u32, zero_is_general: bool) -> Self {
        for &(bits, category) in INTERFACE_TABLE {
            if interface & bits != 0 {
                return category;
            }
        }
        if interface == 0 && zero_is_general {
            DeviceCategory::General
        } else {
            DeviceCategory::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::Telescope => "TELESCOPE",
            Self::Ccd => "CCD",
            Self::Guider => "GUIDER",
            Self::Focuser => "FOCUSER",
            Self::Filter => "FILTER",
            Self::Dome => "DOME",
            Self::Gps => "GPS",
            Self::Weather => "WEATHER",
            Self::Ao => "AO",
            Self::DustCap => "DUSTCAP",
            Self::LightBox => "LIGHTBOX",
            Self::Detector => "DETECTOR",
            Self::Rotator => "ROTATOR",
            Self::Spectrograph => "SPECTROGRAPH",
            Self::Aux => "AUX",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
