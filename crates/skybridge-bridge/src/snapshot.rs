//! Snapshot codec and assembler.
//!
//! Walks every device the protocol client knows about and flattens their
//! property vectors into one nested JSON document grouped by device category
//! and display name:
//!
//! ```text
//! { CATEGORY: { DEVICE_NAME: { PROPERTY: { ELEMENT: value } } } }
//! ```
//!
//! The document is rebuilt from scratch on every polling cycle and discarded
//! after publish; nothing is retained across cycles.

use serde_json::{Map, Value};
use skybridge_indi::{Device, DeviceCategory, PropertyElements, PropertyVector};

/// Render one property vector into `{element_name: value}`.
///
/// Switches render as `"ON"`/`"OFF"`, lights as their state label, numbers
/// as raw JSON numbers, text verbatim, BLOBs as `<blob N bytes>` (payload
/// bytes are never included).
fn render_property(vector: &PropertyVector) -> Value {
    let mut map = Map::new();
    match &vector.elements {
        PropertyElements::Text(items) => {
            for item in items {
                map.insert(item.name.clone(), Value::String(item.value.clone()));
            }
        }
        PropertyElements::Number(items) => {
            for item in items {
                map.insert(item.name.clone(), number_value(item.value));
            }
        }
        PropertyElements::Switch(items) => {
            for item in items {
                map.insert(item.name.clone(), Value::String(item.state.to_string()));
            }
        }
        PropertyElements::Light(items) => {
            for item in items {
                map.insert(item.name.clone(), Value::String(item.state.to_string()));
            }
        }
        PropertyElements::Blob(items) => {
            for item in items {
                map.insert(
                    item.name.clone(),
                    Value::String(format!("<blob {} bytes>", item.size)),
                );
            }
        }
    }
    Value::Object(map)
}

/// Raw numeric rendering; non-finite values degrade to null.
fn number_value(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Render one device into `{property_name: {element_name: value}}`.
///
/// Properties without elements contribute nothing; a device without any
/// renderable property yields an empty mapping.
pub fn device_document(device: &Device) -> Value {
    let mut map = Map::new();
    for (name, vector) in &device.properties {
        if vector.elements.is_empty() {
            continue;
        }
        map.insert(name.clone(), render_property(vector));
    }
    Value::Object(map)
}

/// Assemble the full snapshot document from the current device list.
///
/// Every device lands under exactly one category (first matching interface
/// bit); devices sharing a category merge as sibling keys.
pub fn assemble(devices: &[Device], zero_interface_is_general: bool) -> Value {
    let mut document = Map::new();
    for device in devices {
        let category = DeviceCategory::classify(device.interface, zero_interface_is_general);
        let entry = document
            .entry(category.as_str().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(members) = entry {
            members.insert(device.display_name(), device_document(device));
        }
    }
    Value::Object(document)
}
