//! INDI protocol support for the skybridge observatory bridge.
//!
//! Three layers:
//! - [`property`]: the device and property data model (five element kinds,
//!   switch/light states, device category classification),
//! - [`wire`]: the incremental codec for the INDI message subset the bridge
//!   speaks,
//! - [`client`]: the async session that mirrors the server's device graph and
//!   submits property updates, consumed through the [`ProtocolClient`] trait.

pub mod client;
pub mod property;
pub mod wire;

pub use client::{IndiConfig, IndiError, IndiEvent, IndiSession, ProtocolClient};
pub use property::{
    BlobElement, Device, DeviceCategory, LightElement, NumberElement, Permission,
    PropertyElements, PropertyKind, PropertyState, PropertyVector, SwitchElement, SwitchState,
    TextElement,
};
pub use wire::{ElementUpdate, ServerMessage, VectorUpdate, WireReader};
