//! Wire codec for the INDI control protocol subset the bridge speaks.
//!
//! INDI traffic is a stream of small, flat XML elements over TCP. Inbound we
//! care about property definitions (`def*Vector`), updates (`set*Vector`),
//! removals (`delProperty`) and server log lines (`message`); outbound we emit
//! the `getProperties` handshake and `new*Vector` submissions. Framing is
//! incremental: bytes are buffered until a complete top-level element has
//! arrived, and anything unrecognized is consumed and dropped rather than
//! treated as an error.

use crate::property::{
    BlobElement, LightElement, NumberElement, Permission, PropertyElements, PropertyState,
    PropertyVector, SwitchElement, SwitchState, TextElement,
};

/// A message received from the INDI server.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Property definition. Implies the device itself on first sight.
    Define(PropertyVector),
    /// Property update: new element values plus an optional vector state.
    Update(VectorUpdate),
    /// Drop one property, or the whole device when `property` is `None`.
    Delete {
        device: String,
        property: Option<String>,
    },
    /// Free-form server log line.
    Message {
        device: Option<String>,
        text: String,
    },
}

/// Payload of a `set*Vector` message.
#[derive(Debug, Clone)]
pub struct VectorUpdate {
    pub device: String,
    pub name: String,
    pub state: Option<PropertyState>,
    pub elements: Vec<ElementUpdate>,
}

/// One element value inside a `set*Vector`.
#[derive(Debug, Clone)]
pub enum ElementUpdate {
    Text { name: String, value: String },
    Number { name: String, value: f64 },
    Switch { name: String, state: SwitchState },
    Light { name: String, state: PropertyState },
    /// BLOB bodies are skipped wholesale; only the advertised size is kept.
    Blob { name: String, size: usize },
}

/// Incremental reader turning the TCP byte stream into [`ServerMessage`]s.
#[derive(Debug, Default)]
pub struct WireReader {
    buf: Vec<u8>,
}

impl WireReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete message, if one has fully arrived. Unrecognized
    /// or malformed elements are consumed and skipped.
    pub fn next_message(&mut self) -> Option<ServerMessage> {
        loop {
            let frame = self.take_frame()?;
            let text = String::from_utf8_lossy(&frame).into_owned();
            if let Some(message) = parse_frame(&text) {
                return Some(message);
            }
        }
    }

    /// Extract the next complete top-level element from the buffer, or None
    /// when more bytes are needed.
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let start = self.buf.iter().position(|&b| b == b'<')?;
        if start > 0 {
            self.buf.drain(..start);
        }
        if self.buf.len() < 2 {
            return None;
        }

        // Prolog or comment: consume through the next '>' and let the parser
        // drop it.
        if self.buf[1] == b'?' || self.buf[1] == b'!' {
            let end = self.buf.iter().position(|&b| b == b'>')?;
            return Some(self.buf.drain(..=end).collect());
        }

        // Tag name runs until whitespace, '/' or '>'.
        let mut name_end = None;
        for (i, &b) in self.buf.iter().enumerate().skip(1) {
            if b.is_ascii_whitespace() || b == b'/' || b == b'>' {
                name_end = Some(i);
                break;
            }
        }
        let name_end = name_end?;
        let name = self.buf[1..name_end].to_vec();

        // End of the opening tag, honoring quoted attribute values.
        let mut quote: Option<u8> = None;
        let mut open_end = None;
        let mut self_closing = false;
        for (i, &b) in self.buf.iter().enumerate().skip(name_end) {
            match quote {
                Some(q) => {
                    if b == q {
                        quote = None;
                    }
                }
                None => match b {
                    b'"' | b'\'' => quote = Some(b),
                    b'>' => {
                        self_closing = self.buf[i - 1] == b'/';
                        open_end = Some(i);
                        break;
                    }
                    _ => {}
                },
            }
        }
        let open_end = open_end?;

        if self_closing {
            return Some(self.buf.drain(..=open_end).collect());
        }

        // Content runs until the matching close tag. INDI never nests an
        // element inside one of the same name, so the first occurrence is the
        // match; escaped text cannot contain a raw '<'.
        let mut close = Vec::with_capacity(name.len() + 3);
        close.extend_from_slice(b"</");
        close.extend_from_slice(&name);
        close.push(b'>');
        let pos = find_subsequence(&self.buf[open_end..], &close)?;
        let end = open_end + pos + close.len();
        Some(self.buf.drain(..end).collect())
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_frame(text: &str) -> Option<ServerMessage> {
    let (element, _) = Element::parse(text)?;
    element.into_message()
}

/// One parsed XML element: attributes plus either text content or children.
#[derive(Debug)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn parse(input: &str) -> Option<(Element, &str)> {
        let rest = input.trim_start().strip_prefix('<')?;
        let name_len = rest.find(|c: char| c.is_whitespace() || c == '>' || c == '/')?;
        let name = &rest[..name_len];
        if name.is_empty() {
            return None;
        }
        let mut rest = &rest[name_len..];

        let mut attrs = Vec::new();
        loop {
            rest = rest.trim_start();
            if let Some(after) = rest.strip_prefix("/>") {
                let element = Element {
                    name: name.to_string(),
                    attrs,
                    text: String::new(),
                    children: Vec::new(),
                };
                return Some((element, after));
            }
            if let Some(after) = rest.strip_prefix('>') {
                rest = after;
                break;
            }
            let eq = rest.find('=')?;
            let attr_name = rest[..eq].trim().to_string();
            rest = rest[eq + 1..].trim_start();
            let quote = rest.chars().next().filter(|&c| c == '"' || c == '\'')?;
            rest = &rest[1..];
            let end = rest.find(quote)?;
            attrs.push((attr_name, unescape(&rest[..end])));
            rest = &rest[end + 1..];
        }

        let mut text = String::new();
        let mut children = Vec::new();
        loop {
            rest = rest.trim_start();
            if let Some(after) = rest.strip_prefix("</") {
                let after = after.strip_prefix(name)?;
                let after = after.trim_start().strip_prefix('>')?;
                let element = Element {
                    name: name.to_string(),
                    attrs,
                    text: unescape(text.trim()),
                    children,
                };
                return Some((element, after));
            }
            if rest.starts_with('<') {
                let (child, after) = Self::parse(rest)?;
                children.push(child);
                rest = after;
            } else {
                let end = rest.find('<')?;
                text.push_str(&rest[..end]);
                rest = &rest[end..];
            }
        }
    }

    fn into_message(self) -> Option<ServerMessage> {
        match self.name.as_str() {
            "defTextVector" | "defNumberVector" | "defSwitchVector" | "defLightVector"
            | "defBLOBVector" => self.into_define(),
            "setTextVector" | "setNumberVector" | "setSwitchVector" | "setLightVector"
            | "setBLOBVector" => self.into_update(),
            "delProperty" => {
                let device = self.attr("device")?.to_string();
                let property = self.attr("name").map(str::to_string);
                Some(ServerMessage::Delete { device, property })
            }
            "message" => {
                let device = self.attr("device").map(str::to_string);
                let text = self.attr("message")?.to_string();
                Some(ServerMessage::Message { device, text })
            }
            _ => None,
        }
    }

    fn into_define(self) -> Option<ServerMessage> {
        let device = self.attr("device")?.to_string();
        let name = self.attr("name")?.to_string();
        let label = self.attr("label").map(str::to_string);
        let group = self.attr("group").map(str::to_string);
        let state = self
            .attr("state")
            .and_then(PropertyState::from_wire)
            .unwrap_or(PropertyState::Idle);
        let perm = self
            .attr("perm")
            .and_then(Permission::from_wire)
            .unwrap_or(Permission::ReadOnly);

        let elements = match self.name.as_str() {
            "defTextVector" => PropertyElements::Text(
                self.children
                    .iter()
                    .filter(|c| c.name == "defText")
                    .filter_map(|c| {
                        Some(TextElement {
                            name: c.attr("name")?.to_string(),
                            label: c.attr("label").map(str::to_string),
                            value: c.text.clone(),
                        })
                    })
                    .collect(),
            ),
            "defNumberVector" => PropertyElements::Number(
                self.children
                    .iter()
                    .filter(|c| c.name == "defNumber")
                    .filter_map(|c| {
                        Some(NumberElement {
                            name: c.attr("name")?.to_string(),
                            label: c.attr("label").map(str::to_string),
                            value: parse_number(&c.text)?,
                        })
                    })
                    .collect(),
            ),
            "defSwitchVector" => PropertyElements::Switch(
                self.children
                    .iter()
                    .filter(|c| c.name == "defSwitch")
                    .filter_map(|c| {
                        Some(SwitchElement {
                            name: c.attr("name")?.to_string(),
                            label: c.attr("label").map(str::to_string),
                            state: SwitchState::from_wire(&c.text)?,
                        })
                    })
                    .collect(),
            ),
            "defLightVector" => PropertyElements::Light(
                self.children
                    .iter()
                    .filter(|c| c.name == "defLight")
                    .filter_map(|c| {
                        Some(LightElement {
                            name: c.attr("name")?.to_string(),
                            label: c.attr("label").map(str::to_string),
                            state: PropertyState::from_wire(&c.text)?,
                        })
                    })
                    .collect(),
            ),
            "defBLOBVector" => PropertyElements::Blob(
                self.children
                    .iter()
                    .filter(|c| c.name == "defBLOB")
                    .filter_map(|c| {
                        Some(BlobElement {
                            name: c.attr("name")?.to_string(),
                            label: c.attr("label").map(str::to_string),
                            size: 0,
                        })
                    })
                    .collect(),
            ),
            _ => return None,
        };

        Some(ServerMessage::Define(PropertyVector {
            device,
            name,
            label,
            group,
            state,
            perm,
            elements,
        }))
    }

    fn into_update(self) -> Option<ServerMessage> {
        let device = self.attr("device")?.to_string();
        let name = self.attr("name")?.to_string();
        let state = self.attr("state").and_then(PropertyState::from_wire);
        let elements = self
            .children
            .iter()
            .filter_map(|c| match c.name.as_str() {
                "oneText" => Some(ElementUpdate::Text {
                    name: c.attr("name")?.to_string(),
                    value: c.text.clone(),
                }),
                "oneNumber" => Some(ElementUpdate::Number {
                    name: c.attr("name")?.to_string(),
                    value: parse_number(&c.text)?,
                }),
                "oneSwitch" => Some(ElementUpdate::Switch {
                    name: c.attr("name")?.to_string(),
                    state: SwitchState::from_wire(&c.text)?,
                }),
                "oneLight" => Some(ElementUpdate::Light {
                    name: c.attr("name")?.to_string(),
                    state: PropertyState::from_wire(&c.text)?,
                }),
                "oneBLOB" => Some(ElementUpdate::Blob {
                    name: c.attr("name")?.to_string(),
                    size: c.attr("size").and_then(|s| s.trim().parse().ok()).unwrap_or(0),
                }),
                _ => None,
            })
            .collect();

        Some(ServerMessage::Update(VectorUpdate {
            device,
            name,
            state,
            elements,
        }))
    }
}

/// Parse an INDI number body: plain decimal, or sexagesimal `D:M:S` / `D M S`.
fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(value) = text.parse::<f64>() {
        return Some(value);
    }
    let mut parts = text.split([':', ' ']).filter(|p| !p.is_empty());
    let degrees: f64 = parts.next()?.parse().ok()?;
    let sign = if degrees.is_sign_negative() { -1.0 } else { 1.0 };
    let mut value = degrees.abs();
    let mut scale = 60.0;
    for part in parts {
        value += part.parse::<f64>().ok()? / scale;
        scale *= 60.0;
    }
    Some(sign * value)
}

fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let (replacement, advance) = if rest.starts_with("&amp;") {
            ("&", 5)
        } else if rest.starts_with("&lt;") {
            ("<", 4)
        } else if rest.starts_with("&gt;") {
            (">", 4)
        } else if rest.starts_with("&quot;") {
            ("\"", 6)
        } else if rest.starts_with("&apos;") {
            ("'", 6)
        } else {
            ("&", 1)
        };
        out.push_str(replacement);
        rest = &rest[advance..];
    }
    out.push_str(rest);
    out
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// The handshake requesting every device and property the server knows.
pub fn get_properties() -> String {
    "<getProperties version=\"1.7\"/>\n".to_string()
}

/// Serialize a whole switch vector as one `newSwitchVector` submission.
pub fn new_switch_vector(device: &str, name: &str, switches: &[SwitchElement]) -> String {
    let mut out = format!(
        "<newSwitchVector device=\"{}\" name=\"{}\">\n",
        escape(device),
        escape(name)
    );
    for element in switches {
        out.push_str(&format!(
            "  <oneSwitch name=\"{}\">{}</oneSwitch>\n",
            escape(&element.name),
            element.state.wire_value()
        ));
    }
    out.push_str("</newSwitchVector>\n");
    out
}

/// Serialize a whole number vector as one `newNumberVector` submission.
pub fn new_number_vector(device: &str, name: &str, numbers: &[NumberElement]) -> String {
    let mut out = format!(
        "<newNumberVector device=\"{}\" name=\"{}\">\n",
        escape(device),
        escape(name)
    );
    for element in numbers {
        out.push_str(&format!(
            "  <oneNumber name=\"{}\">{}</oneNumber>\n",
            escape(&element.name),
            element.value
        ));
    }
    out.push_str("</newNumberVector>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyKind;

    const DEF_SWITCH: &str = "<defSwitchVector device=\"Pi Radiotelescope\" \
        name=\"TELESCOPE_PARK\" label=\"Park\" group=\"Main Control\" state=\"Idle\" \
        perm=\"rw\" rule=\"OneOfMany\" timeout=\"60\">\n\
        <defSwitch name=\"PARK\" label=\"Park\">Off</defSwitch>\n\
        <defSwitch name=\"UNPARK\" label=\"UnPark\">On</defSwitch>\n\
        </defSwitchVector>\n";

    #[test]
    fn parses_a_switch_definition() {
        let mut reader = WireReader::new();
        reader.extend(DEF_SWITCH.as_bytes());
        let message = reader.next_message().expect("one message");
        let ServerMessage::Define(vector) = message else {
            panic!("expected a definition");
        };
        assert_eq!(vector.device, "Pi Radiotelescope");
        assert_eq!(vector.name, "TELESCOPE_PARK");
        assert_eq!(vector.label.as_deref(), Some("Park"));
        assert_eq!(vector.kind(), PropertyKind::Switch);
        let switches = vector.switches().unwrap();
        assert_eq!(switches.len(), 2);
        assert_eq!(switches[0].name, "PARK");
        assert_eq!(switches[0].state, SwitchState::Off);
        assert_eq!(switches[1].state, SwitchState::On);
        assert!(reader.next_message().is_none());
    }

    #[test]
    fn parses_across_arbitrary_buffer_splits() {
        let mut reader = WireReader::new();
        for byte in DEF_SWITCH.as_bytes() {
            reader.extend(std::slice::from_ref(byte));
        }
        assert!(matches!(
            reader.next_message(),
            Some(ServerMessage::Define(_))
        ));
    }

    #[test]
    fn parses_a_number_update() {
        let mut reader = WireReader::new();
        reader.extend(
            b"<setNumberVector device=\"GPSD\" name=\"GEOGRAPHIC_COORD\" state=\"Ok\">\
              <oneNumber name=\"LAT\">48.25</oneNumber>\
              <oneNumber name=\"LONG\">16:20:30</oneNumber>\
              </setNumberVector>",
        );
        let Some(ServerMessage::Update(update)) = reader.next_message() else {
            panic!("expected an update");
        };
        assert_eq!(update.device, "GPSD");
        assert_eq!(update.state, Some(PropertyState::Ok));
        assert_eq!(update.elements.len(), 2);
        let ElementUpdate::Number { name, value } = &update.elements[1] else {
            panic!("expected a number");
        };
        assert_eq!(name, "LONG");
        assert!((value - (16.0 + 20.0 / 60.0 + 30.0 / 3600.0)).abs() < 1e-9);
    }

    #[test]
    fn parses_self_closing_messages() {
        let mut reader = WireReader::new();
        reader.extend(
            b"<delProperty device=\"GPSD\" name=\"GPS_REFRESH\"/>\
              <delProperty device=\"GPSD\"/>\
              <message device=\"Weather Watcher\" message=\"clouds &amp; rain\"/>",
        );
        assert!(matches!(
            reader.next_message(),
            Some(ServerMessage::Delete { property: Some(_), .. })
        ));
        assert!(matches!(
            reader.next_message(),
            Some(ServerMessage::Delete { property: None, .. })
        ));
        let Some(ServerMessage::Message { device, text }) = reader.next_message() else {
            panic!("expected a message");
        };
        assert_eq!(device.as_deref(), Some("Weather Watcher"));
        assert_eq!(text, "clouds & rain");
    }

    #[test]
    fn skips_unknown_and_junk_frames() {
        let mut reader = WireReader::new();
        reader.extend(b"<?xml version=\"1.0\"?>noise<enableBLOB device=\"X\">Never</enableBLOB>");
        reader.extend(b"<delProperty device=\"X\"/>");
        assert!(matches!(
            reader.next_message(),
            Some(ServerMessage::Delete { .. })
        ));
    }

    #[test]
    fn blob_updates_keep_only_the_size() {
        let mut reader = WireReader::new();
        reader.extend(
            b"<setBLOBVector device=\"CCD\" name=\"CCD1\">\
              <oneBLOB name=\"FITS\" size=\"1024\" format=\".fits\">AAAA</oneBLOB>\
              </setBLOBVector>",
        );
        let Some(ServerMessage::Update(update)) = reader.next_message() else {
            panic!("expected an update");
        };
        let ElementUpdate::Blob { name, size } = &update.elements[0] else {
            panic!("expected a blob");
        };
        assert_eq!(name, "FITS");
        assert_eq!(*size, 1024);
    }

    #[test]
    fn serializes_switch_submissions() {
        let switches = vec![
            SwitchElement {
                name: "CONNECT".to_string(),
                label: None,
                state: SwitchState::On,
            },
            SwitchElement {
                name: "DISCONNECT".to_string(),
                label: None,
                state: SwitchState::Off,
            },
        ];
        let xml = new_switch_vector("Pi Radiotelescope", "CONNECTION", &switches);
        assert!(xml.starts_with("<newSwitchVector device=\"Pi Radiotelescope\" name=\"CONNECTION\">"));
        assert!(xml.contains("<oneSwitch name=\"CONNECT\">On</oneSwitch>"));
        assert!(xml.contains("<oneSwitch name=\"DISCONNECT\">Off</oneSwitch>"));
        assert!(xml.ends_with("</newSwitchVector>\n"));
    }

    #[test]
    fn serializes_number_submissions_with_escaping() {
        let numbers = vec![NumberElement {
            name: "INT_TIME".to_string(),
            label: None,
            value: 30.0,
        }];
        let xml = new_number_vector("A \"quoted\" <device>", "INT_TIME", &numbers);
        assert!(xml.contains("device=\"A &quot;quoted&quot; &lt;device&gt;\""));
        assert!(xml.contains("<oneNumber name=\"INT_TIME\">30</oneNumber>"));
    }

    #[test]
    fn unescape_handles_all_entities() {
        assert_eq!(unescape("a &amp;&lt;&gt;&quot;&apos; b"), "a &<>\"' b");
        assert_eq!(unescape("plain"), "plain");
        assert_eq!(unescape("&bogus;"), "&bogus;");
    }
}
