//! Telemetry from the field device.
//!
//! Firmware revisions disagree on key names and some emit a JavaScript-ish
//! object literal (`{ ec: '1.2' }`) instead of JSON, so parsing is lenient.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::mqtt::router::{InboundMessage, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// L/min
    pub water_flow: f64,
    /// bar
    pub pressure: f64,
    /// µS/cm
    pub ec: f64,
    pub ph: f64,
    /// mg/kg
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
    /// °C
    pub temperature: f64,
}

impl SensorReading {
    /// `None` unless the payload is (or normalises to) a JSON object.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::Json(Value::Object(fields)) => Some(Self::from_fields(fields)),
            Payload::Json(_) => None,
            Payload::Text(text) => Self::from_text(text),
        }
    }

    pub fn from_text(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let candidate = if trimmed.starts_with("{ ") && trimmed.ends_with(" }") {
            normalize_object_literal(trimmed)
        } else {
            trimmed.to_string()
        };

        match serde_json::from_str::<Value>(&candidate) {
            Ok(Value::Object(fields)) => Some(Self::from_fields(&fields)),
            Ok(_) => None,
            Err(e) => {
                debug!("Unparseable sensor payload {:?}: {}", text, e);
                None
            }
        }
    }

    fn from_fields(fields: &Map<String, Value>) -> Self {
        let pick = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| fields.get(*key).and_then(number))
                .find(|value| *value != 0.0)
                .unwrap_or(0.0)
        };

        Self {
            water_flow: pick(&["waterFlow", "water_flow"]),
            pressure: pick(&["pressure"]),
            ec: pick(&["ec", "conductivity"]),
            ph: pick(&["ph"]),
            nitrogen: pick(&["nitrogen", "n"]),
            phosphorus: pick(&["phosphorus", "p"]),
            potassium: pick(&["potassium", "k"]),
            temperature: pick(&["temperature", "temp"]),
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_quote(c: char) -> bool {
    c == '\'' || c == '"'
}

/// Quotes bare or single-quoted keys, then turns remaining single quotes
/// into double quotes.
fn normalize_object_literal(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let mut j = i;
        if is_quote(chars[j]) {
            j += 1;
        }
        let key_start = j;
        while j < chars.len() && is_key_char(chars[j]) {
            j += 1;
        }
        let key_end = j;
        if j < chars.len() && is_quote(chars[j]) {
            j += 1;
        }

        if key_end > key_start && j < chars.len() && chars[j] == ':' {
            out.push('"');
            out.extend(&chars[key_start..key_end]);
            out.push_str("\":");
            i = j + 1;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }

    out.replace('\'', "\"")
}

/// Wraps a reading callback into a router handler for the sensor channel.
pub fn sensor_handler<F>(
    on_reading: F,
) -> impl Fn(&InboundMessage) -> color_eyre::Result<()> + Send + Sync + 'static
where
    F: Fn(SensorReading) + Send + Sync + 'static,
{
    move |message: &InboundMessage| {
        match SensorReading::from_payload(&message.payload) {
            Some(reading) => on_reading(reading),
            None => warn!("Ignoring malformed sensor payload: {}", message.payload.raw_text()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_either_key_spelling() {
        let reading = SensorReading::from_payload(&Payload::Json(json!({
            "water_flow": 12.5,
            "conductivity": 1400,
            "n": 30,
            "p": "12",
            "k": 8,
            "temp": 27.5,
            "ph": 6.4
        })))
        .unwrap();

        assert_eq!(reading.water_flow, 12.5);
        assert_eq!(reading.ec, 1400.0);
        assert_eq!(reading.nitrogen, 30.0);
        assert_eq!(reading.phosphorus, 12.0);
        assert_eq!(reading.potassium, 8.0);
        assert_eq!(reading.temperature, 27.5);
        assert_eq!(reading.ph, 6.4);
        assert_eq!(reading.pressure, 0.0);
    }

    #[test]
    fn zero_primary_key_falls_through_to_alias() {
        let reading =
            SensorReading::from_payload(&Payload::Json(json!({"ec": 0, "conductivity": 900})))
                .unwrap();
        assert_eq!(reading.ec, 900.0);
    }

    #[test]
    fn object_literal_text_is_normalised() {
        let reading = SensorReading::from_text("{ waterFlow: '3.5', 'ph': 7, ec: 1200 }").unwrap();
        assert_eq!(reading.water_flow, 3.5);
        assert_eq!(reading.ph, 7.0);
        assert_eq!(reading.ec, 1200.0);
    }

    #[test]
    fn garbage_yields_none() {
        assert!(SensorReading::from_text("sensor offline").is_none());
        assert!(SensorReading::from_text("[1, 2]").is_none());
        assert!(SensorReading::from_payload(&Payload::Json(json!(42))).is_none());
    }
}
