//! Sensor text parsing: `"<Label>: <number><unit>"` per line.
//!
//! Labels match case-insensitively on their last words, so `"Client1 Temp:"`
//! and `"temperature:"` both count. Units are not validated: the leading
//! number is taken and anything after it is ignored. A missing or
//! unparseable field reads as zero.

use serde::Serialize;

/// Display sentinel for a reading that is zero or below.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SensorReadings {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub light_level: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorDisplay {
    pub temperature: String,
    pub humidity: String,
    pub pressure: String,
    pub light_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Temperature,
    Humidity,
    Pressure,
    Light,
}

fn classify(label: &str) -> Option<Field> {
    let label = label.trim().to_lowercase();
    if label.ends_with("temp") || label.ends_with("temperature") {
        Some(Field::Temperature)
    } else if label.ends_with("humidity") {
        Some(Field::Humidity)
    } else if label.ends_with("pressure") {
        Some(Field::Pressure)
    } else if label.ends_with("light") || label.ends_with("light level") {
        Some(Field::Light)
    } else {
        None
    }
}

/// Leading decimal number of `raw`, or zero.
fn leading_number(raw: &str) -> f64 {
    let raw = raw.trim_start();
    let end = raw
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map_or(raw.len(), |(i, _)| i);
    raw[..end].parse().unwrap_or(0.0)
}

#[must_use]
pub fn parse(text: &str) -> SensorReadings {
    let mut readings = SensorReadings::default();
    for line in text.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let Some(field) = classify(label) else {
            continue;
        };
        let value = leading_number(value);
        match field {
            Field::Temperature => readings.temperature = value,
            Field::Humidity => readings.humidity = value,
            Field::Pressure => readings.pressure = value,
            Field::Light => readings.light_level = value,
        }
    }
    readings
}

fn shown(value: f64, unit: &str) -> String {
    if value > 0.0 { format!("{value}{unit}") } else { NOT_AVAILABLE.to_string() }
}

impl SensorReadings {
    #[must_use]
    pub fn display(&self) -> SensorDisplay {
        SensorDisplay {
            temperature: shown(self.temperature, "°C"),
            humidity: shown(self.humidity, "%"),
            pressure: shown(self.pressure, " hPa"),
            light_level: shown(self.light_level, " lux"),
        }
    }
}

#[cfg(test)]
#[path = "sensor_test.rs"]
mod tests;
