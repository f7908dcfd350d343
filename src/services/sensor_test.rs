use super::*;

#[test]
fn parses_labelled_lines() {
    let text = "Client1 Temp: 24.5°C\nHumidity: 61%\nPressure: 1013.2 hPa\nLight: 120 lux\n";
    let readings = parse(text);

    assert_eq!(readings.temperature, 24.5);
    assert_eq!(readings.humidity, 61.0);
    assert_eq!(readings.pressure, 1013.2);
    assert_eq!(readings.light_level, 120.0);
}

#[test]
fn labels_are_case_insensitive() {
    let readings = parse("TEMPERATURE: 18 celsius\nhumidity: 40\nLIGHT LEVEL: 3lx");
    assert_eq!(readings.temperature, 18.0);
    assert_eq!(readings.humidity, 40.0);
    assert_eq!(readings.light_level, 3.0);
}

#[test]
fn missing_and_garbage_fields_are_zero() {
    let readings = parse("Temp: warm\nnoise without colon\nWind: 12 km/h");
    assert_eq!(readings, SensorReadings::default());
}

#[test]
fn negative_temperature_parses() {
    assert_eq!(parse("Temp: -3.5 C").temperature, -3.5);
}

#[test]
fn display_uses_sentinel_for_non_positive() {
    let readings = SensorReadings { temperature: 24.5, humidity: 0.0, pressure: 1013.0, light_level: -1.0 };
    let display = readings.display();

    assert_eq!(display.temperature, "24.5°C");
    assert_eq!(display.humidity, NOT_AVAILABLE);
    assert_eq!(display.pressure, "1013 hPa");
    assert_eq!(display.light_level, NOT_AVAILABLE);
}
