use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use validator::Validate;

use crate::error::ValidationError;

/// An event submission as decoded from the request body, before identifiers
/// and the default date are assigned.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewEventEntry {
    #[serde(default, deserialize_with = "cast_string")]
    #[validate(
        required(message = "Enter the name of the sender/device"),
        length(min = 1, message = "Enter the name of the sender/device")
    )]
    pub sender: Option<String>,
    #[serde(default, deserialize_with = "cast_string")]
    pub event: Option<String>,
    #[serde(default, deserialize_with = "cast_date")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "cast_list")]
    #[validate(nested)]
    pub air_readings: Vec<NewAirReading>,
    #[serde(default, deserialize_with = "cast_list")]
    #[validate(nested)]
    pub soil_readings: Vec<NewSoilReading>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewAirReading {
    #[serde(default, deserialize_with = "cast_string")]
    #[validate(
        required(message = "Enter the name/model of the sensor"),
        length(min = 1, message = "Enter the name/model of the sensor")
    )]
    pub sensor: Option<String>,
    #[serde(default, deserialize_with = "cast_number")]
    #[validate(range(min = 0.0, max = 100.0, message = "humidity must be between 0 and 100"))]
    pub humidity: Option<f64>,
    #[serde(default, deserialize_with = "cast_number")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "cast_number")]
    pub heat_index: Option<f64>,
    #[serde(default, deserialize_with = "cast_number")]
    pub dew_point: Option<f64>,
}

/// Soil humidity is deliberately left unbounded, unlike air humidity.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewSoilReading {
    #[serde(default, deserialize_with = "cast_string")]
    #[validate(
        required(message = "Enter the name/model of the sensor"),
        length(min = 1, message = "Enter the name/model of the sensor")
    )]
    pub sensor: Option<String>,
    #[serde(default, deserialize_with = "cast_number")]
    pub humidity: Option<f64>,
}

impl NewEventEntry {
    /// Casts an untrusted body into the schema and runs the field rules.
    /// Unknown fields are dropped; a non-object body is treated as empty.
    pub fn from_body(body: Value) -> Result<Self, ValidationError> {
        let body = match body {
            Value::Object(map) => Value::Object(map),
            _ => Value::Object(Default::default()),
        };
        let entry: NewEventEntry = serde_path_to_error::deserialize(body)?;
        entry.validate()?;
        Ok(entry)
    }
}

/// A stored event entry, serialized in the response wire shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEntry {
    #[serde(rename = "_id", serialize_with = "object_id_hex")]
    pub id: ObjectId,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(serialize_with = "iso_millis")]
    pub date: DateTime<Utc>,
    pub air_readings: Vec<AirReading>,
    pub soil_readings: Vec<SoilReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AirReading {
    #[serde(rename = "_id", serialize_with = "object_id_hex")]
    pub id: ObjectId,
    pub sensor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_index: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dew_point: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoilReading {
    #[serde(rename = "_id", serialize_with = "object_id_hex")]
    pub id: ObjectId,
    pub sensor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

impl EventEntry {
    /// Assigns fresh identifiers to the entry and each reading, and resolves
    /// a missing date to now. Dates keep millisecond precision, matching
    /// what the document store can hold.
    pub fn stamp(entry: NewEventEntry) -> Self {
        let date = entry.date.unwrap_or_else(Utc::now).trunc_subsecs(3);
        Self {
            id: ObjectId::new(),
            sender: entry.sender.unwrap_or_default(),
            event: entry.event,
            date,
            air_readings: entry
                .air_readings
                .into_iter()
                .map(|reading| AirReading {
                    id: ObjectId::new(),
                    sensor: reading.sensor.unwrap_or_default(),
                    humidity: reading.humidity,
                    temperature: reading.temperature,
                    heat_index: reading.heat_index,
                    dew_point: reading.dew_point,
                })
                .collect(),
            soil_readings: entry
                .soil_readings
                .into_iter()
                .map(|reading| SoilReading {
                    id: ObjectId::new(),
                    sensor: reading.sensor.unwrap_or_default(),
                    humidity: reading.humidity,
                })
                .collect(),
        }
    }
}

/// Error body written for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub name: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, FieldError>,
}

impl ErrorResponse {
    pub fn new(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
            errors: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub kind: String,
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Serialize)]
pub struct NotFoundResponse {
    pub url: String,
}

fn object_id_hex<S: Serializer>(id: &ObjectId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&id.to_hex())
}

fn iso_millis<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn cast_failure(target: &str, value: &Value) -> String {
    format!("Cast to {target} failed for value {value}")
}

// Text fields take strings as-is and stringify scalars.
fn cast_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
        Some(other) => Err(D::Error::custom(cast_failure("string", &other))),
    }
}

fn cast_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_f64()
            .map(Some)
            .ok_or_else(|| D::Error::custom(cast_failure("Number", &Value::Number(number)))),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => match text.trim().parse::<f64>() {
            Ok(number) if number.is_finite() => Ok(Some(number)),
            _ => Err(D::Error::custom(cast_failure("Number", &Value::String(text)))),
        },
        Some(Value::Bool(flag)) => Ok(Some(if flag { 1.0 } else { 0.0 })),
        Some(other) => Err(D::Error::custom(cast_failure("Number", &other))),
    }
}

fn cast_date<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => parse_date(text.trim())
            .map(Some)
            .ok_or_else(|| D::Error::custom(cast_failure("Date", &Value::String(text)))),
        Some(Value::Number(number)) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(Some)
            .ok_or_else(|| D::Error::custom(cast_failure("Date", &Value::Number(number)))),
        Some(other) => Err(D::Error::custom(cast_failure("Date", &other))),
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return day.and_hms_opt(0, 0, 0).map(|midnight| midnight.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

fn cast_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rejected_paths(body: Value) -> Vec<String> {
        match NewEventEntry::from_body(body) {
            Ok(_) => panic!("expected validation failure"),
            Err(err) => err.field_errors().into_keys().collect(),
        }
    }

    #[test]
    fn accepts_air_reading_with_bounded_humidity() {
        let entry = NewEventEntry::from_body(json!({
            "sender": "node-1",
            "airReadings": [{ "sensor": "DHT22", "humidity": 55, "temperature": 21.3 }]
        }))
        .unwrap();
        assert_eq!(entry.sender.as_deref(), Some("node-1"));
        assert_eq!(entry.air_readings.len(), 1);
        assert_eq!(entry.air_readings[0].humidity, Some(55.0));
        assert_eq!(entry.air_readings[0].temperature, Some(21.3));
        assert!(entry.date.is_none());
    }

    #[test]
    fn humidity_bounds_are_inclusive() {
        for humidity in [0.0, 100.0] {
            let result = NewEventEntry::from_body(json!({
                "sender": "node-1",
                "airReadings": [{ "sensor": "DHT22", "humidity": humidity }]
            }));
            assert!(result.is_ok(), "humidity {humidity} should be accepted");
        }
    }

    #[test]
    fn missing_sender_is_rejected() {
        assert_eq!(rejected_paths(json!({ "airReadings": [] })), vec!["sender"]);
    }

    #[test]
    fn empty_sender_is_rejected() {
        assert_eq!(rejected_paths(json!({ "sender": "" })), vec!["sender"]);
    }

    #[test]
    fn air_humidity_out_of_range_is_rejected() {
        let paths = rejected_paths(json!({
            "sender": "s1",
            "airReadings": [{ "sensor": "x", "humidity": 150 }]
        }));
        assert_eq!(paths, vec!["airReadings.0.humidity"]);

        let paths = rejected_paths(json!({
            "sender": "s1",
            "airReadings": [{ "sensor": "x", "humidity": -0.5 }]
        }));
        assert_eq!(paths, vec!["airReadings.0.humidity"]);
    }

    #[test]
    fn soil_humidity_is_unbounded() {
        let entry = NewEventEntry::from_body(json!({
            "sender": "s1",
            "soilReadings": [{ "sensor": "cap-v2", "humidity": 250 }, { "sensor": "cap-v2", "humidity": -4 }]
        }))
        .unwrap();
        assert_eq!(entry.soil_readings[0].humidity, Some(250.0));
        assert_eq!(entry.soil_readings[1].humidity, Some(-4.0));
    }

    #[test]
    fn every_reading_needs_a_sensor() {
        let paths = rejected_paths(json!({
            "sender": "s1",
            "airReadings": [{ "sensor": "ok" }, { "humidity": 10 }],
            "soilReadings": [{ "sensor": "" }]
        }));
        assert_eq!(paths, vec!["airReadings.1.sensor", "soilReadings.0.sensor"]);
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let entry = NewEventEntry::from_body(json!({
            "sender": "s1",
            "_id": "ffffffffffffffffffffffff",
            "firmware": "1.2.3",
            "airReadings": [{ "sensor": "x", "pressure": 1013 }]
        }))
        .unwrap();
        assert_eq!(entry.sender.as_deref(), Some("s1"));
        assert_eq!(entry.air_readings[0].sensor.as_deref(), Some("x"));
    }

    #[test]
    fn scalars_are_cast_like_a_document_mapper() {
        let entry = NewEventEntry::from_body(json!({
            "sender": 42,
            "event": true,
            "airReadings": [{ "sensor": "x", "humidity": "40.5", "dewPoint": "" }],
            "soilReadings": [{ "sensor": "y", "humidity": false }]
        }))
        .unwrap();
        assert_eq!(entry.sender.as_deref(), Some("42"));
        assert_eq!(entry.event.as_deref(), Some("true"));
        assert_eq!(entry.air_readings[0].humidity, Some(40.5));
        assert_eq!(entry.air_readings[0].dew_point, None);
        assert_eq!(entry.soil_readings[0].humidity, Some(0.0));
    }

    #[test]
    fn uncastable_number_reports_its_path() {
        let err = NewEventEntry::from_body(json!({
            "sender": "s1",
            "airReadings": [{ "sensor": "x", "temperature": "warm" }]
        }))
        .unwrap_err();
        let errors = err.field_errors();
        let failure = &errors["airReadings.0.temperature"];
        assert_eq!(failure.kind, "cast");
        assert!(failure.message.contains("Cast to Number failed"));
    }

    #[test]
    fn null_collections_are_empty() {
        let entry = NewEventEntry::from_body(json!({
            "sender": "s1",
            "airReadings": null
        }))
        .unwrap();
        assert!(entry.air_readings.is_empty());
        assert!(entry.soil_readings.is_empty());
    }

    #[test]
    fn non_object_body_is_treated_as_empty() {
        assert_eq!(rejected_paths(json!(["s1"])), vec!["sender"]);
    }

    #[test]
    fn dates_accept_iso_strings_and_epoch_millis() {
        let iso = NewEventEntry::from_body(json!({
            "sender": "s1",
            "date": "2020-03-01T10:15:30.250+01:00"
        }))
        .unwrap();
        assert_eq!(
            iso.date.unwrap().to_rfc3339_opts(SecondsFormat::Millis, true),
            "2020-03-01T09:15:30.250Z"
        );

        let millis = NewEventEntry::from_body(json!({ "sender": "s1", "date": 1583054130250i64 }))
            .unwrap();
        assert_eq!(millis.date, iso.date);

        let day = NewEventEntry::from_body(json!({ "sender": "s1", "date": "2020-03-01" })).unwrap();
        assert_eq!(
            day.date.unwrap().to_rfc3339_opts(SecondsFormat::Secs, true),
            "2020-03-01T00:00:00Z"
        );
    }

    #[test]
    fn stamp_assigns_distinct_ids_and_default_date() {
        let before = Utc::now().trunc_subsecs(3);
        let new_entry = NewEventEntry::from_body(json!({
            "sender": "node-1",
            "airReadings": [{ "sensor": "a" }, { "sensor": "b" }],
            "soilReadings": [{ "sensor": "c" }]
        }))
        .unwrap();

        let first = EventEntry::stamp(new_entry.clone());
        let second = EventEntry::stamp(new_entry);

        assert_ne!(first.id, second.id);
        assert_ne!(first.air_readings[0].id, first.air_readings[1].id);
        assert!(first.date >= before);
        assert_eq!(first.date.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn stored_entry_serializes_to_wire_shape() {
        let mut new_entry = NewEventEntry::from_body(json!({
            "sender": "node-1",
            "airReadings": [{ "sensor": "DHT22", "humidity": 55, "heatIndex": 22.1 }],
            "soilReadings": [{ "sensor": "cap" }]
        }))
        .unwrap();
        new_entry.date = DateTime::from_timestamp_millis(1583054130250);

        let entry = EventEntry::stamp(new_entry);
        let wire = serde_json::to_value(&entry).unwrap();

        assert_eq!(wire["_id"], json!(entry.id.to_hex()));
        assert_eq!(wire["date"], json!("2020-03-01T09:15:30.250Z"));
        assert!(wire.get("event").is_none());
        assert_eq!(wire["airReadings"][0]["heatIndex"], json!(22.1));
        assert!(wire["airReadings"][0].get("dewPoint").is_none());
        assert_eq!(
            wire["soilReadings"][0],
            json!({ "_id": entry.soil_readings[0].id.to_hex(), "sensor": "cap" })
        );
    }
}
