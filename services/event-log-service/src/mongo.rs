use async_trait::async_trait;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    options::ClientOptions,
    Client, Collection, Database,
};
use tracing::instrument;

use crate::config::MongoSettings;
use crate::error::StoreError;
use crate::models::{AirReading, EventEntry, SoilReading};
use crate::store::EventStore;

/// MongoDB-backed gateway. Cloning shares the driver's connection pool.
#[derive(Clone)]
pub struct MongoEventStore {
    collection: Collection<Document>,
}

impl MongoEventStore {
    /// Builds the client without waiting for the server; an unreachable
    /// store shows up as a failed insert.
    pub async fn connect(settings: &MongoSettings) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&settings.url).await?;
        options.app_name = Some(settings.app_name.clone());
        let database = options
            .default_database
            .clone()
            .unwrap_or_else(|| settings.database.clone());
        let client = Client::with_options(options)?;

        tracing::info!(
            database = %database,
            collection = %settings.collection,
            "document store client initialized"
        );
        Ok(Self::new(&client.database(&database), &settings.collection))
    }

    pub fn new(database: &Database, collection: &str) -> Self {
        Self {
            collection: database.collection(collection),
        }
    }
}

#[async_trait]
impl EventStore for MongoEventStore {
    #[instrument(skip(self, entry), fields(entry_id = %entry.id))]
    async fn insert(&self, entry: EventEntry) -> Result<EventEntry, StoreError> {
        self.collection.insert_one(entry_document(&entry)).await?;
        Ok(entry)
    }
}

/// Document form of an entry: ObjectIds and a BSON datetime instead of the
/// hex strings and ISO text used on the wire. Absent optionals stay absent.
pub fn entry_document(entry: &EventEntry) -> Document {
    let mut document = doc! {
        "_id": entry.id,
        "sender": entry.sender.as_str(),
        "date": BsonDateTime::from_millis(entry.date.timestamp_millis()),
        "airReadings": entry.air_readings.iter().map(air_document).collect::<Vec<_>>(),
        "soilReadings": entry.soil_readings.iter().map(soil_document).collect::<Vec<_>>(),
    };
    if let Some(event) = &entry.event {
        document.insert("event", event.as_str());
    }
    document
}

fn air_document(reading: &AirReading) -> Document {
    let mut document = doc! {
        "_id": reading.id,
        "sensor": reading.sensor.as_str(),
    };
    insert_number(&mut document, "humidity", reading.humidity);
    insert_number(&mut document, "temperature", reading.temperature);
    insert_number(&mut document, "heatIndex", reading.heat_index);
    insert_number(&mut document, "dewPoint", reading.dew_point);
    document
}

fn soil_document(reading: &SoilReading) -> Document {
    let mut document = doc! {
        "_id": reading.id,
        "sensor": reading.sensor.as_str(),
    };
    insert_number(&mut document, "humidity", reading.humidity);
    document
}

fn insert_number(document: &mut Document, key: &str, value: Option<f64>) {
    if let Some(value) = value {
        document.insert(key, value);
    }
}
