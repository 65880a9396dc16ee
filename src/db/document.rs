//! Document store - MongoDB collection holding cleaned trips.

use crate::error::{PipelineError, Result};
use crate::model::TripRecord;
use async_trait::async_trait;
use bson::doc;
use chrono::NaiveDateTime;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};

/// A cleaned trip as written to the document store: no surrogate key, and
/// timestamps in the store's native datetime type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripDocument {
    pub vendor_id: Option<i64>,
    pub tpep_pickup_datetime: Option<bson::DateTime>,
    pub tpep_dropoff_datetime: Option<bson::DateTime>,
    pub passenger_count: Option<f64>,
    pub trip_distance: Option<f64>,
    pub ratecode_id: Option<f64>,
    pub store_and_fwd_flag: Option<String>,
    pub pu_location_id: Option<i64>,
    pub do_location_id: Option<i64>,
    pub payment_type: Option<i64>,
    pub fare_amount: Option<f64>,
    pub extra: Option<f64>,
    pub mta_tax: Option<f64>,
    pub tip_amount: Option<f64>,
    pub tolls_amount: Option<f64>,
    pub improvement_surcharge: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
    pub airport_fee: Option<f64>,
    pub cbd_congestion_fee: Option<f64>,
}

fn to_bson_datetime(ts: NaiveDateTime) -> bson::DateTime {
    bson::DateTime::from_millis(ts.and_utc().timestamp_millis())
}

impl From<TripRecord> for TripDocument {
    fn from(r: TripRecord) -> Self {
        Self {
            vendor_id: r.vendor_id,
            tpep_pickup_datetime: r.tpep_pickup_datetime.map(to_bson_datetime),
            tpep_dropoff_datetime: r.tpep_dropoff_datetime.map(to_bson_datetime),
            passenger_count: r.passenger_count,
            trip_distance: r.trip_distance,
            ratecode_id: r.ratecode_id,
            store_and_fwd_flag: r.store_and_fwd_flag,
            pu_location_id: r.pu_location_id,
            do_location_id: r.do_location_id,
            payment_type: r.payment_type,
            fare_amount: r.fare_amount,
            extra: r.extra,
            mta_tax: r.mta_tax,
            tip_amount: r.tip_amount,
            tolls_amount: r.tolls_amount,
            improvement_surcharge: r.improvement_surcharge,
            total_amount: r.total_amount,
            congestion_surcharge: r.congestion_surcharge,
            airport_fee: r.airport_fee,
            cbd_congestion_fee: r.cbd_congestion_fee,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Delete every document. Returns how many were removed.
    async fn clear(&self) -> Result<u64>;

    /// Bulk insert. Returns how many documents were written.
    async fn insert_many(&self, documents: Vec<TripDocument>) -> Result<u64>;
}

pub struct MongoDocumentStore {
    client: Client,
    collection: Collection<TripDocument>,
}

impl MongoDocumentStore {
    /// Connect and ping the server; failure is a stage-startup failure.
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self> {
        let unavailable = |e: mongodb::error::Error| PipelineError::StoreUnavailable {
            store: "document",
            reason: e.to_string(),
        };

        let client = Client::with_uri_str(uri).await.map_err(unavailable)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(unavailable)?;

        let collection = client.database(database).collection::<TripDocument>(collection);
        Ok(Self { client, collection })
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn clear(&self) -> Result<u64> {
        let result = self.collection.delete_many(doc! {}, None).await?;
        Ok(result.deleted_count)
    }

    async fn insert_many(&self, documents: Vec<TripDocument>) -> Result<u64> {
        if documents.is_empty() {
            return Ok(0);
        }
        let result = self.collection.insert_many(documents, None).await?;
        Ok(result.inserted_ids.len() as u64)
    }
}
