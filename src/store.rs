use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use tracing::{debug, info};

use crate::{
    error::AppError,
    models::{
        route::round2,
        trip::{TripEntry, TripFilter},
    },
    services::{
        storage::StorageService,
        sync::{replicate_in_background, ReplicationSink, SyncPayload},
    },
};

pub const CSV_HEADER: [&str; 7] = [
    "Date",
    "Purpose",
    "Notes",
    "Miles",
    "Duration",
    "Paused",
    "Reimbursement",
];
const BOM: &[u8] = "\u{feff}".as_bytes();

/// A rendered export, ready to be offered as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvExport {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripSummary {
    pub today_miles: f64,
    pub today_amount: f64,
    pub week_miles: f64,
    pub week_amount: f64,
}

/// Trip history of one identity plus the currently filtered projection.
pub struct TripStore {
    identity: String,
    username: String,
    entries: Vec<TripEntry>,
    filtered: Vec<TripEntry>,
    storage: StorageService,
    sink: Arc<dyn ReplicationSink>,
}

impl TripStore {
    pub async fn load(
        storage: StorageService,
        identity: impl Into<String>,
        username: impl Into<String>,
        sink: Arc<dyn ReplicationSink>,
    ) -> Result<Self, AppError> {
        let identity = identity.into();
        let entries = storage.load_trip_history(&identity).await?;
        debug!(%identity, trips = entries.len(), "trip history loaded");
        Ok(Self {
            identity,
            username: username.into(),
            filtered: entries.clone(),
            entries,
            storage,
            sink,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn entries(&self) -> &[TripEntry] {
        &self.entries
    }

    pub fn filtered(&self) -> &[TripEntry] {
        &self.filtered
    }

    /// Commits the entry to durable storage before it becomes visible, then
    /// hands a copy to the replication sink without waiting on it.
    pub async fn append(&mut self, entry: TripEntry) -> Result<(), AppError> {
        let mut next = self.entries.clone();
        next.push(entry.clone());
        self.storage.save_trip_history(&self.identity, &next).await?;
        self.entries = next;
        self.filtered = self.entries.clone();
        info!(
            trip = %entry.id,
            miles = entry.miles,
            reimbursement = entry.reimbursement,
            "trip logged"
        );

        replicate_in_background(
            Arc::clone(&self.sink),
            SyncPayload {
                identity: self.identity.clone(),
                entry,
            },
        );
        Ok(())
    }

    pub fn filter(&mut self, criteria: &TripFilter) -> &[TripEntry] {
        self.filtered = self
            .entries
            .iter()
            .filter(|entry| criteria.matches(entry))
            .cloned()
            .collect();
        debug!(matched = self.filtered.len(), total = self.entries.len(), "trip log filtered");
        &self.filtered
    }

    /// Exports the full log, or the filtered view when `use_filtered` is set.
    /// A full export also resets the filtered view to the whole log.
    pub fn export_csv(
        &mut self,
        use_filtered: bool,
        now: DateTime<Utc>,
    ) -> Result<CsvExport, AppError> {
        if !use_filtered {
            self.filtered = self.entries.clone();
        }
        let source = if use_filtered {
            &self.filtered
        } else {
            &self.entries
        };
        if source.is_empty() {
            return Err(AppError::NoTrips);
        }

        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(BOM.to_vec());
        writer.write_record(CSV_HEADER)?;
        for entry in source {
            writer.write_record(entry.csv_fields())?;
        }
        let bytes = writer.into_inner().map_err(|err| err.into_error())?;

        let filename = format!(
            "{}_{}trip_{}_{}.csv",
            self.username,
            if use_filtered { "filtered_" } else { "" },
            source.len(),
            now.format("%Y-%m-%d_%H_%M_%S")
        );
        info!(%filename, rows = source.len(), "trip log exported");
        Ok(CsvExport { filename, bytes })
    }

    pub async fn clear(&mut self) -> Result<(), AppError> {
        self.storage.save_trip_history(&self.identity, &[]).await?;
        self.entries.clear();
        self.filtered.clear();
        info!(identity = %self.identity, "trip history cleared");
        Ok(())
    }

    /// Mileage for today and the last seven days, priced at `rate_per_mile`.
    pub fn summary(&self, rate_per_mile: f64, now: DateTime<Utc>) -> TripSummary {
        let today = now.date_naive();
        let week_ago = now - Duration::days(7);
        let (today_miles, week_miles) =
            self.entries
                .iter()
                .fold((0.0, 0.0), |(day, week), entry| {
                    let day = if entry.date() == today { day + entry.miles } else { day };
                    let week = if entry.date_time >= week_ago {
                        week + entry.miles
                    } else {
                        week
                    };
                    (day, week)
                });
        TripSummary {
            today_miles: round2(today_miles),
            today_amount: round2(today_miles * rate_per_mile),
            week_miles: round2(week_miles),
            week_amount: round2(week_miles * rate_per_mile),
        }
    }
}
