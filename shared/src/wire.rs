//! JSON booking records as the various booking endpoints emit them.
//!
//! Endpoints disagree on key spelling (`bookingId` vs `_id`, `slotNumber` vs
//! `slotNo`) and on whether timestamps carry a zone suffix, so records are read
//! as loose JSON objects and normalized here, at the repository boundary.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::BookingError;
use crate::model::{
    Booking, BookingId, BookingStatus, ModelError, OwnerId, SlotId, StationId, TimeSlotId,
};

const ID_KEYS: &[&str] = &["bookingId", "_id", "id"];
const STATION_ID_KEYS: &[&str] = &["stationId", "StationId"];
const SLOT_NUMBER_KEYS: &[&str] = &["slotNumber", "slotNo"];
const QR_KEYS: &[&str] = &["qrImageBase64", "qrCode"];

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parses a server timestamp as a UTC instant. Zone-less values are UTC.
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, ModelError> {
    let raw = raw.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok(with_offset.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, NAIVE_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| ModelError::InvalidTimestamp(raw.to_string()))
}

/// First key present with a usable value. Numbers are accepted as text.
fn text(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn optional_id<T>(
    record: &Map<String, Value>,
    keys: &[&str],
    build: impl FnOnce(String) -> Result<T, ModelError>,
) -> Result<Option<T>, ModelError> {
    text(record, keys).map(build).transpose()
}

fn booking_from_record(record: &Map<String, Value>) -> Result<Booking, ModelError> {
    let id = text(record, ID_KEYS).ok_or_else(|| ModelError::InvalidId {
        kind: "BookingId",
        reason: "missing".into(),
    })?;
    let id = BookingId::new(id)?;

    let status = text(record, &["status"])
        .ok_or_else(|| ModelError::UnknownStatus(String::new()))?
        .parse::<BookingStatus>()?;

    let start = text(record, &["startTime"])
        .ok_or_else(|| ModelError::InvalidTimestamp(String::new()))
        .and_then(|raw| parse_instant(&raw))?;
    let end = text(record, &["endTime"])
        .ok_or_else(|| ModelError::InvalidTimestamp(String::new()))
        .and_then(|raw| parse_instant(&raw))?;

    let mut booking = Booking::new(id, status, start, end)?.with_slot(
        optional_id(record, &["slotId"], SlotId::new)?,
        text(record, SLOT_NUMBER_KEYS),
    );

    if let Some(station_id) = optional_id(record, STATION_ID_KEYS, StationId::new)? {
        let name = text(record, &["stationName"]).unwrap_or_default();
        booking = booking.with_station(station_id, name);
    }
    if let Some(time_slot_id) = optional_id(record, &["timeSlotId"], TimeSlotId::new)? {
        booking = booking.with_time_slot(time_slot_id);
    }
    if let Some(owner_id) = optional_id(record, &["ownerId"], OwnerId::new)? {
        booking = booking.with_owner(owner_id);
    }
    if let Some(qr) = text(record, QR_KEYS) {
        booking = booking.with_qr_payload(qr);
    }

    Ok(booking)
}

/// Parses a single booking object.
pub fn parse_booking(data: &str) -> Result<Booking, BookingError> {
    let value: Value = serde_json::from_str(data).map_err(BookingError::malformed)?;
    let record = value
        .as_object()
        .ok_or_else(|| BookingError::malformed("expected a booking object"))?;
    booking_from_record(record).map_err(BookingError::malformed)
}

/// Parses a booking list, dropping malformed records.
///
/// Returns the usable bookings in server order and the number of records
/// that were skipped.
pub fn parse_booking_list(data: &str) -> Result<(Vec<Booking>, usize), BookingError> {
    let value: Value = serde_json::from_str(data).map_err(BookingError::malformed)?;
    let records = match value {
        Value::Array(records) => records,
        Value::Null => Vec::new(),
        _ => return Err(BookingError::malformed("expected a booking list")),
    };

    let mut bookings = Vec::with_capacity(records.len());
    let mut skipped = 0;

    for (index, record) in records.iter().enumerate() {
        let parsed = record
            .as_object()
            .ok_or_else(|| ModelError::InvalidId {
                kind: "BookingId",
                reason: "record is not an object".into(),
            })
            .and_then(booking_from_record);

        match parsed {
            Ok(booking) => bookings.push(booking),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed booking record");
                skipped += 1;
            }
        }
    }

    Ok((bookings, skipped))
}
