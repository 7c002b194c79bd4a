//! Date handling for server payloads.
//!
//! The backend reports running work as "milliseconds still pending" measured
//! when it built the response. The client turns that into an absolute date by
//! adding it to its own clock at receipt time. Clock skew and the delivery
//! latency between the two moments are not compensated, so the resulting date
//! is an approximation.

use serde::{Deserialize, Deserializer, Serializer};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pending time of {pending_millis}ms leaves the representable date range")]
pub struct DateOutOfRange {
    pub pending_millis: i64,
}

/// Absolute local termination date for work that had `pending_millis` left
/// when the server answered.
pub fn browser_termination_date(
    pending_millis: i64,
    received_at: OffsetDateTime,
) -> Result<OffsetDateTime, DateOutOfRange> {
    received_at
        .checked_add(Duration::milliseconds(pending_millis))
        .ok_or(DateOutOfRange { pending_millis })
}

pub fn to_millis(value: OffsetDateTime) -> i64 {
    (value.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn from_millis(millis: i64) -> Result<OffsetDateTime, time::error::ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDate {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

fn parse_raw<E: serde::de::Error>(raw: RawDate) -> Result<OffsetDateTime, E> {
    match raw {
        RawDate::Millis(ms) => from_millis(ms).map_err(E::custom),
        RawDate::Fractional(ms) => from_millis(ms as i64).map_err(E::custom),
        RawDate::Text(text) => OffsetDateTime::parse(&text, &Rfc3339).map_err(E::custom),
    }
}

/// Serde adapter: dates travel as epoch milliseconds; RFC 3339 strings are
/// accepted on input.
pub mod epoch_millis {
    use super::*;

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(to_millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        parse_raw(RawDate::deserialize(deserializer)?)
    }

    pub mod option {
        use super::super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<OffsetDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(date) => serializer.serialize_i64(to_millis(*date)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<OffsetDateTime>, D::Error> {
            match Option::<RawDate>::deserialize(deserializer)? {
                Some(raw) => parse_raw(raw).map(Some),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Stamped {
        #[serde(default, with = "epoch_millis::option")]
        at: Option<OffsetDateTime>,
    }

    #[test]
    fn termination_date_adds_pending_to_receipt_time() {
        let received = from_millis(1_600_000_000_000).unwrap();
        let done = browser_termination_date(90_000, received).unwrap();
        assert_eq!(to_millis(done), 1_600_000_090_000);
    }

    #[test]
    fn termination_date_outside_the_calendar_is_an_error() {
        let received = from_millis(1_600_000_000_000).unwrap();
        assert_eq!(
            browser_termination_date(400_000_000_000_000, received),
            Err(DateOutOfRange {
                pending_millis: 400_000_000_000_000
            })
        );
        assert!(browser_termination_date(i64::MIN, received).is_err());
    }

    #[test]
    fn accepts_millis_and_rfc3339() {
        let from_number: Stamped = serde_json::from_str(r#"{"at": 1600000000000}"#).unwrap();
        let from_text: Stamped =
            serde_json::from_str(r#"{"at": "2020-09-13T12:26:40Z"}"#).unwrap();
        assert_eq!(from_number.at, from_text.at);

        let missing: Stamped = serde_json::from_str("{}").unwrap();
        assert!(missing.at.is_none());
        let null: Stamped = serde_json::from_str(r#"{"at": null}"#).unwrap();
        assert!(null.at.is_none());
    }

    #[test]
    fn serializes_as_millis() {
        let stamped = Stamped {
            at: Some(from_millis(1_234).unwrap()),
        };
        assert_eq!(serde_json::to_string(&stamped).unwrap(), r#"{"at":1234}"#);
    }
}
