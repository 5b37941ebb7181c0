//! Plain-text rendering of store contents.

use std::fmt;

use chrono::{DateTime, Utc};
use nilm_store_core::{Chunk, Key, TimeFrame};

/// Parse an RFC 3339 timestamp or an integer number of seconds since the epoch.
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    s.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| format!("expected RFC 3339 or epoch seconds, got '{s}'"))
}

pub(crate) fn chunk_line(n: usize, chunk: &Chunk) -> String {
    format!(
        "chunk {n}: rows={} timeframe={} look_ahead={}",
        chunk.num_rows(),
        chunk.timeframe,
        chunk.look_ahead.num_rows()
    )
}

pub(crate) struct TableInfo {
    pub key: String,
    pub columns: Vec<String>,
    pub rows: u64,
    pub timeframe: TimeFrame,
    pub estimated_bytes: u64,
}

impl fmt::Display for TableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "key:          {}", self.key)?;
        // Building and meter keys get a location line; other paths do not.
        if let Ok(parsed) = self.key.parse::<Key>() {
            match parsed.meter() {
                Some(meter) => writeln!(f, "location:     building {} meter {meter}", parsed.building())?,
                None => writeln!(f, "location:     building {}", parsed.building())?,
            }
        }
        writeln!(f, "columns:      {}", self.columns.join(", "))?;
        writeln!(f, "rows:         {}", self.rows)?;
        writeln!(f, "timeframe:    {}", self.timeframe)?;
        write!(f, "estimated_mb: {:.3}", self.estimated_bytes as f64 / 1e6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_accept_rfc3339_and_epoch_seconds() {
        let a = parse_timestamp("2011-04-18T09:00:00Z").unwrap();
        let b = parse_timestamp("1303117200").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn empty_chunk_line() {
        assert_eq!(
            chunk_line(0, &Chunk::empty()),
            "chunk 0: rows=0 timeframe=empty look_ahead=0"
        );
    }

    #[test]
    fn info_includes_location_for_meter_keys() {
        let info = TableInfo {
            key: "/building1/elec/meter2".to_string(),
            columns: vec!["power".to_string(), "reactive".to_string()],
            rows: 1000,
            timeframe: TimeFrame::empty(),
            estimated_bytes: 16_000,
        };
        let text = info.to_string();
        assert!(text.contains("building 1 meter 2"));
        assert!(text.contains("columns:      power, reactive"));
        assert!(text.ends_with("estimated_mb: 0.016"));

        let building = TableInfo {
            key: "/building1".to_string(),
            ..info
        };
        assert!(building.to_string().contains("location:     building 1\n"));
    }
}
