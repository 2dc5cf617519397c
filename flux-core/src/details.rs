//! Dataset-details header: the key/value block that opens every dataset.

use crate::calendar::Timestamp;
use crate::error::{PipelineError, Result};
use crate::timeres::TimeRes;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// UTC offset taking effect at a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeZoneSpan {
    pub timestamp: Timestamp,
    pub offset: f64,
}

/// Tower height taking effect at a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TowerHeightSpan {
    pub timestamp: Timestamp,
    pub height: f64,
}

/// Storage-negligible flag taking effect at a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScNeglSpan {
    pub timestamp: Timestamp,
    pub negligible: bool,
}

/// Parsed dataset-details block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteDetails {
    pub site: String,
    pub year: i32,
    pub lat: f64,
    pub lon: f64,
    pub time_zones: Vec<TimeZoneSpan>,
    pub tower_heights: Vec<TowerHeightSpan>,
    pub timeres: TimeRes,
    pub sc_negl: Vec<ScNeglSpan>,
    pub notes: Vec<String>,
}

/// Detail keys, in the order the header must present them.
const DETAIL_KEYS: [&str; 9] = [
    "site", "year", "lat", "lon", "timezone", "htower", "timeres", "sc_negl", "notes",
];

impl SiteDetails {
    /// Rows in this site-year.
    pub fn rows_count(&self) -> usize {
        self.timeres.rows_per_year(self.year)
    }

    /// Rows per day at this site's resolution.
    pub fn rows_per_day(&self) -> usize {
        self.timeres.rows_per_day()
    }

    /// Tower height in effect at a zero-based row, if any span applies.
    pub fn tower_height_for_row(&self, row: usize) -> Option<f64> {
        span_for_row(row, self.timeres, self.tower_heights.iter().map(|s| (s.timestamp, s.height)))
    }

    /// Sc-negligible flag in effect at a zero-based row.
    pub fn sc_negl_for_row(&self, row: usize) -> bool {
        span_for_row(
            row,
            self.timeres,
            self.sc_negl.iter().map(|s| (s.timestamp, s.negligible)),
        )
        .unwrap_or(false)
    }

    /// Parse a details block from the start of `text`.
    ///
    /// Returns the details and the number of lines consumed, so the caller
    /// can hand the remainder to the record reader. Blank lines inside the
    /// block are skipped but still counted.
    pub fn parse(text: &str) -> Result<(SiteDetails, usize)> {
        let mut site = None;
        let mut year: Option<i32> = None;
        let mut lat = None;
        let mut lon = None;
        let mut time_zones: Option<Vec<TimeZoneSpan>> = None;
        let mut tower_heights: Option<Vec<TowerHeightSpan>> = None;
        let mut timeres = None;
        let mut sc_negl: Option<Vec<ScNeglSpan>> = None;
        let mut notes: Vec<String> = Vec::new();

        let mut index = 0usize;
        let mut consumed = 0usize;
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                consumed += 1;
                continue;
            }
            let mut parts = trimmed.splitn(2, ',');
            let key = parts.next().unwrap_or("").trim();
            let rest = parts.next().unwrap_or("").trim();

            let expected = DETAIL_KEYS[index.min(DETAIL_KEYS.len() - 1)];
            if !key.eq_ignore_ascii_case(expected) {
                if expected == "notes" {
                    // first data/header line after the details: block is done
                    break;
                }
                return Err(PipelineError::MalformedHeader(format!(
                    "expected '{}' keyword, found '{}'",
                    expected, key
                )));
            }

            match expected {
                "site" => {
                    if rest.len() != 6 || rest.as_bytes().get(2) != Some(&b'-') {
                        return Err(PipelineError::MalformedHeader(format!(
                            "bad site code '{}'",
                            rest
                        )));
                    }
                    site = Some(rest.to_string());
                }
                "year" => {
                    year = Some(rest.parse().map_err(|_| {
                        PipelineError::MalformedHeader(format!("bad year '{}'", rest))
                    })?);
                }
                "lat" => {
                    lat = Some(rest.parse().map_err(|_| {
                        PipelineError::MalformedHeader(format!("bad lat '{}'", rest))
                    })?);
                }
                "lon" => {
                    lon = Some(rest.parse().map_err(|_| {
                        PipelineError::MalformedHeader(format!("bad lon '{}'", rest))
                    })?);
                }
                "timezone" => {
                    let y = year.ok_or_else(|| {
                        PipelineError::MalformedHeader("timezone before year".into())
                    })?;
                    let pairs = parse_pairs(rest, y, "timezone")?;
                    time_zones = Some(
                        pairs
                            .into_iter()
                            .map(|(timestamp, v)| TimeZoneSpan {
                                timestamp,
                                offset: v,
                            })
                            .collect(),
                    );
                }
                "htower" => {
                    let y = year.ok_or_else(|| {
                        PipelineError::MalformedHeader("htower before year".into())
                    })?;
                    let pairs = parse_pairs(rest, y, "htower")?;
                    tower_heights = Some(
                        pairs
                            .into_iter()
                            .map(|(timestamp, v)| TowerHeightSpan {
                                timestamp,
                                height: v,
                            })
                            .collect(),
                    );
                }
                "timeres" => {
                    timeres = Some(TimeRes::parse(rest)?);
                }
                "sc_negl" => {
                    let y = year.ok_or_else(|| {
                        PipelineError::MalformedHeader("sc_negl before year".into())
                    })?;
                    let pairs = parse_pairs(rest, y, "sc_negl")?;
                    sc_negl = Some(
                        pairs
                            .into_iter()
                            .map(|(timestamp, v)| ScNeglSpan {
                                timestamp,
                                negligible: v != 0.0,
                            })
                            .collect(),
                    );
                }
                "notes" => {
                    notes.push(rest.to_string());
                }
                _ => unreachable!(),
            }
            consumed += 1;
            if index < DETAIL_KEYS.len() - 1 {
                index += 1;
            }
        }

        let missing = |k: &str| PipelineError::MalformedHeader(format!("no '{}' keyword found", k));
        let mut details = SiteDetails {
            site: site.ok_or_else(|| missing("site"))?,
            year: year.ok_or_else(|| missing("year"))?,
            lat: lat.ok_or_else(|| missing("lat"))?,
            lon: lon.ok_or_else(|| missing("lon"))?,
            time_zones: time_zones.ok_or_else(|| missing("timezone"))?,
            tower_heights: tower_heights.ok_or_else(|| missing("htower"))?,
            timeres: timeres.ok_or_else(|| missing("timeres"))?,
            sc_negl: sc_negl.ok_or_else(|| missing("sc_negl"))?,
            notes,
        };
        if details.time_zones.is_empty() {
            return Err(PipelineError::MalformedHeader(
                "timezone list is empty".into(),
            ));
        }
        details
            .time_zones
            .sort_by_key(|s| s.timestamp);
        details.tower_heights.sort_by_key(|s| s.timestamp);
        details.sc_negl.sort_by_key(|s| s.timestamp);
        Ok((details, consumed))
    }

    /// Write the details block back out, preserving notes and appending a
    /// processing note.
    pub fn write<W: Write>(&self, w: &mut W, note_to_add: &str) -> Result<()> {
        writeln!(w, "site,{}", self.site)?;
        writeln!(w, "year,{}", self.year)?;
        writeln!(w, "lat,{}", self.lat)?;
        writeln!(w, "lon,{}", self.lon)?;
        write!(w, "timezone")?;
        for s in &self.time_zones {
            write!(w, ",{},{}", s.timestamp.to_compact(), s.offset)?;
        }
        writeln!(w)?;
        write!(w, "htower")?;
        for s in &self.tower_heights {
            write!(w, ",{},{}", s.timestamp.to_compact(), s.height)?;
        }
        writeln!(w)?;
        writeln!(w, "timeres,{}", self.timeres)?;
        write!(w, "sc_negl")?;
        for s in &self.sc_negl {
            write!(
                w,
                ",{},{}",
                s.timestamp.to_compact(),
                if s.negligible { 1 } else { 0 }
            )?;
        }
        writeln!(w)?;
        for n in &self.notes {
            writeln!(w, "notes,{}", n)?;
        }
        if !note_to_add.is_empty() {
            writeln!(w, "notes,{}", note_to_add)?;
        }
        Ok(())
    }
}

/// Parse a comma-separated `(timestamp, value)` pair list. A single bare
/// value means "whole year starting at the first valid row".
fn parse_pairs(rest: &str, year: i32, key: &str) -> Result<Vec<(Timestamp, f64)>> {
    let tokens: Vec<&str> = rest
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    let bad = |what: &str| {
        PipelineError::MalformedHeader(format!("bad '{}' value: {}", key, what))
    };
    if tokens.is_empty() {
        return Err(bad("empty list"));
    }
    if tokens.len() == 1 {
        let v: f64 = tokens[0].parse().map_err(|_| bad(tokens[0]))?;
        return Ok(vec![(Timestamp::new(year, 1, 1, 0, 0), v)]);
    }
    if tokens.len() % 2 != 0 {
        return Err(bad("odd token count"));
    }
    let mut pairs = Vec::with_capacity(tokens.len() / 2);
    for chunk in tokens.chunks(2) {
        let timestamp = Timestamp::parse(chunk[0])?;
        let v: f64 = chunk[1].parse().map_err(|_| bad(chunk[1]))?;
        pairs.push((timestamp, v));
    }
    Ok(pairs)
}

/// Value of the last span whose timestamp is at or before the row.
fn span_for_row<T: Copy>(
    row: usize,
    res: TimeRes,
    spans: impl Iterator<Item = (Timestamp, T)>,
) -> Option<T> {
    let mut current = None;
    for (timestamp, value) in spans {
        let span_row = crate::calendar::row_for_timestamp(&timestamp, res).unwrap_or(0);
        // a span timestamp at the year start labels the whole year
        if span_row <= row || current.is_none() {
            current = Some(value);
        }
        if span_row > row {
            break;
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "site,US-TST\n\
year,2010\n\
lat,40.0\n\
lon,-105.0\n\
timezone,201001010000,-7\n\
htower,201001010000,3.0\n\
timeres,halfhourly\n\
sc_negl,0\n\
notes,created for unit testing\n";

    #[test]
    fn test_parse_minimal_header() {
        let (dd, consumed) = SiteDetails::parse(HEADER).unwrap();
        assert_eq!(dd.site, "US-TST");
        assert_eq!(dd.year, 2010);
        assert_eq!(dd.lat, 40.0);
        assert_eq!(dd.lon, -105.0);
        assert_eq!(dd.timeres, TimeRes::HalfHourly);
        assert_eq!(dd.time_zones.len(), 1);
        assert_eq!(dd.time_zones[0].offset, -7.0);
        assert_eq!(dd.tower_heights[0].height, 3.0);
        assert_eq!(dd.sc_negl.len(), 1);
        assert!(!dd.sc_negl[0].negligible);
        assert_eq!(dd.notes.len(), 1);
        assert_eq!(consumed, 9);
        assert_eq!(dd.rows_count(), 17520);
    }

    #[test]
    fn test_parse_stops_at_data_header() {
        let text = format!("{}TIMESTAMP_START,TIMESTAMP_END,TA\n", HEADER);
        let (_, consumed) = SiteDetails::parse(&text).unwrap();
        assert_eq!(consumed, 9);
    }

    #[test]
    fn test_misordered_keys_rejected() {
        let text = HEADER.replace("year,2010\nlat,40.0", "lat,40.0\nyear,2010");
        assert!(SiteDetails::parse(&text).is_err());
    }

    #[test]
    fn test_bad_site_code_rejected() {
        let text = HEADER.replace("US-TST", "USTST1");
        assert!(SiteDetails::parse(&text).is_err());
    }

    #[test]
    fn test_unsupported_timeres_rejected() {
        let text = HEADER.replace("halfhourly", "daily");
        assert!(SiteDetails::parse(&text).is_err());
    }

    #[test]
    fn test_timezone_pairs_sorted() {
        let text = HEADER.replace(
            "timezone,201001010000,-7",
            "timezone,201006150000,-6,201001010000,-7",
        );
        let (dd, _) = SiteDetails::parse(&text).unwrap();
        assert_eq!(dd.time_zones.len(), 2);
        assert_eq!(dd.time_zones[0].offset, -7.0);
        assert_eq!(dd.time_zones[1].offset, -6.0);
    }

    #[test]
    fn test_span_lookup() {
        let text = HEADER.replace(
            "htower,201001010000,3.0",
            "htower,201001010000,3.0,201007010000,5.0",
        );
        let (dd, _) = SiteDetails::parse(&text).unwrap();
        assert_eq!(dd.tower_height_for_row(0), Some(3.0));
        assert_eq!(dd.tower_height_for_row(17519), Some(5.0));
    }

    #[test]
    fn test_write_round_trip() {
        let (dd, _) = SiteDetails::parse(HEADER).unwrap();
        let mut out = Vec::new();
        dd.write(&mut out, "reprocessed").unwrap();
        let text = String::from_utf8(out).unwrap();
        let (dd2, _) = SiteDetails::parse(&text).unwrap();
        assert_eq!(dd.site, dd2.site);
        assert_eq!(dd.year, dd2.year);
        assert_eq!(dd2.notes.len(), 2);
    }
}
