use std::path::PathBuf;
use std::time::SystemTime;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use futures::SinkExt;
use futures::channel::mpsc::Sender;
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::LocationError;
use crate::location::types::{PositionFix, UNKNOWN};

const KNOTS_TO_METERS_PER_SECOND: f64 = 0.514_444;

/// Nominal receiver error (meters) that HDOP is multiplied with to estimate horizontal accuracy.
const USER_EQUIVALENT_RANGE_ERROR: f64 = 5.0;

fn checksum_ok(sentence: &str) -> bool {
    let Some((body, checksum)) = sentence.split_once('*') else {
        // checksum is optional
        return true;
    };

    let Ok(expected) = u8::from_str_radix(checksum.trim(), 16) else {
        return false;
    };

    body.bytes().fold(0u8, |acc, byte| acc ^ byte) == expected
}

// ddmm.mmmm / dddmm.mmmm plus hemisphere => signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    let dot = value.find('.').unwrap_or(value.len());
    if dot < 3 {
        return None;
    }

    let degrees: f64 = value.get(..dot - 2)?.parse().ok()?;
    let minutes: f64 = value.get(dot - 2..)?.parse().ok()?;
    let magnitude = degrees + minutes / 60.0;

    match hemisphere {
        "N" | "E" => Some(magnitude),
        "S" | "W" => Some(-magnitude),
        _ => None,
    }
}

// hhmmss.ss + ddmmyy => time of the fix
fn parse_timestamp(time: &str, date: &str) -> Option<SystemTime> {
    if date.len() != 6 {
        return None;
    }

    let hours: u32 = time.get(0..2)?.parse().ok()?;
    let minutes: u32 = time.get(2..4)?.parse().ok()?;
    let seconds: f64 = time.get(4..)?.parse().ok()?;
    if !(0.0..60.0).contains(&seconds) {
        return None;
    }
    let micros = ((seconds.fract() * 1_000_000.0).round() as u32).min(999_999);

    let day: u32 = date.get(0..2)?.parse().ok()?;
    let month: u32 = date.get(2..4)?.parse().ok()?;
    let year: i32 = match date.get(4..6)?.parse::<i32>().ok()? {
        // two digit year, pivot at 1980
        short if short < 80 => 2000 + short,
        short => 1900 + short,
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_micro_opt(hours, minutes, seconds.trunc() as u32, micros)?;
    Some(SystemTime::from(Utc.from_utc_datetime(&NaiveDateTime::new(date, time))))
}

/// Turns NMEA 0183 sentences into position fixes.
///
/// `RMC` sentences produce fixes; `GGA` sentences only update the horizontal dilution of
/// precision that is used to estimate the accuracy of the next fix.
#[derive(Debug, Default)]
pub struct NmeaParser {
    last_hdop: Option<f64>,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, line: &str) -> Option<PositionFix> {
        let line = line.trim();
        if !line.is_ascii() {
            debug!("Dropping non ascii NMEA line");
            return None;
        }

        let sentence = line.strip_prefix('$')?;
        if !checksum_ok(sentence) {
            debug!("Dropping NMEA sentence with bad checksum: {}", line);
            return None;
        }

        let body = sentence.split('*').next().unwrap_or(sentence);
        let fields: Vec<&str> = body.split(',').collect();
        let kind = fields.first()?;

        if kind.ends_with("GGA") {
            self.last_hdop = fields.get(8).and_then(|hdop| hdop.parse::<f64>().ok());
            None
        } else if kind.ends_with("RMC") {
            self.parse_rmc(&fields)
        } else {
            None
        }
    }

    fn parse_rmc(&self, fields: &[&str]) -> Option<PositionFix> {
        if fields.len() < 10 || fields[2] != "A" {
            return None;
        }

        let latitude = parse_coordinate(fields[3], fields[4])?;
        let longitude = parse_coordinate(fields[5], fields[6])?;
        let speed = fields[7]
            .parse::<f64>()
            .map(|knots| knots * KNOTS_TO_METERS_PER_SECOND)
            .unwrap_or(UNKNOWN);

        Some(PositionFix {
            latitude,
            longitude,
            horizontal_accuracy: self.last_hdop.map(|hdop| hdop * USER_EQUIVALENT_RANGE_ERROR).unwrap_or(UNKNOWN),
            speed,
            timestamp: parse_timestamp(fields[1], fields[9]).unwrap_or_else(SystemTime::now),
        })
    }
}

/// Follows an NMEA stream (a serial device or a recorded file) and forwards every fix.
pub fn nmea_reader_task(cancel: CancellationToken, path: PathBuf, mut sender: Sender<PositionFix>) -> JoinHandle<Result<(), LocationError>> {
    spawn(async move {
        let file = File::open(&path)
            .await
            .map_err(|source| LocationError::IOError { path: path.clone(), source })?;
        let mut lines = BufReader::new(file).lines();
        let mut parser = NmeaParser::new();

        info!("Reading positions from {}", path.to_string_lossy());

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(fix) = parser.parse_line(&line) {
                            if sender.send(fix).await.is_err() {
                                break 'mainloop;
                            }
                        }
                    },
                    Ok(None) => {
                        info!("Position source {} reached its end", path.to_string_lossy());
                        break 'mainloop;
                    },
                    Err(source) => {
                        warn!("Failed to read position source: {}", source);
                        return Err(LocationError::IOError { path, source });
                    },
                },
            }
        }

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use futures::StreamExt;
    use futures::channel::mpsc::channel;

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    #[test]
    fn parses_rmc() {
        let mut parser = NmeaParser::new();
        let fix = parser.parse_line(RMC).unwrap();

        assert!((fix.latitude - 48.1173).abs() < 1e-6);
        assert!((fix.longitude - 11.516_666_7).abs() < 1e-6);
        assert!((fix.speed - 22.4 * KNOTS_TO_METERS_PER_SECOND).abs() < 1e-9);
        assert_eq!(fix.accuracy(), None);
        // 1994-03-23T12:35:19Z
        assert_eq!(fix.timestamp, SystemTime::UNIX_EPOCH + Duration::from_secs(764_426_119));
    }

    #[test]
    fn gga_hdop_feeds_accuracy() {
        let mut parser = NmeaParser::new();
        assert!(parser.parse_line(GGA).is_none());

        let fix = parser.parse_line(RMC).unwrap();
        assert!((fix.horizontal_accuracy - 4.5).abs() < 1e-9);
    }

    #[test]
    fn southern_and_western_hemispheres_are_negative() {
        let mut parser = NmeaParser::new();
        let fix = parser.parse_line("$GNRMC,000000,A,3352.000,S,15112.000,W,,,010124,,").unwrap();

        assert!((fix.latitude + 33.866_666_7).abs() < 1e-6);
        assert!((fix.longitude + 151.2).abs() < 1e-6);
        assert_eq!(fix.speed_kmh(), None);
    }

    #[test]
    fn rejects_void_and_corrupt_sentences() {
        let mut parser = NmeaParser::new();

        assert!(parser.parse_line("$GPRMC,123519,V,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W").is_none());
        assert!(parser.parse_line("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*00").is_none());
        assert!(parser.parse_line("GPRMC without dollar").is_none());
        assert!(parser.parse_line("$GPRMC,123519,A,48,N,01131.000,E,022.4,084.4,230394,003.1,W").is_none());
        assert!(parser.parse_line("").is_none());
    }

    #[test]
    fn timestamps() {
        assert_eq!(parse_timestamp("000000", "010180"), Some(SystemTime::UNIX_EPOCH + Duration::from_secs(315_532_800)));
        // 2024-01-01T00:00:00.5Z
        assert_eq!(
            parse_timestamp("000000.50", "010124"),
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_704_067_200) + Duration::from_millis(500)),
        );
    }

    #[test]
    fn impossible_dates_and_times_are_rejected() {
        assert_eq!(parse_timestamp("123519", "310294"), None);
        assert_eq!(parse_timestamp("123519", "290223"), None);
        assert_eq!(parse_timestamp("243519", "230394"), None);
        assert_eq!(parse_timestamp("123560", "230394"), None);
        assert_eq!(parse_timestamp("12", "230394"), None);
        assert!(parse_timestamp("123519", "290224").is_some());
    }

    #[test]
    fn garbled_lines_are_dropped() {
        let mut parser = NmeaParser::new();

        assert!(parser.parse_line("$GPRMC,123519,A,xé1.5,N,01131.000,E,022.4,084.4,230394,003.1,W").is_none());
        assert!(parser.parse_line("$GPRMC,12é519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W").is_none());
        assert!(parser.parse_line("$GPRMC,\u{fffd}\u{fffd},A").is_none());

        // the parser keeps working afterwards
        assert!(parser.parse_line(RMC).is_some());
    }

    #[tokio::test]
    async fn reader_forwards_fixes_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.nmea");
        std::fs::write(&path, format!("{}\n{}\ngarbage\n{}\n", GGA, RMC, RMC)).unwrap();

        let (sender, mut receiver) = channel::<PositionFix>(8);
        let handle = nmea_reader_task(CancellationToken::new(), path, sender);

        handle.await.unwrap().unwrap();
        let fixes: Vec<PositionFix> = receiver.by_ref().collect().await;
        assert_eq!(fixes.len(), 2);
        assert!((fixes[0].horizontal_accuracy - 4.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reader_reports_missing_source() {
        let (sender, _receiver) = channel::<PositionFix>(1);
        let handle = nmea_reader_task(CancellationToken::new(), PathBuf::from("/nonexistent/gps"), sender);

        assert!(matches!(handle.await.unwrap(), Err(LocationError::IOError { .. })));
    }
}
