use std::time::{Duration, SystemTime};
use log::{debug, info, warn};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::types::UploadSettings;
use crate::location::types::PositionFix;
use crate::upload::types::{UploadOutcome, UploadRecord, UploadStats, RECORD_TYPE_GPS};

/// A timer that first fires one period from now, then every period.
pub fn upload_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Decides on every tick whether the current position is worth sending.
///
/// The last considered fix moves forward as soon as a send is decided, not when the server
/// accepts it, so a failed upload is never repeated for the same position.
pub struct UploadScheduler {
    session_id: String,
    min_distance: f64,
    last_considered: Option<PositionFix>,
    stats: UploadStats,
}

impl UploadScheduler {
    pub fn new(settings: &UploadSettings) -> Self {
        UploadScheduler {
            session_id: settings.session_id.clone(),
            min_distance: settings.min_distance,
            last_considered: None,
            stats: UploadStats::default(),
        }
    }

    pub fn stats(&self) -> &UploadStats {
        &self.stats
    }

    pub fn last_considered(&self) -> Option<&PositionFix> {
        self.last_considered.as_ref()
    }

    pub fn should_upload(&self, fix: &PositionFix) -> bool {
        match &self.last_considered {
            None => true,
            Some(last) => fix.distance_to(last) > self.min_distance,
        }
    }

    /// Returns the record to send for this tick, if any.
    pub fn tick(&mut self, fix: Option<&PositionFix>, now: SystemTime) -> Option<UploadRecord> {
        let fix = fix?;

        if !self.should_upload(fix) {
            debug!("Moved less than {} m, not uploading", self.min_distance);
            return None;
        }

        let record = UploadRecord {
            session_id: self.session_id.clone(),
            kind: RECORD_TYPE_GPS.to_string(),
            timestamp: unix_seconds(now),
            lat: fix.latitude,
            lon: fix.longitude,
        };
        self.last_considered = Some(*fix);

        info!("Uploading GPS: {}, {} @ {}", record.lat, record.lon, record.timestamp);
        Some(record)
    }

    pub fn handle_outcome(&mut self, outcome: &UploadOutcome, now: SystemTime) {
        if outcome.is_success() {
            self.stats.is_connected = true;
            self.stats.last_upload_time = Some(now);
            self.stats.upload_count += 1;
        } else {
            warn!("Upload failed: {:?}", outcome);
            self.stats.is_connected = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Settings;

    fn scheduler() -> UploadScheduler {
        UploadScheduler::new(&Settings::default().upload)
    }

    fn at(seconds: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + seconds)
    }

    fn fix(latitude: f64, longitude: f64, seconds: u64) -> PositionFix {
        PositionFix::new(latitude, longitude, at(seconds))
    }

    #[test]
    fn no_fix_no_upload() {
        let mut scheduler = scheduler();
        assert_eq!(scheduler.tick(None, at(0)), None);
        assert!(scheduler.last_considered().is_none());
    }

    #[test]
    fn first_fix_always_uploads() {
        let mut scheduler = scheduler();
        let record = scheduler.tick(Some(&fix(0.0, 0.0, 0)), at(0)).unwrap();

        assert_eq!(record.session_id, "CAR001");
        assert_eq!(record.kind, "gps");
        assert_eq!(record.timestamp, 1_700_000_000);
        assert_eq!((record.lat, record.lon), (0.0, 0.0));
    }

    #[test]
    fn small_movement_is_skipped() {
        let mut scheduler = scheduler();
        assert!(scheduler.tick(Some(&fix(0.0, 0.0, 0)), at(0)).is_some());
        assert!(scheduler.tick(Some(&fix(0.0, 0.00003, 2)), at(2)).is_none());
        assert_eq!(scheduler.last_considered().map(|f| f.longitude), Some(0.0));
    }

    #[test]
    fn large_movement_uploads_new_position() {
        let mut scheduler = scheduler();
        assert!(scheduler.tick(Some(&fix(0.0, 0.0, 0)), at(0)).is_some());

        let record = scheduler.tick(Some(&fix(0.0, 0.0001, 2)), at(2)).unwrap();
        assert_eq!((record.lat, record.lon), (0.0, 0.0001));
        assert_eq!(record.timestamp, 1_700_000_002);
    }

    #[test]
    fn same_fix_is_not_sent_twice() {
        let mut scheduler = scheduler();
        let position = fix(10.0, 10.0, 0);

        assert!(scheduler.tick(Some(&position), at(0)).is_some());
        assert!(scheduler.tick(Some(&position), at(2)).is_none());
        assert!(scheduler.tick(Some(&position), at(4)).is_none());
    }

    #[test]
    fn success_counts_and_stamps() {
        let mut scheduler = scheduler();
        scheduler.handle_outcome(&UploadOutcome::Status(200), at(3));
        scheduler.handle_outcome(&UploadOutcome::Status(200), at(5));

        assert_eq!(scheduler.stats().upload_count, 2);
        assert_eq!(scheduler.stats().last_upload_time, Some(at(5)));
        assert!(scheduler.stats().is_connected);
    }

    #[test]
    fn failure_clears_connectivity_and_keeps_position() {
        let mut scheduler = scheduler();
        assert!(scheduler.tick(Some(&fix(0.0, 0.0, 0)), at(0)).is_some());
        scheduler.handle_outcome(&UploadOutcome::Status(200), at(0));

        assert!(scheduler.tick(Some(&fix(0.0, 0.0001, 2)), at(2)).is_some());
        scheduler.handle_outcome(&UploadOutcome::Status(500), at(2));

        assert_eq!(scheduler.stats().upload_count, 1);
        assert_eq!(scheduler.stats().last_upload_time, Some(at(0)));
        assert!(!scheduler.stats().is_connected);
        // no retry at the failed position
        assert_eq!(scheduler.last_considered().map(|f| f.longitude), Some(0.0001));
        assert!(scheduler.tick(Some(&fix(0.0, 0.0001, 4)), at(4)).is_none());

        scheduler.handle_outcome(&UploadOutcome::Transport("connection refused".to_string()), at(4));
        assert_eq!(scheduler.stats().upload_count, 1);
        assert!(!scheduler.stats().is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_waits_one_period_before_first_tick() {
        let start = Instant::now();
        let mut timer = upload_timer(Duration::from_secs(2));

        timer.tick().await;
        let first = start.elapsed();
        assert!(first >= Duration::from_secs(2) && first < Duration::from_secs(3), "{:?}", first);

        timer.tick().await;
        let second = start.elapsed();
        assert!(second >= Duration::from_secs(4) && second < Duration::from_secs(5), "{:?}", second);
    }
}
