use std::collections::VecDeque;
use std::time::SystemTime;
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::debug;

use crate::device::types::SessionStatus;
use crate::location::types::LocationStatus;
use crate::tracking::types::TrackingSnapshot;
use crate::upload::types::UploadStats;

/// Everything the core publishes for a front-end to display.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Log(String),
    Session(SessionStatus),
    Location(LocationStatus),
    Upload(UploadStats),
    Snapshot(TrackingSnapshot),
}

/// Fans events out to every subscriber. Full or closed subscribers miss the event.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    senders: Vec<Sender<AppEvent>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, buffer: usize) -> Receiver<AppEvent> {
        let (sender, receiver) = channel::<AppEvent>(buffer);
        self.senders.push(sender);
        receiver
    }

    pub fn emit(&mut self, event: AppEvent) {
        self.senders.retain(|sender| !sender.is_closed());

        for sender in &mut self.senders {
            if let Err(err) = sender.try_send(event.clone()) {
                debug!("Dropping event for slow subscriber: {}", err);
            }
        }
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.emit(AppEvent::Log(line.into()));
    }
}

pub const DEV_LOG_CAPACITY: usize = 100;

/// The most recent log lines, each prefixed with the time it was recorded.
#[derive(Debug, Clone)]
pub struct DevLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DevLog {
    pub fn new(capacity: usize) -> Self {
        DevLog { lines: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, message: &str) {
        self.push_at(SystemTime::now(), message);
    }

    pub fn push_at(&mut self, time: SystemTime, message: &str) {
        self.lines.push_back(format!("[{}] {}", humantime::format_rfc3339_seconds(time), message));
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for DevLog {
    fn default() -> Self {
        DevLog::new(DEV_LOG_CAPACITY)
    }
}
