use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::SystemTime;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::executor::block_on;
use log::{error, info, LevelFilter};
use tokio_util::sync::CancellationToken;
use pothole_tracker::{init_logging, run, RunOptions};
use pothole_tracker::device::constants::COMMAND_SLEEP;
use pothole_tracker::error::{error_message, AppRunError};
use pothole_tracker::events::{AppEvent, DevLog, EventSink};
use pothole_tracker::location::types::PositionFix;
use pothole_tracker::tracking::types::{Command, TrackingSnapshot};

const EVENT_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 16;

const HELP: &str = "\
commands:
  start                 start GPS tracking, uploads and BLE scanning
  stop                  stop everything
  scan                  scan for the peripheral again
  disconnect            drop the BLE connection
  send <text>           write text to the peripheral
  control <text>        write a control command to the peripheral
  sleep                 send the sleep control command
  fix <lat> <lon>       push a position fix
  status                print the current state
  logs                  print the log lines shown so far
  clear                 clear the log lines
  quit                  exit";

/// Tracks GPS positions, uploads them and talks to a BLE sensor.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the .env config file
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// NMEA position source, for example a serial GPS receiver
    #[arg(long)]
    gps_device: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    /// Start tracking immediately
    #[arg(long)]
    start: bool,
}

#[derive(Debug, PartialEq)]
enum ConsoleCommand {
    Core(Command),
    Logs,
    Clear,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "start" => Command::StartTracking,
        "stop" => Command::StopTracking,
        "scan" => Command::Scan,
        "disconnect" => Command::Disconnect,
        "send" if !rest.is_empty() => Command::Send(rest.to_string()),
        "control" if !rest.is_empty() => Command::SendControl(rest.to_string()),
        "sleep" => Command::SendControl(COMMAND_SLEEP.to_string()),
        "fix" => {
            let mut parts = rest.split_whitespace().map(str::parse::<f64>);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(Ok(latitude)), Some(Ok(longitude)), None) => {
                    Command::PushFix(PositionFix::new(latitude, longitude, SystemTime::now()))
                },
                _ => return Err("usage: fix <lat> <lon>".to_string()),
            }
        },
        "status" => Command::Status,
        "logs" => return Ok(ConsoleCommand::Logs),
        "clear" => return Ok(ConsoleCommand::Clear),
        "help" | "" => return Ok(ConsoleCommand::Help),
        "quit" | "exit" => return Ok(ConsoleCommand::Quit),
        "send" | "control" => return Err(format!("usage: {} <text>", word)),
        _ => return Err(format!("unknown command {:?}, type help", word)),
    };
    Ok(ConsoleCommand::Core(command))
}

fn describe_snapshot(snapshot: &TrackingSnapshot) -> String {
    let mut lines = vec![format!("Session: {}", snapshot.session_id)];

    let session = &snapshot.session;
    lines.push(format!("BLE: {} ({:?})", session.status_text, session.state));
    for device in &session.devices {
        lines.push(format!("  #{} {} rssi {} [{}]", device.id, device.name, device.rssi, device.identifier));
    }
    if !session.received_text.is_empty() {
        lines.push(format!("Received: {}", session.received_text));
    }

    let location = &snapshot.location;
    let tracking = if location.is_tracking { "tracking" } else { "not tracking" };
    match &location.latest {
        Some(fix) => lines.push(format!(
            "GPS: {} ({:?}), {:.6}, {:.6}",
            tracking, location.authorization, fix.latitude, fix.longitude,
        )),
        None => lines.push(format!("GPS: {} ({:?}), no fix", tracking, location.authorization)),
    }

    let upload = &snapshot.upload;
    let last = upload
        .last_upload_time
        .map(|time| humantime::format_rfc3339_seconds(time).to_string())
        .unwrap_or_else(|| "never".to_string());
    let server = if upload.is_connected { "connected" } else { "not connected" };
    lines.push(format!("Uploads: {} (last {}), server {}", upload.upload_count, last, server));

    lines.join("\n")
}

async fn print_events(mut events: Receiver<AppEvent>, dev_log: Arc<Mutex<DevLog>>) {
    let mut last_status = String::new();

    while let Some(event) = events.next().await {
        match event {
            AppEvent::Log(line) => {
                println!("{}", line);
                dev_log.lock().expect("Failed to lock dev log").push(&line);
            },
            AppEvent::Session(status) => {
                if status.status_text != last_status {
                    println!("BLE: {}", status.status_text);
                    last_status = status.status_text;
                }
            },
            AppEvent::Location(_) => {},
            AppEvent::Upload(stats) => {
                println!("Uploads: {} (server {})", stats.upload_count, if stats.is_connected { "connected" } else { "not connected" });
            },
            AppEvent::Snapshot(snapshot) => println!("{}", describe_snapshot(&snapshot)),
        }
    }
}

// stdin reads can not be cancelled, so this runs on its own thread instead of the runtime
fn read_commands(mut commands: Sender<Command>, dev_log: Arc<Mutex<DevLog>>) {
    let stdin = std::io::stdin();

    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };

        let command = match parse_command(&line) {
            Ok(ConsoleCommand::Core(command)) => command,
            Ok(ConsoleCommand::Logs) => {
                for line in dev_log.lock().expect("Failed to lock dev log").lines() {
                    println!("{}", line);
                }
                continue;
            },
            Ok(ConsoleCommand::Clear) => {
                dev_log.lock().expect("Failed to lock dev log").clear();
                continue;
            },
            Ok(ConsoleCommand::Help) => {
                println!("{}", HELP);
                continue;
            },
            Ok(ConsoleCommand::Quit) => Command::Shutdown,
            Err(message) => {
                println!("{}", message);
                continue;
            },
        };

        let shutdown = command == Command::Shutdown;
        if block_on(commands.send(command)).is_err() || shutdown {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("Pothole Tracker ", env!("CARGO_PKG_VERSION")));

    let cancel = CancellationToken::new();
    let dev_log = Arc::new(Mutex::new(DevLog::default()));

    let mut sink = EventSink::new();
    let events = sink.subscribe(EVENT_BUFFER);
    tokio::spawn(print_events(events, dev_log.clone()));

    let (command_sender, commands) = channel::<Command>(COMMAND_BUFFER);
    thread::spawn(move || read_commands(command_sender, dev_log));

    let interrupt_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            interrupt_cancel.cancel();
        }
    });

    let options = RunOptions {
        env_file: args.env_file,
        gps_device: args.gps_device,
        start: args.start,
    };

    println!("{}", HELP);
    match run(options, sink, commands, cancel).await {
        Err(err) => {
            error!("{}", error_message("Unexpected error", &err));
            Err(err)
        },
        Ok(()) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pothole_tracker::device::types::{ConnectionState, SessionStatus};
    use pothole_tracker::location::types::{AuthorizationStatus, LocationStatus};
    use pothole_tracker::upload::types::UploadStats;

    #[test]
    fn parses_core_commands() {
        assert_eq!(parse_command("start"), Ok(ConsoleCommand::Core(Command::StartTracking)));
        assert_eq!(parse_command("  stop "), Ok(ConsoleCommand::Core(Command::StopTracking)));
        assert_eq!(parse_command("send hello world"), Ok(ConsoleCommand::Core(Command::Send("hello world".to_string()))));
        assert_eq!(parse_command("sleep"), Ok(ConsoleCommand::Core(Command::SendControl("sleep".to_string()))));
        assert_eq!(parse_command("control reset"), Ok(ConsoleCommand::Core(Command::SendControl("reset".to_string()))));
        assert_eq!(parse_command("quit"), Ok(ConsoleCommand::Quit));
        assert_eq!(parse_command(""), Ok(ConsoleCommand::Help));
    }

    #[test]
    fn parses_position_fixes() {
        match parse_command("fix 52.37 4.89") {
            Ok(ConsoleCommand::Core(Command::PushFix(fix))) => {
                assert_eq!(fix.latitude, 52.37);
                assert_eq!(fix.longitude, 4.89);
            },
            other => panic!("unexpected {:?}", other),
        }

        assert!(parse_command("fix 52.37").is_err());
        assert!(parse_command("fix north 4.89").is_err());
        assert!(parse_command("fix 1 2 3").is_err());
    }

    #[test]
    fn rejects_incomplete_commands() {
        assert!(parse_command("send").is_err());
        assert!(parse_command("control   ").is_err());
        assert!(parse_command("launch").is_err());
    }

    #[test]
    fn snapshot_description() {
        let snapshot = TrackingSnapshot {
            session_id: "CAR001".to_string(),
            session: SessionStatus {
                state: ConnectionState::Disconnected,
                status_text: "Ready to connect".to_string(),
                radio_on: true,
                is_connected: false,
                received_text: String::new(),
                devices: Vec::new(),
            },
            location: LocationStatus {
                authorization: AuthorizationStatus::Authorized,
                is_tracking: true,
                latest: Some(PositionFix::new(52.37, 4.89, SystemTime::UNIX_EPOCH)),
            },
            upload: UploadStats::default(),
        };

        let description = describe_snapshot(&snapshot);
        assert!(description.contains("Session: CAR001"), "{}", description);
        assert!(description.contains("BLE: Ready to connect"), "{}", description);
        assert!(description.contains("52.370000, 4.890000"), "{}", description);
        assert!(description.contains("Uploads: 0 (last never), server not connected"), "{}", description);
    }
}
