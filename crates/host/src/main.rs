mod commands;
mod config;
mod events;
mod recorder;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};

use commands::Command;
use config::AppConfig;
use emotilink::{ConnectionState, WifiHost};
use recorder::PacketRecorder;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "emotilink-host")]
#[command(about = "Discovers EmotiBit sensors on the local network and streams their data")]
struct Args {
    #[arg(short, long, help = "TOML settings file")]
    config: Option<PathBuf>,

    #[arg(long)]
    advertising_port: Option<u16>,

    #[arg(long, help = "First data port tried; the control port follows it")]
    data_port: Option<u16>,

    #[arg(long)]
    no_broadcast: bool,

    #[arg(long)]
    no_unicast: bool,

    #[arg(long, help = "Connect to this device as soon as it is discovered")]
    connect: Option<String>,

    #[arg(long, help = "Append every received data record to this file")]
    record: Option<PathBuf>,

    #[arg(short, long, help = "Print every packet and sample")]
    verbose: bool,

    #[arg(long, help = "Run without reading commands from stdin")]
    headless: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let app_config = AppConfig::load(args.config.as_deref())?;
    let mut config = app_config.host_config();
    if let Some(port) = args.advertising_port {
        config.ports.advertising_port = port;
    }
    if let Some(port) = args.data_port {
        config.ports.data_port = port;
    }
    if args.no_broadcast {
        config.wifi.enable_broadcast = false;
    }
    if args.no_unicast {
        config.wifi.enable_unicast = false;
    }
    if !config.wifi.enable_broadcast && !config.wifi.enable_unicast {
        log::warn!("Broadcast and unicast are both off, no device will be discovered");
    }

    let mut host = WifiHost::new(config, app_config.frequencies());
    host.begin()?;

    let mut recorder = args.record.as_deref().map(PacketRecorder::open).transpose()?;
    let lines = if args.headless {
        None
    } else {
        println!("{}", commands::HELP);
        Some(spawn_stdin_reader())
    };

    let mut app = App {
        host: &host,
        pending_connect: args.connect,
        verbose: args.verbose,
    };
    let result = app.run(lines, recorder.as_mut());

    if let Some(recorder) = &recorder {
        log::info!("Recorded {} records", recorder.written());
    }
    host.stop();
    result
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

struct App<'a> {
    host: &'a WifiHost,
    pending_connect: Option<String>,
    verbose: bool,
}

impl App<'_> {
    fn run(
        &mut self,
        lines: Option<Receiver<String>>,
        mut recorder: Option<&mut PacketRecorder>,
    ) -> Result<()> {
        let events = self.host.events();
        loop {
            for event in events.try_iter() {
                if let Some(text) = events::describe(&event, self.verbose) {
                    log::info!("{text}");
                }
            }

            let records = self.host.read_data();
            if let Some(recorder) = recorder.as_deref_mut() {
                recorder.append(&records)?;
            }

            self.try_pending_connect();

            let Some(lines) = &lines else {
                thread::sleep(POLL_INTERVAL);
                continue;
            };
            match lines.recv_timeout(POLL_INTERVAL) {
                Ok(line) => match commands::parse(&line) {
                    Ok(Some(Command::Quit)) => return Ok(()),
                    Ok(Some(command)) => self.execute(command),
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    fn try_pending_connect(&mut self) {
        let Some(device_id) = self.pending_connect.as_deref() else {
            return;
        };
        if self.host.state() != ConnectionState::Idle
            || !self
                .host
                .discovered_devices()
                .iter()
                .any(|d| d.device_id == device_id && d.is_available)
        {
            return;
        }
        match self.host.connect_to_device(device_id) {
            Ok(()) => self.pending_connect = None,
            Err(e) => log::warn!("Connect to {device_id} failed: {e}"),
        }
    }

    fn execute(&mut self, command: Command) {
        let result = match command {
            Command::List => {
                let devices = self.host.discovered_devices();
                if devices.is_empty() {
                    println!("no devices discovered yet");
                }
                for device in devices {
                    let availability = if device.is_available {
                        "available"
                    } else {
                        "busy"
                    };
                    println!("  {} {} {availability}", device.device_id, device.ip);
                }
                Ok(())
            }
            Command::Connect(device_id) => self.host.connect_to_device(&device_id),
            Command::Disconnect => {
                self.pending_connect = None;
                self.host.disconnect_from_device()
            }
            Command::RecordStart => self.host.start_recording_on_sd(),
            Command::RecordStop => self.host.stop_recording_on_sd(),
            Command::Note(note) => self.host.send_note(&note),
            Command::Status => {
                self.print_status();
                Ok(())
            }
            Command::Help => {
                println!("{}", commands::HELP);
                Ok(())
            }
            Command::Quit => Ok(()),
        };
        if let Err(e) = result {
            println!("error: {e}");
        }
    }

    fn print_status(&self) {
        let host = self.host;
        match host.session() {
            Some(session) => println!(
                "state {:?}, device {}, ip {}",
                session.phase(),
                session.device_id().unwrap_or("-"),
                session
                    .ip()
                    .map_or_else(|| "-".to_string(), |ip| ip.to_string())
            ),
            None => println!("host not running"),
        }
        if let (Some(data), Some(control)) = (host.data_port(), host.control_port()) {
            println!("data port {data}, control port {control}");
        }
        let stats = host.ingest_stats();
        println!(
            "datagrams {} (dropped {}), packets {}, duplicates {}, malformed {}, empty {}",
            stats.datagrams,
            stats.dropped_datagrams,
            stats.packets,
            stats.duplicates,
            stats.malformed,
            stats.empty
        );
        if host.dropped_events() > 0 {
            println!("events dropped {}", host.dropped_events());
        }
    }
}
