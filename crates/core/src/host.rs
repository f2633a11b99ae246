use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::buffer::DoubleBuffer;
use crate::config::{HostConfig, WifiHostSettings};
use crate::discovery::{DeviceRecord, DeviceTable, DiscoveryEngine, Inbound};
use crate::error::{HostError, Result};
use crate::event::{EVENT_CHANNEL_CAPACITY, EventSender, HostEvent, event_channel};
use crate::ingest::{ChannelFrequencies, DataIngestion, IngestCounters, IngestStats};
use crate::net::{
    Channel, ControlPoll, LocalAddressSource, MAX_DATAGRAM_SIZE, NetworkTransport,
    SystemAddresses,
};
use crate::packet::{
    DEFAULT_DATA_RELIABILITY, DEFAULT_PROTOCOL_VERSION, PACKET_DELIMITER, PAYLOAD_DELIMITER,
    encode, local_timestamp, type_tag,
};
use crate::session::{ConnectionManager, ConnectionState, SessionState};

const RECORDING_ORDERED_NOTE: &str = "Recording ordered";

struct Worker {
    name: &'static str,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn<F>(name: &'static str, body: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))?;
        Ok(Self { name, stop, handle })
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn join(self) {
        if self.handle.join().is_err() {
            log::error!("{} thread panicked", self.name);
        }
    }
}

/// Everything that only exists between `begin()` and `stop()`.
struct Running {
    workers: Vec<Worker>,
    session: Arc<ConnectionManager>,
    transport: Arc<NetworkTransport>,
    counters: Arc<IngestCounters>,
}

/// Host side of the EmotiBit WiFi protocol: discovers devices, holds one
/// session and collects its data stream.
pub struct WifiHost {
    config: HostConfig,
    frequencies: Arc<ChannelFrequencies>,
    source: Arc<dyn LocalAddressSource>,
    table: Arc<DeviceTable>,
    buffer: Arc<DoubleBuffer<String>>,
    events: EventSender,
    receiver: Receiver<HostEvent>,
    running: Option<Running>,
}

impl WifiHost {
    pub fn new(config: HostConfig, frequencies: ChannelFrequencies) -> Self {
        let (events, receiver) = event_channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            frequencies: Arc::new(frequencies),
            source: Arc::new(SystemAddresses),
            table: Arc::new(DeviceTable::new()),
            buffer: Arc::new(DoubleBuffer::new()),
            events,
            receiver,
            running: None,
        }
    }

    /// Replaces adapter enumeration, e.g. with a fixed list in tests.
    pub fn with_address_source(mut self, source: impl LocalAddressSource + 'static) -> Self {
        self.source = Arc::new(source);
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Binds the sockets and starts the advertising, data and control
    /// threads.
    pub fn begin(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(HostError::AlreadyRunning);
        }

        let mut discovery = DiscoveryEngine::new(
            &self.config.wifi,
            &self.config.timings,
            Arc::clone(&self.table),
            Arc::clone(&self.source),
            self.events.clone(),
        );
        discovery.refresh_networks()?;

        let transport = Arc::new(NetworkTransport::bind(&self.config.ports)?);
        let session = Arc::new(ConnectionManager::new(
            Arc::clone(&transport),
            Arc::clone(&self.table),
            self.config.timings.clone(),
            self.events.clone(),
        ));
        let ingestion = DataIngestion::new(
            Arc::clone(&transport),
            Arc::clone(&session),
            Arc::clone(&self.buffer),
            Arc::clone(&self.frequencies),
            self.config.timestamp_format.clone(),
            self.events.clone(),
        );
        let counters = ingestion.counters();

        let workers = match self.spawn_workers(discovery, ingestion, &transport, &session) {
            Ok(workers) => workers,
            Err(e) => {
                session.shutdown();
                return Err(e.into());
            }
        };

        self.events.log(format!(
            "Host started: data port {}, control port {}",
            transport.data_port(),
            transport.control_port()
        ));
        self.running = Some(Running {
            workers,
            session,
            transport,
            counters,
        });
        Ok(())
    }

    fn spawn_workers(
        &self,
        discovery: DiscoveryEngine,
        ingestion: DataIngestion,
        transport: &Arc<NetworkTransport>,
        session: &Arc<ConnectionManager>,
    ) -> io::Result<Vec<Worker>> {
        let mut workers = Vec::with_capacity(3);
        if let Err(e) = self.push_workers(&mut workers, discovery, ingestion, transport, session) {
            workers.iter().for_each(Worker::request_stop);
            workers.into_iter().for_each(Worker::join);
            return Err(e);
        }
        Ok(workers)
    }

    fn push_workers(
        &self,
        workers: &mut Vec<Worker>,
        mut discovery: DiscoveryEngine,
        mut ingestion: DataIngestion,
        transport: &Arc<NetworkTransport>,
        session: &Arc<ConnectionManager>,
    ) -> io::Result<()> {
        let settings = self.config.wifi.clone();

        let adv_transport = Arc::clone(transport);
        let adv_session = Arc::clone(session);
        let adv_events = self.events.clone();
        let adv_settings = settings.clone();
        workers.push(Worker::spawn("advertising", move |stop| {
            run_advertising(
                &mut discovery,
                &adv_transport,
                &adv_session,
                &adv_events,
                &adv_settings,
                &stop,
            )
        })?);

        let data_sleep_us = settings.data_thread_sleep_us;
        workers.push(Worker::spawn("data", move |stop| {
            while !stop.load(Ordering::SeqCst) {
                if let Err(e) = ingestion.poll() {
                    log::warn!("Data channel read failed: {e}");
                }
                thread_sleep_for(data_sleep_us);
            }
        })?);

        let ctl_transport = Arc::clone(transport);
        let ctl_session = Arc::clone(session);
        let control_sleep_us = settings.control_thread_sleep_us;
        workers.push(Worker::spawn("control", move |stop| {
            while !stop.load(Ordering::SeqCst) {
                poll_control_channel(&ctl_transport, &ctl_session);
                thread_sleep_for(control_sleep_us);
            }
        })?);
        Ok(())
    }

    /// Ends any session, joins the worker threads and releases the sockets.
    /// Calling it again is a no-op.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.session.shutdown();
        for worker in &running.workers {
            worker.request_stop();
        }
        for worker in running.workers {
            worker.join();
        }

        // A client may have been accepted after the shutdown. It goes first,
        // then the listener and the UDP sockets when the transport drops.
        running.transport.close_control();
        drop(running.session);
        drop(running.transport);
        self.events.log("Host stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn discovered_device_ids(&self) -> Vec<String> {
        self.table.ids()
    }

    pub fn discovered_devices(&self) -> Vec<DeviceRecord> {
        self.table.records()
    }

    pub fn connect_to_device(&self, device_id: &str) -> Result<()> {
        self.running()?.session.connect(device_id)
    }

    pub fn disconnect_from_device(&self) -> Result<()> {
        self.running()?.session.disconnect()
    }

    /// Asks the device to start logging to its SD card.
    pub fn start_recording_on_sd(&self) -> Result<()> {
        let running = self.running()?;
        let timestamp = local_timestamp(self.config.timestamp_format.as_str());
        self.send_control(running, type_tag::RECORD_BEGIN, &[&timestamp])?;
        self.events.log(format!("Recording started: {timestamp}"));
        self.send_note(RECORDING_ORDERED_NOTE)
    }

    pub fn stop_recording_on_sd(&self) -> Result<()> {
        let running = self.running()?;
        let timestamp = local_timestamp(self.config.timestamp_format.as_str());
        self.send_control(running, type_tag::RECORD_END, &[&timestamp])?;
        self.events.log(format!("Recording stopped: {timestamp}"));
        Ok(())
    }

    /// Sends a timestamped user note. Delimiters inside the note become
    /// spaces so it stays one payload element.
    pub fn send_note(&self, note: &str) -> Result<()> {
        let running = self.running()?;
        let note: String = note
            .chars()
            .map(|c| {
                if c == PAYLOAD_DELIMITER || c == PACKET_DELIMITER {
                    ' '
                } else {
                    c
                }
            })
            .collect();
        let timestamp = local_timestamp(self.config.timestamp_format.as_str());
        self.send_control(running, type_tag::USER_NOTE, &[&note, &timestamp])
    }

    /// Takes every record received since the previous call, in arrival
    /// order.
    pub fn read_data(&self) -> Vec<String> {
        self.buffer.swap_and_read()
    }

    pub fn has_data(&self) -> bool {
        self.buffer.has_data()
    }

    pub fn state(&self) -> ConnectionState {
        self.running
            .as_ref()
            .map_or(ConnectionState::Idle, |running| running.session.state())
    }

    pub fn session(&self) -> Option<SessionState> {
        self.running.as_ref().map(|running| running.session.snapshot())
    }

    pub fn data_port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.transport.data_port())
    }

    pub fn control_port(&self) -> Option<u16> {
        self.running
            .as_ref()
            .map(|running| running.transport.control_port())
    }

    pub fn events(&self) -> Receiver<HostEvent> {
        self.receiver.clone()
    }

    pub fn ingest_stats(&self) -> IngestStats {
        self.running
            .as_ref()
            .map(|running| running.counters.snapshot())
            .unwrap_or_default()
    }

    /// Events discarded because nobody drained the queue.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    fn running(&self) -> Result<&Running> {
        self.running.as_ref().ok_or(HostError::NotRunning)
    }

    fn send_control(&self, running: &Running, tag: &str, payload: &[&str]) -> Result<()> {
        let packet = encode(
            tag,
            running.transport.next_packet_number(Channel::Control),
            payload,
            DEFAULT_PROTOCOL_VERSION,
            DEFAULT_DATA_RELIABILITY,
        );
        running.session.send_control(&packet)
    }
}

impl Drop for WifiHost {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_advertising(
    discovery: &mut DiscoveryEngine,
    transport: &NetworkTransport,
    session: &ConnectionManager,
    events: &EventSender,
    settings: &WifiHostSettings,
    stop: &AtomicBool,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let check_interval = settings.check_advertising_interval();
    let mut last_check: Option<Instant> = None;

    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        discovery.advertise(transport, now);

        if last_check.is_none_or(|at| now.duration_since(at) >= check_interval) {
            last_check = Some(now);
            if let Err(e) = drain_advertising(discovery, transport, session, events, &mut buf, now)
            {
                log::warn!("Advertising channel read failed: {e}");
            }
            discovery.sweep(now);
            session.tick(now);
        }

        thread_sleep_for(settings.advertising_thread_sleep_us);
    }
}

fn drain_advertising(
    discovery: &mut DiscoveryEngine,
    transport: &NetworkTransport,
    session: &ConnectionManager,
    events: &EventSender,
    buf: &mut [u8],
    now: Instant,
) -> io::Result<()> {
    while let Some((size, from)) = transport.recv_advertising(buf)? {
        let message = String::from_utf8_lossy(&buf[..size]);
        let target = session.target_ip();
        for inbound in discovery.handle_datagram(&message, from, target, now) {
            match inbound {
                Inbound::Pong { from, data_port } => session.handle_pong(from, data_port),
                Inbound::Info(packet) => {
                    log::debug!("Info packet from {from}: {packet}");
                    events.emit(HostEvent::InfoPacket(packet));
                }
                Inbound::HelloHost { .. } => {}
            }
        }
    }
    Ok(())
}

fn poll_control_channel(transport: &NetworkTransport, session: &ConnectionManager) {
    match transport.accept_control() {
        Ok(Some((stream, peer))) => session.accept_control(stream, peer),
        Ok(None) => {}
        Err(e) => log::warn!("Control accept failed: {e}"),
    }

    match transport.poll_control() {
        ControlPoll::Idle => {}
        ControlPoll::Received(text) => log::debug!("Control channel: {}", text.trim_end()),
        ControlPoll::Closed(peer) => session.control_closed(peer),
    }
}

/// Sleeps for `micros`, or just yields when it is zero.
fn thread_sleep_for(micros: u64) {
    if micros == 0 {
        thread::yield_now();
    } else {
        thread::sleep(Duration::from_micros(micros));
    }
}
