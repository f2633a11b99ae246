use std::io::{self, Read, Write};
use std::net::{
    IpAddr, Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket,
};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::PortSettings;
use crate::error::{HostError, Result};

/// Large enough for any datagram a device sends.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

const PORT_STEP: u16 = 2;

/// Longest a control write may wait on a full send buffer. The client is
/// dropped when it runs out.
pub const CONTROL_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-channel packet numbers for outbound packets. Each wraps at 65536.
#[derive(Debug, Default)]
pub struct PacketCounters {
    advertising: AtomicU16,
    control: AtomicU16,
    data: AtomicU16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Advertising,
    Control,
    Data,
}

impl PacketCounters {
    pub fn next(&self, channel: Channel) -> u16 {
        let counter = match channel {
            Channel::Advertising => &self.advertising,
            Channel::Control => &self.control,
            Channel::Data => &self.data,
        };
        counter.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct ControlClient {
    stream: TcpStream,
    peer: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPoll {
    Idle,
    Received(String),
    Closed(IpAddr),
}

/// Sockets shared by the worker threads.
///
/// Fields drop in declaration order, so the control client closes before the
/// listener and the UDP sockets.
#[derive(Debug)]
pub struct NetworkTransport {
    client: Mutex<Option<ControlClient>>,
    listener: TcpListener,
    advertising: UdpSocket,
    data: UdpSocket,
    advertising_port: u16,
    data_port: u16,
    control_port: u16,
    counters: PacketCounters,
}

impl NetworkTransport {
    pub fn bind(ports: &PortSettings) -> Result<Self> {
        let advertising = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        advertising.set_broadcast(true)?;
        advertising.set_nonblocking(true)?;

        let data = bind_with_retry(ports.data_port, ports.bind_attempts, |port| {
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
        })?;
        data.set_nonblocking(true)?;
        let data_port = data.local_addr()?.port();

        // Port zero asks the OS for ephemeral ports on both channels.
        let first_control_port = match ports.data_port {
            0 => 0,
            _ => data_port.wrapping_add(1),
        };
        let listener = bind_with_retry(
            first_control_port,
            ports.bind_attempts,
            |port| TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)),
        )?;
        listener.set_nonblocking(true)?;
        let control_port = listener.local_addr()?.port();

        log::info!(
            "Bound data port {data_port}, control port {control_port}, advertising to port {}",
            ports.advertising_port
        );

        Ok(Self {
            client: Mutex::new(None),
            listener,
            advertising,
            data,
            advertising_port: ports.advertising_port,
            data_port,
            control_port,
            counters: PacketCounters::default(),
        })
    }

    pub fn data_port(&self) -> u16 {
        self.data_port
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn advertising_port(&self) -> u16 {
        self.advertising_port
    }

    pub fn next_packet_number(&self, channel: Channel) -> u16 {
        self.counters.next(channel)
    }

    pub fn send_advertising(&self, packet: &str, ip: Ipv4Addr) -> io::Result<usize> {
        self.advertising
            .send_to(packet.as_bytes(), SocketAddrV4::new(ip, self.advertising_port))
    }

    pub fn recv_advertising(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        non_blocking(self.advertising.recv_from(buf))
    }

    pub fn send_data(&self, packet: &str, addr: SocketAddr) -> io::Result<usize> {
        self.data.send_to(packet.as_bytes(), addr)
    }

    pub fn recv_data(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        non_blocking(self.data.recv_from(buf))
    }

    /// Discards everything queued on the data socket.
    pub fn flush_data(&self) -> usize {
        let mut buf = [0u8; 2048];
        let mut discarded = 0;
        while let Ok(Some(_)) = self.recv_data(&mut buf) {
            discarded += 1;
        }
        discarded
    }

    pub fn accept_control(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        non_blocking(self.listener.accept())
    }

    /// Installs `stream` as the control client. Fails if one is already
    /// attached; the rejected stream is closed.
    pub fn attach_control(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let mut client = self.lock_client();
        if let Some(existing) = client.as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(HostError::ControlUnavailable(format!(
                "rejected {peer}, already serving {}",
                existing.peer
            )));
        }
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        *client = Some(ControlClient { stream, peer });
        Ok(())
    }

    pub fn control_peer(&self) -> Option<SocketAddr> {
        self.lock_client().as_ref().map(|c| c.peer)
    }

    /// Writes `packet` to the control client, which must belong to
    /// `expected_ip`. A client that stops reading is dropped once the write
    /// has waited [`CONTROL_WRITE_TIMEOUT`].
    pub fn send_control(&self, packet: &str, expected_ip: IpAddr) -> Result<()> {
        let mut client = self.lock_client();
        let Some(control) = client.as_mut() else {
            return Err(HostError::ControlUnavailable(
                "no control client attached".to_string(),
            ));
        };
        if control.peer.ip() != expected_ip {
            return Err(HostError::ControlUnavailable(format!(
                "control client {} does not match connected device {expected_ip}",
                control.peer
            )));
        }
        let deadline = Instant::now() + CONTROL_WRITE_TIMEOUT;
        let written = write_fully(&mut control.stream, packet.as_bytes(), deadline)
            .and_then(|()| control.stream.flush());
        if let Err(e) = written {
            let peer = control.peer;
            if let Some(stalled) = client.take() {
                let _ = stalled.stream.shutdown(Shutdown::Both);
            }
            log::warn!("Dropped control client {peer}: {e}");
            return Err(HostError::ControlUnavailable(format!(
                "write to {peer} failed: {e}"
            )));
        }
        Ok(())
    }

    /// Reads whatever the control client has sent. A zero-length read means
    /// the peer closed, in which case the client is dropped.
    pub fn poll_control(&self) -> ControlPoll {
        let mut client = self.lock_client();
        let Some(control) = client.as_mut() else {
            return ControlPoll::Idle;
        };

        let mut buf = [0u8; 1024];
        match control.stream.read(&mut buf) {
            Ok(0) => {
                let peer = control.peer.ip();
                *client = None;
                ControlPoll::Closed(peer)
            }
            Ok(n) => ControlPoll::Received(String::from_utf8_lossy(&buf[..n]).into_owned()),
            Err(ref e) if is_transient(e) => ControlPoll::Idle,
            Err(e) => {
                log::warn!("Control read from {} failed: {e}", control.peer);
                let peer = control.peer.ip();
                *client = None;
                ControlPoll::Closed(peer)
            }
        }
    }

    /// Gracefully closes the control client, if any.
    pub fn close_control(&self) -> bool {
        match self.lock_client().take() {
            Some(control) => {
                let _ = control.stream.shutdown(Shutdown::Both);
                log::debug!("Closed control client {}", control.peer);
                true
            }
            None => false,
        }
    }

    fn lock_client(&self) -> MutexGuard<'_, Option<ControlClient>> {
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn bind_with_retry<S>(
    first_port: u16,
    attempts: u32,
    bind: impl Fn(u16) -> io::Result<S>,
) -> Result<S> {
    let mut port = first_port;
    for attempt in 1..=attempts.max(1) {
        match bind(port) {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                log::debug!("Bind attempt {attempt} on port {port} failed: {e}");
                port = port.wrapping_add(PORT_STEP);
            }
        }
    }
    Err(HostError::BindFailed {
        port: first_port,
        attempts,
    })
}

fn write_fully(stream: &mut TcpStream, mut bytes: &[u8], deadline: Instant) -> io::Result<()> {
    while !bytes.is_empty() {
        match stream.write(bytes) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => bytes = &bytes[n..],
            Err(ref e) if is_transient(e) => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("send buffer full, {} bytes unsent", bytes.len()),
                    ));
                }
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn non_blocking<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ref e) if is_transient(e) => Ok(None),
        // Windows reports ICMP port-unreachable from an earlier send here.
        Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
        Err(e) => Err(e),
    }
}
