use emotilink::{ConnectPath, HostEvent};

/// One-line description of an event, or `None` for per-packet traffic that
/// would flood the console unless `verbose` is set.
pub fn describe(event: &HostEvent, verbose: bool) -> Option<String> {
    let text = match event {
        HostEvent::NewPacket(packet) if verbose => format!("packet {packet}"),
        HostEvent::Sample {
            channel,
            time_secs,
            value,
        } if verbose => format!("{channel} @ {time_secs:.3}s = {value}"),
        HostEvent::NewPacket(_) | HostEvent::Sample { .. } => return None,
        HostEvent::RecordingState {
            is_recording: true,
            file_name,
        } => format!(
            "Device recording to {}",
            file_name.as_deref().unwrap_or("<unnamed>")
        ),
        HostEvent::RecordingState {
            is_recording: false,
            ..
        } => "Device recording stopped".to_string(),
        HostEvent::BatteryLevel(level) => format!("Battery {level}%"),
        HostEvent::PowerMode(mode) => format!("Power mode {mode}"),
        HostEvent::DeviceDiscovered { device_id, ip } => {
            format!("Discovered {device_id} at {ip}")
        }
        HostEvent::Connected { device_id, ip, via } => {
            let path = match via {
                ConnectPath::Handshake => "handshake",
                ConnectPath::ControlChannel => "control channel",
            };
            format!(
                "Connected to {} at {ip} via {path}",
                device_id.as_deref().unwrap_or("unknown device")
            )
        }
        HostEvent::Disconnected { reason } => format!("Device {}", reason.as_str()),
        HostEvent::InfoPacket(packet) => format!("info {packet}"),
        HostEvent::Log(message) => message.clone(),
    };
    Some(text)
}
