// Serial PWM bridge
//
// Host-side driver for a small servo board that owns the timed outputs and
// accepts commands over USB serial. The board firmware reuses the framing of
// the Feetech/Dynamixel v1 serial servo bus, so off-the-shelf bus adapters
// and sniffers can read the traffic.
//
// Board contract:
// Packet format: [0xFF, 0xFF, Channel, Length, Instruction, Params..., Checksum]
// Reply format:  [0xFF, 0xFF, Channel, Length, Status, Params..., Checksum]
// - Length counts instruction/status, params and checksum (always >= 2)
// - Checksum is !(Channel + Length + body) truncated to a byte
// - Every packet gets exactly one reply; status 0 means accepted
// - Ping (0x01): no params
// - Configure (0x10): [gpio, freq_lo, freq_hi, resolution_bits]
// - SetDuty (0x11): [duty_lo, duty_hi], duty in timer counts

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::pwm::{ChannelConfig, PulseOutput, PwmError, Result};
use crate::config::{BRIDGE_BAUDRATE, BRIDGE_TIMEOUT};

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set understood by the bridge firmware
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Configure = 0x10,
    SetDuty = 0x11,
}

/// Pulse output backed by a serial-attached servo board
pub struct SerialPwm {
    port: Box<dyn SerialPort>,
}

impl SerialPwm {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, BRIDGE_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(BRIDGE_TIMEOUT)
            .open()?;

        Ok(Self { port })
    }

    /// Checksum over everything after the header
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    fn build_packet(channel: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // instruction + params + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(channel);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);
        packet.push(Self::checksum(&packet[2..]));

        packet
    }

    fn transact(&mut self, channel: u8, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        let packet = Self::build_packet(channel, instruction, params);
        self.port.write_all(&packet)?;
        self.port.flush()?;
        read_reply(&mut self.port, channel)
    }

    /// Check that the board answers for a channel
    pub fn ping(&mut self, channel: u8) -> Result<bool> {
        match self.transact(channel, Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(PwmError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Change the reply timeout (diagnostics use a longer one)
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }
}

impl PulseOutput for SerialPwm {
    fn configure_channel(&mut self, channel: u8, config: ChannelConfig) -> Result<()> {
        let params = configure_params(&config);
        debug!(
            "Configure channel {}: gpio={}, {}Hz, {}-bit",
            channel, config.gpio, config.frequency_hz, config.resolution_bits
        );
        self.transact(channel, Instruction::Configure, &params)?;
        Ok(())
    }

    fn set_duty(&mut self, channel: u8, duty: u32) -> Result<()> {
        if duty > u16::MAX as u32 {
            return Err(PwmError::DutyOutOfRange {
                channel,
                duty,
                max: u16::MAX as u32,
            });
        }
        let params = (duty as u16).to_le_bytes();
        debug!("Set duty on channel {}: {}", channel, duty);
        self.transact(channel, Instruction::SetDuty, &params)?;
        Ok(())
    }
}

/// Configure payload: [gpio, freq_lo, freq_hi, resolution_bits]
fn configure_params(config: &ChannelConfig) -> [u8; 4] {
    let [freq_lo, freq_hi] = (config.frequency_hz.min(u16::MAX as u32) as u16).to_le_bytes();
    [config.gpio, freq_lo, freq_hi, config.resolution_bits]
}

/// Read and validate one reply, returning its parameters
fn read_reply<R: Read + ?Sized>(reader: &mut R, expected_channel: u8) -> Result<Vec<u8>> {
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).map_err(|e| {
        if e.kind() == std::io::ErrorKind::TimedOut {
            PwmError::Timeout {
                channel: expected_channel,
            }
        } else {
            PwmError::Io(e)
        }
    })?;

    if header != HEADER {
        return Err(PwmError::InvalidResponse {
            channel: expected_channel,
            reason: format!("Invalid header: {:02X?}", header),
        });
    }

    let mut channel_length = [0u8; 2];
    reader.read_exact(&mut channel_length)?;
    let channel = channel_length[0];
    let length = channel_length[1] as usize;

    if channel != expected_channel {
        return Err(PwmError::InvalidResponse {
            channel: expected_channel,
            reason: format!("Channel mismatch: expected {}, got {}", expected_channel, channel),
        });
    }
    if length < 2 {
        return Err(PwmError::InvalidResponse {
            channel,
            reason: format!("Reply length {} too short", length),
        });
    }

    // status + params + checksum
    let mut remaining = vec![0u8; length];
    reader.read_exact(&mut remaining)?;

    let mut checksum_data = vec![channel, length as u8];
    checksum_data.extend_from_slice(&remaining[..length - 1]);
    if SerialPwm::checksum(&checksum_data) != remaining[length - 1] {
        return Err(PwmError::ChecksumMismatch { channel });
    }

    let status = remaining[0];
    if status != 0 {
        return Err(PwmError::Rejected { channel, status });
    }

    Ok(remaining[1..length - 1].to_vec())
}
