use bytes::BytesMut;
use log::{debug, info, trace};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::settings::ParityConfig;
use crate::utils::error::ModbusError;

/// Standard RTU inter-frame gap. Doubled for the silence-sampling interval
/// so jitter on a loaded host does not split one frame into two.
pub const INTER_FRAME_GAP: Duration = Duration::from_micros(1750);
/// Interval between two availability samples in `read_frame`.
pub const SILENCE_SAMPLE_INTERVAL: Duration = Duration::from_micros(3500);

/// Largest frame this client can receive: address + function + 252 data
/// bytes + 2 CRC bytes.
pub const MAX_FRAME_SIZE: usize = 256;

/// The opaque serial capability the protocol engine runs on. The engine
/// never opens a device itself; it is handed an already-open transport.
///
/// RTU is half-duplex with one outstanding request, so every operation
/// takes `&mut self` and callers sharing a transport must serialize access
/// themselves.
pub trait Transport: Send {
    /// Queue bytes for transmission.
    fn write(&mut self, buf: &[u8]) -> Result<(), ModbusError>;

    /// Number of received bytes waiting to be read.
    fn bytes_available(&mut self) -> Result<usize, ModbusError>;

    /// Take whatever has been received so far.
    fn read_available(&mut self) -> Result<Vec<u8>, ModbusError>;

    /// Block until queued output has physically left the wire.
    fn drain(&mut self) -> Result<(), ModbusError>;

    /// Discard both buffered input and queued output.
    fn discard_buffers(&mut self) -> Result<(), ModbusError>;

    /// Change the line speed.
    fn set_baud(&mut self, baud: u32) -> Result<(), ModbusError>;
}

/// `Transport` over a real serial device via the `serialport` crate.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        parity: &ParityConfig,
    ) -> Result<Self, ModbusError> {
        info!("🔌 Opening Modbus RTU port: {}", port_name);
        info!(
            "⚙️  Configuration: {} baud, 8 data bits, 1 stop bit, {:?} parity",
            baud_rate, parity
        );

        let serial_parity = match parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };

        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serial_parity)
            .timeout(Duration::from_millis(1000))
            .open()?;

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> Result<(), ModbusError> {
        self.port.write_all(buf)?;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize, ModbusError> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_available(&mut self) -> Result<Vec<u8>, ModbusError> {
        let count = self.port.bytes_to_read()? as usize;
        let mut buf = vec![0u8; count];
        if count > 0 {
            self.port.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn drain(&mut self) -> Result<(), ModbusError> {
        // For a TTY, flush blocks until the output buffer is transmitted
        self.port.flush()?;
        Ok(())
    }

    fn discard_buffers(&mut self) -> Result<(), ModbusError> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    fn set_baud(&mut self, baud: u32) -> Result<(), ModbusError> {
        self.port.set_baud_rate(baud)?;
        Ok(())
    }
}

/// Transmit one frame. Stale buffered bytes from a prior partial exchange
/// are discarded first so they cannot corrupt the next read, and the call
/// returns only once the frame is physically on the wire.
pub async fn send_frame(transport: &mut dyn Transport, frame: &[u8]) -> Result<(), ModbusError> {
    debug!("📤 TX frame: {}", hex::encode(frame));
    transport.discard_buffers()?;
    transport.write(frame)?;
    transport.drain()?;
    Ok(())
}

/// Receive the next frame by silence detection.
///
/// RTU has no length prefix or delimiter; a frame ends when the line goes
/// quiet for an inter-frame gap. Received bytes are accumulated each poll,
/// and a non-empty accumulation that did not grow across one sampling
/// interval is returned as a candidate frame. CRC validation is the frame
/// codec's job, not this reader's.
///
/// Returns `Timeout` once `timeout` elapses with no complete frame, never
/// earlier than the deadline and at most one sampling interval after it.
pub async fn read_frame(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<Vec<u8>, ModbusError> {
    let deadline = Instant::now() + timeout;
    let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE);

    loop {
        let available = transport.bytes_available()?;
        if available == 0 && !buf.is_empty() {
            // One full sampling interval with no new bytes: frame complete
            debug!("📥 RX frame: {}", hex::encode(&buf));
            return Ok(buf.to_vec());
        }
        if available > 0 {
            let chunk = transport.read_available()?;
            trace!("read {} byte chunk", chunk.len());
            buf.extend_from_slice(&chunk);
        }
        if Instant::now() >= deadline {
            return Err(ModbusError::Timeout);
        }
        sleep(SILENCE_SAMPLE_INTERVAL).await;
    }
}
