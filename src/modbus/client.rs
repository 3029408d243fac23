use async_trait::async_trait;
use log::{debug, info};
use std::time::Duration;

use super::engine::{request, FunctionTable, RequestOptions, RequestPayload};
use super::frame::function;
use super::transport::{SerialTransport, Transport};
use crate::config::settings::ParityConfig;
use crate::utils::error::ModbusError;

/// Response deadline for connectivity probes.
pub const PING_TIMEOUT: Duration = Duration::from_millis(100);
/// Attempt budget for connectivity probes.
pub const PING_ATTEMPTS: u32 = 10;
/// Fixed probe pattern echoed back by a reachable device.
pub const PING_PATTERN: [u8; 2] = [0xA5, 0x5A];
/// Line speeds tried by baud auto-detection, most common first.
pub const AUTO_BAUD_RATES: [u32; 2] = [38_400, 9_600];

/// Coil state sentinels mandated by the protocol.
const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// Typed register/coil operations, each a single frame exchange through
/// the request engine.
#[async_trait]
pub trait RegisterAccess: Send {
    async fn read_holding_registers(
        &mut self,
        server: u8,
        register: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError>;

    async fn read_input_registers(
        &mut self,
        server: u8,
        register: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError>;

    async fn write_register(
        &mut self,
        server: u8,
        register: u16,
        value: u16,
    ) -> Result<(), ModbusError>;

    async fn write_coil(&mut self, server: u8, coil: u16, on: bool) -> Result<(), ModbusError>;
}

/// Modbus RTU client owning the transport for the duration of each call.
/// The protocol is half-duplex with a single outstanding request, so all
/// operations take `&mut self`; callers sharing a client must serialize.
pub struct ModbusClient {
    transport: Box<dyn Transport>,
    functions: FunctionTable,
    options: RequestOptions,
    ping_timeout: Duration,
    ping_attempts: u32,
}

impl ModbusClient {
    /// Open a serial device and wrap it in a client with default tuning.
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        parity: &ParityConfig,
    ) -> Result<Self, ModbusError> {
        let transport = SerialTransport::open(port_name, baud_rate, parity)?;
        info!("✅ Modbus RTU connection established");
        Ok(Self::with_transport(Box::new(transport)))
    }

    /// Build a client over any transport, real or mock.
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            functions: FunctionTable::default(),
            options: RequestOptions::default(),
            ping_timeout: PING_TIMEOUT,
            ping_attempts: PING_ATTEMPTS,
        }
    }

    pub fn set_request_options(&mut self, options: RequestOptions) {
        self.options = options;
    }

    pub fn set_ping_options(&mut self, attempts: u32, timeout: Duration) {
        self.ping_attempts = attempts;
        self.ping_timeout = timeout;
    }

    pub fn function_table(&self) -> &FunctionTable {
        &self.functions
    }

    /// One raw exchange with the default options; body bytes come back
    /// with address and function code already stripped.
    pub async fn request_raw(
        &mut self,
        server: u8,
        function: u8,
        payload: RequestPayload,
    ) -> Result<Vec<u8>, ModbusError> {
        request(self.transport.as_mut(), server, function, payload, self.options).await
    }

    /// Count=1 convenience returning the scalar.
    pub async fn read_register(&mut self, server: u8, register: u16) -> Result<u16, ModbusError> {
        let values = self.read_holding_registers(server, register, 1).await?;
        Ok(values[0])
    }

    /// Count=1 convenience for input registers.
    pub async fn read_input_register(
        &mut self,
        server: u8,
        register: u16,
    ) -> Result<u16, ModbusError> {
        let values = self.read_input_registers(server, register, 1).await?;
        Ok(values[0])
    }

    /// Diagnostics echo (function 8, sub-function 0): the device returns
    /// the query data verbatim. A malformed echo with an odd byte length
    /// yields no data rather than a half word.
    pub async fn echo_query_data(
        &mut self,
        server: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, ModbusError> {
        let mut payload = vec![0u8, 0u8]; // sub-function 0
        payload.extend_from_slice(data);

        let body = self
            .request_raw(server, function::DIAGNOSTICS, RequestPayload::Raw(payload))
            .await?;

        if body.len() % 2 != 0 || body.len() < 2 {
            return Ok(Vec::new());
        }
        Ok(body[2..].to_vec())
    }

    /// Connectivity probe: true iff the device echoes the probe pattern.
    /// A timeout means "device absent", a normal outcome for detection
    /// logic, and is downgraded to `false`; every other error propagates.
    pub async fn ping(&mut self, server: u8) -> Result<bool, ModbusError> {
        let saved = self.options;
        self.options = RequestOptions::new(self.ping_attempts, self.ping_timeout);
        let result = self.echo_query_data(server, &PING_PATTERN).await;
        self.options = saved;

        match result {
            Ok(echoed) => Ok(echoed == PING_PATTERN),
            Err(ModbusError::Timeout) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Ping a range of addresses and collect the responsive ones.
    pub async fn scan(
        &mut self,
        addresses: impl IntoIterator<Item = u8>,
    ) -> Result<Vec<u8>, ModbusError> {
        let mut responsive = Vec::new();
        for address in addresses {
            if self.ping(address).await? {
                debug!("Device {} responded to ping", address);
                responsive.push(address);
            }
        }
        Ok(responsive)
    }

    /// Try each common line speed against `ping`, keeping the first one
    /// the device answers at. Buffers are discarded after each speed
    /// change so bytes framed at the wrong rate cannot corrupt the next
    /// read. The transport is left at the last rate tried.
    pub async fn auto_baud(&mut self, server: u8) -> Result<bool, ModbusError> {
        for rate in AUTO_BAUD_RATES {
            info!("🔎 Probing device {} at {} baud", server, rate);
            self.transport.set_baud(rate)?;
            self.transport.discard_buffers()?;
            if self.ping(server).await? {
                info!("✅ Device {} answered at {} baud", server, rate);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn parse_registers(body: &[u8], count: u16) -> Result<Vec<u16>, ModbusError> {
        let expected = count as usize * 2;
        if body.len() != expected + 1 || body[0] as usize != expected {
            return Err(ModbusError::InvalidResponse);
        }
        Ok(body[1..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    async fn read_registers(
        &mut self,
        server: u8,
        function: u8,
        register: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        let body = self
            .request_raw(server, function, vec![register, count].into())
            .await?;
        Self::parse_registers(&body, count)
    }
}

#[async_trait]
impl RegisterAccess for ModbusClient {
    async fn read_holding_registers(
        &mut self,
        server: u8,
        register: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        self.read_registers(server, function::READ_HOLDING_REGISTERS, register, count)
            .await
    }

    async fn read_input_registers(
        &mut self,
        server: u8,
        register: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        self.read_registers(server, function::READ_INPUT_REGISTERS, register, count)
            .await
    }

    /// Success is the protocol exchange succeeding; the device echoes the
    /// written value and nothing further needs re-validation.
    async fn write_register(
        &mut self,
        server: u8,
        register: u16,
        value: u16,
    ) -> Result<(), ModbusError> {
        self.request_raw(
            server,
            function::WRITE_SINGLE_REGISTER,
            vec![register, value].into(),
        )
        .await?;
        Ok(())
    }

    async fn write_coil(&mut self, server: u8, coil: u16, on: bool) -> Result<(), ModbusError> {
        let state = if on { COIL_ON } else { COIL_OFF };
        self.request_raw(server, function::WRITE_SINGLE_COIL, vec![coil, state].into())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::crc::crc16_modbus;
    use crate::modbus::frame::EXCEPTION_FLAG;
    use crate::modbus::transport::mock::MockTransport;

    fn reply(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&crc16_modbus(body).to_le_bytes());
        frame
    }

    /// Client with fast timeouts plus a handle onto the scripted line.
    fn client() -> (ModbusClient, MockTransport) {
        let transport = MockTransport::new();
        let handle = transport.clone();
        let mut client = ModbusClient::with_transport(Box::new(transport));
        client.set_request_options(RequestOptions::new(2, Duration::from_millis(30)));
        client.set_ping_options(2, Duration::from_millis(20));
        (client, handle)
    }

    #[tokio::test]
    async fn test_read_register_end_to_end() {
        let (mut client, line) = client();
        line.push_reply(reply(&[7, 3, 2, 0x12, 0x34]));

        let value = client.read_register(7, 10).await.unwrap();
        assert_eq!(value, 0x1234);

        // [address, fn 3, register hi/lo, count hi/lo, crc]
        let sent = &line.written()[0];
        assert_eq!(&sent[..6], &[7, 3, 0, 10, 0, 1]);
        assert_eq!(crc16_modbus(sent), 0);
    }

    #[tokio::test]
    async fn test_read_holding_registers_parses_words() {
        let (mut client, line) = client();
        line.push_reply(reply(&[1, 3, 4, 0x00, 0x0A, 0xFF, 0xFE]));

        let values = client.read_holding_registers(1, 100, 2).await.unwrap();
        assert_eq!(values, vec![0x000A, 0xFFFE]);
    }

    #[tokio::test]
    async fn test_read_input_registers_uses_function_4() {
        let (mut client, line) = client();
        line.push_reply(reply(&[2, 4, 2, 0x01, 0x00]));

        let value = client.read_input_register(2, 7).await.unwrap();
        assert_eq!(value, 0x0100);
        assert_eq!(line.written()[0][1], 4);
    }

    #[tokio::test]
    async fn test_read_registers_byte_count_mismatch() {
        let (mut client, line) = client();
        // Claims 4 data bytes but carries 2
        line.push_reply(reply(&[1, 3, 4, 0x00, 0x0A]));

        let err = client.read_holding_registers(1, 0, 2).await.unwrap_err();
        assert_eq!(err, ModbusError::InvalidResponse);
    }

    #[tokio::test]
    async fn test_write_coil_end_to_end() {
        let (mut client, line) = client();
        let echo = reply(&[3, 5, 0, 5, 0xFF, 0x00]);
        line.push_reply(echo);

        client.write_coil(3, 5, true).await.unwrap();

        let sent = &line.written()[0];
        assert_eq!(&sent[..6], &[3, 5, 0, 5, 0xFF, 0x00]);
        assert_eq!(crc16_modbus(sent), 0);
    }

    #[tokio::test]
    async fn test_write_coil_off_sentinel() {
        let (mut client, line) = client();
        line.push_reply(reply(&[3, 5, 0, 5, 0x00, 0x00]));

        client.write_coil(3, 5, false).await.unwrap();
        assert_eq!(&line.written()[0][4..6], &[0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_write_register_succeeds_on_echo() {
        let (mut client, line) = client();
        line.push_reply(reply(&[9, 6, 0, 100, 0x12, 0x34]));

        client.write_register(9, 100, 0x1234).await.unwrap();
        assert_eq!(&line.written()[0][..6], &[9, 6, 0, 100, 0x12, 0x34]);
    }

    #[tokio::test]
    async fn test_echo_query_data_round_trip() {
        let (mut client, line) = client();
        line.push_reply(reply(&[7, 8, 0, 0, 0xDE, 0xAD, 0xBE, 0xEF]));

        let echoed = client.echo_query_data(7, &[0xDE, 0xAD, 0xBE, 0xEF]).await.unwrap();
        assert_eq!(echoed, vec![0xDE, 0xAD, 0xBE, 0xEF]);

        // Sub-function word 0 precedes the data on the wire
        assert_eq!(&line.written()[0][2..8], &[0, 0, 0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[tokio::test]
    async fn test_echo_with_odd_length_yields_no_data() {
        let (mut client, line) = client();
        line.push_reply(reply(&[7, 8, 0, 0, 0xAB]));

        let echoed = client.echo_query_data(7, &[0xAB, 0xCD]).await.unwrap();
        assert!(echoed.is_empty());
    }

    #[tokio::test]
    async fn test_ping_reachable_device() {
        let (mut client, line) = client();
        let mut body = vec![7, 8, 0, 0];
        body.extend_from_slice(&PING_PATTERN);
        line.push_reply(reply(&body));

        assert!(client.ping(7).await.unwrap());
    }

    #[tokio::test]
    async fn test_ping_wrong_echo_is_unreachable() {
        let (mut client, line) = client();
        line.push_reply(reply(&[7, 8, 0, 0, 0x00, 0x00]));

        assert!(!client.ping(7).await.unwrap());
    }

    #[tokio::test]
    async fn test_ping_silent_device_returns_false() {
        let (mut client, line) = client();

        assert!(!client.ping(7).await.unwrap());
        // Every configured attempt was made before giving up
        assert_eq!(line.written().len(), 2);
    }

    #[tokio::test]
    async fn test_ping_propagates_device_exception() {
        let (mut client, line) = client();
        line.push_reply(reply(&[7, 8 | EXCEPTION_FLAG, 1]));

        let err = client.ping(7).await.unwrap_err();
        assert_eq!(
            err,
            ModbusError::RequestError(crate::modbus::frame::ExceptionCode::IllegalFunction)
        );
    }

    #[tokio::test]
    async fn test_scan_collects_responsive_addresses() {
        let (mut client, line) = client();
        client.set_ping_options(1, Duration::from_millis(20));
        let mut body = vec![2, 8, 0, 0];
        body.extend_from_slice(&PING_PATTERN);
        line.push_silence(); // address 1
        line.push_reply(reply(&body)); // address 2

        let responsive = client.scan(1..=2).await.unwrap();
        assert_eq!(responsive, vec![2]);
    }

    #[tokio::test]
    async fn test_auto_baud_finds_second_rate() {
        let (mut client, line) = client();
        client.set_ping_options(1, Duration::from_millis(20));
        line.set_reply_baud(9600);
        let mut body = vec![7, 8, 0, 0];
        body.extend_from_slice(&PING_PATTERN);
        line.push_reply(reply(&body));

        assert!(client.auto_baud(7).await.unwrap());
        assert_eq!(line.baud(), 9600);
        // One silent probe at 38400 plus the answered one at 9600
        assert_eq!(line.written().len(), 2);
    }

    #[tokio::test]
    async fn test_auto_baud_absent_device() {
        let (mut client, line) = client();
        client.set_ping_options(1, Duration::from_millis(20));

        assert!(!client.auto_baud(7).await.unwrap());
        assert_eq!(line.written().len(), 2);
    }
}
