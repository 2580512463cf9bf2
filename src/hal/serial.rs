//! Receiver link over a UART or USB-CDC serial port.
use std::io::Read;
use std::time::Duration;

use log::{debug, info};
use serialport::SerialPort;

use super::{Transport, AVAILABLE_MASK};
use crate::errors::TransportError;

pub struct SerialTransport {
    port_name: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, TransportError> {
        info!("Opening receiver on {} at {} baud", port_name, baud_rate);
        let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(100));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let port = builder.open().map_err(|e| {
            TransportError::Link(format!("failed to open serial port {}: {}", port_name, e))
        })?;
        // Drop whatever the receiver buffered before we were listening.
        let _ = port.clear(serialport::ClearBuffer::Input);
        debug!("Serial port {} ready", port_name);
        Ok(Self {
            port_name: port_name.to_string(),
            port,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Transport for SerialTransport {
    fn bytes_available(&mut self) -> Result<u16, TransportError> {
        let n = self
            .port
            .bytes_to_read()
            .map_err(|e| TransportError::Link(e.to_string()))?;
        // Never report a count that collides with the sentinel bit.
        Ok(n.min(AVAILABLE_MASK as u32) as u16)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}
