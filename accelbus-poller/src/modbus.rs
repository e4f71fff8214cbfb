//! Register reads over a real Modbus link (RTU serial or TCP).

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info};

use crate::register_map::RegisterSpace;
use crate::transport::{Transport, TransportError};

/// Where a Modbus link is opened.
#[derive(Debug, Clone, PartialEq)]
pub enum ModbusLink {
    Tcp {
        host: String,
        port: u16,
    },
    Rtu {
        port: String,
        baud_rate: u32,
        data_bits: tokio_serial::DataBits,
        parity: tokio_serial::Parity,
        stop_bits: tokio_serial::StopBits,
    },
}

impl fmt::Display for ModbusLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModbusLink::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            ModbusLink::Rtu {
                port, baud_rate, ..
            } => write!(f, "rtu://{}@{}", port, baud_rate),
        }
    }
}

/// A lazily connected tokio-modbus client.
///
/// The link is opened on the first read. After a link failure or a timeout the
/// client is dropped so the next read reconnects from scratch.
pub struct ModbusTransport {
    link: ModbusLink,
    timeout: Duration,
    ctx: Option<Context>,
}

impl fmt::Debug for ModbusTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusTransport")
            .field("link", &self.link)
            .field("timeout", &self.timeout)
            .field("connected", &self.ctx.is_some())
            .finish()
    }
}

impl ModbusTransport {
    pub fn new(link: ModbusLink, timeout: Duration) -> Self {
        Self {
            link,
            timeout,
            ctx: None,
        }
    }

    pub fn link(&self) -> &ModbusLink {
        &self.link
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    async fn context(&mut self, unit_id: u8) -> Result<&mut Context, TransportError> {
        if self.ctx.is_none() {
            let ctx = open_context(&self.link, Slave(unit_id), self.timeout).await?;
            info!(link = %self.link, "Modbus link opened");
            self.ctx = Some(ctx);
        }

        match self.ctx.as_mut() {
            Some(ctx) => {
                ctx.set_slave(Slave(unit_id));
                Ok(ctx)
            }
            None => Err(TransportError::LinkDown("not connected".to_string())),
        }
    }

    async fn request(
        &mut self,
        unit_id: u8,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let ctx = self.context(unit_id).await?;

        let response = match space {
            RegisterSpace::Holding => ctx.read_holding_registers(start, count).await,
            RegisterSpace::Input => ctx.read_input_registers(start, count).await,
        };

        match response {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(exception)) => Err(TransportError::DeviceException(u8::from(exception))),
            Err(tokio_modbus::Error::Transport(e)) => Err(map_io_error(e)),
            Err(tokio_modbus::Error::Protocol(e)) => {
                Err(TransportError::ShortResponse(e.to_string()))
            }
        }
    }
}

impl Transport for ModbusTransport {
    /// Connecting (when needed) and the request share one `timeout` budget.
    async fn read_registers(
        &mut self,
        unit_id: u8,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let timeout = self.timeout;
        let result = tokio::time::timeout(timeout, self.request(unit_id, space, start, count))
            .await
            .unwrap_or(Err(TransportError::Timeout));

        if let Err(e) = &result {
            if matches!(e, TransportError::LinkDown(_) | TransportError::Timeout) {
                debug!(link = %self.link, error = %e, "Dropping Modbus link");
                self.ctx = None;
            }
        }

        result
    }
}

/// Open a client context for `link`, bounded by `timeout`.
pub async fn open_context(
    link: &ModbusLink,
    slave: Slave,
    timeout: Duration,
) -> Result<Context, TransportError> {
    match link {
        ModbusLink::Tcp { host, port } => {
            let addr: SocketAddr = format!("{}:{}", host, port)
                .parse()
                .map_err(|e| TransportError::LinkDown(format!("invalid address: {}", e)))?;

            tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::LinkDown(e.to_string()))
        }
        ModbusLink::Rtu {
            port,
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        } => {
            let builder = tokio_serial::new(port, *baud_rate)
                .parity(*parity)
                .stop_bits(*stop_bits)
                .data_bits(*data_bits)
                .timeout(timeout);

            let serial = tokio_serial::SerialStream::open(&builder)
                .map_err(|e| TransportError::LinkDown(format!("serial open failed: {}", e)))?;

            Ok(rtu::attach_slave(serial, slave))
        }
    }
}

fn map_io_error(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
        io::ErrorKind::InvalidData => TransportError::CrcMismatch,
        io::ErrorKind::UnexpectedEof => TransportError::ShortResponse(e.to_string()),
        _ => TransportError::LinkDown(e.to_string()),
    }
}

/// Parse a parity name as written in configuration files.
pub fn parse_parity(value: &str) -> Option<tokio_serial::Parity> {
    match value.to_lowercase().as_str() {
        "none" | "n" => Some(tokio_serial::Parity::None),
        "even" | "e" => Some(tokio_serial::Parity::Even),
        "odd" | "o" => Some(tokio_serial::Parity::Odd),
        _ => None,
    }
}

pub fn parse_stop_bits(value: u8) -> Option<tokio_serial::StopBits> {
    match value {
        1 => Some(tokio_serial::StopBits::One),
        2 => Some(tokio_serial::StopBits::Two),
        _ => None,
    }
}

pub fn parse_data_bits(value: u8) -> Option<tokio_serial::DataBits> {
    match value {
        5 => Some(tokio_serial::DataBits::Five),
        6 => Some(tokio_serial::DataBits::Six),
        7 => Some(tokio_serial::DataBits::Seven),
        8 => Some(tokio_serial::DataBits::Eight),
        _ => None,
    }
}
