use std::io::{Read, Write};
use std::time::Duration;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tokio::time::timeout;

use super::{Connector, Result, SerialDeviceInfo, SerialError, Transport};

// PowerPack R2M1 enumerates as an STM32 USB CDC virtual COM port
pub const POWERPACK_VID: u16 = 0x0483; // STMicroelectronics
pub const POWERPACK_PID: u16 = 0x5740; // Virtual COM Port
pub const BAUD_RATE: u32 = 115200;

const PRODUCT_HINTS: [&str; 2] = ["STM32", "Virtual COM Port"];
const POLL_STEP: Duration = Duration::from_millis(10);

pub struct SerialInterface {
    port: Option<Box<dyn SerialPort>>,
    port_name: String,
}

impl SerialInterface {
    /// Discover attached PowerPack boards
    pub fn discover_devices() -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let mut devices = Vec::new();

        for port in ports {
            if let SerialPortType::UsbPort(usb_info) = port.port_type {
                let id_match = usb_info.vid == POWERPACK_VID && usb_info.pid == POWERPACK_PID;
                let name_match = [usb_info.product.as_deref(), usb_info.manufacturer.as_deref()]
                    .into_iter()
                    .flatten()
                    .any(|s| PRODUCT_HINTS.iter().any(|hint| s.contains(hint)));

                if id_match || name_match {
                    devices.push(SerialDeviceInfo {
                        port_name: port.port_name.clone(),
                        vid: usb_info.vid,
                        pid: usb_info.pid,
                        serial_number: usb_info.serial_number.clone(),
                        manufacturer: usb_info.manufacturer.clone(),
                        product: usb_info.product.clone(),
                    });
                }
            }
        }

        Ok(devices)
    }

    /// Every serial port on the system as "PORT - description"
    pub fn list_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let description = match p.port_type {
                    SerialPortType::UsbPort(usb) => usb.product.unwrap_or_else(|| "USB Serial".to_string()),
                    SerialPortType::PciPort => "PCI Serial".to_string(),
                    SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
                    SerialPortType::Unknown => "Unknown".to_string(),
                };
                format!("{} - {}", p.port_name, description)
            })
            .collect())
    }

    /// Strip a " - description" suffix from a port selection string
    pub fn port_from_selection(selection: &str) -> &str {
        selection.split(" - ").next().unwrap_or(selection).trim()
    }

    /// Open a port with the fixed 115200 8N1 link parameters
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port_name = Self::port_from_selection(port_name);
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", port_name, e)))?;

        log::info!("Serial port opened: {}", port_name);
        Ok(Self {
            port: Some(port),
            port_name: port_name.to_string(),
        })
    }

}

#[async_trait::async_trait]
impl Transport for SerialInterface {
    async fn read(&mut self, max_bytes: usize, read_timeout: Duration) -> Result<Vec<u8>> {
        let port = self.port.as_mut().ok_or(SerialError::NotConnected)?;

        let read_operation = async {
            loop {
                match port.bytes_to_read() {
                    Ok(0) => tokio::time::sleep(POLL_STEP).await,
                    Ok(available) => {
                        let mut buffer = vec![0u8; (available as usize).min(max_bytes)];
                        match port.read(&mut buffer) {
                            Ok(n) => {
                                buffer.truncate(n);
                                return Ok(buffer);
                            }
                            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                                tokio::time::sleep(POLL_STEP).await;
                            }
                            Err(e) => return Err(SerialError::IoError(e)),
                        }
                    }
                    Err(e) => return Err(SerialError::SerialportError(e)),
                }
            }
        };

        timeout(read_timeout, read_operation)
            .await
            .map_err(|_| SerialError::Timeout)?
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(SerialError::NotConnected)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    async fn clear_input(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(SerialError::NotConnected)?;
        port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed serial port {}", self.port_name);
        }
    }
}

/// Opens real serial ports; an empty endpoint auto-detects the first board.
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(BAUD_RATE)
    }
}

#[async_trait::async_trait]
impl Connector for SerialConnector {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Transport>> {
        let port_name = if endpoint.trim().is_empty() {
            let devices = SerialInterface::discover_devices()?;
            devices
                .first()
                .map(|d| d.port_name.clone())
                .ok_or_else(|| SerialError::PortNotFound("no PowerPack device detected".to_string()))?
        } else {
            endpoint.to_string()
        };

        let interface = SerialInterface::open(&port_name, self.baud_rate)?;
        Ok(Box::new(interface))
    }
}
