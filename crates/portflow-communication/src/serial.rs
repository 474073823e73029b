//! Serial port transport implementation
//!
//! Provides the shipped [`Transport`] backed by a real serial port, for
//! direct hardware connection to CNC controllers via USB or RS-232.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Baud rate configuration
//! - Blocking write, short-timeout read for pump loops

use crate::transport::Transport;
use parking_lot::Mutex;
use portflow_core::{Error, Result};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// List available serial ports on the system
///
/// Returns a list of available ports with information about each one.
/// Filters ports to include only CNC controller patterns:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    match serialport::available_ports() {
        Ok(ports) => {
            let port_infos: Vec<SerialPortInfo> = ports
                .iter()
                .filter(|port| is_valid_cnc_port(&port.port_name))
                .map(|port| {
                    let info = SerialPortInfo::new(&port.port_name, get_port_description(port));

                    match &port.port_type {
                        serialport::SerialPortType::UsbPort(usb_info) => {
                            let mut info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                            if let Some(ref mfg) = usb_info.manufacturer {
                                info = info.with_manufacturer(mfg);
                            }
                            if let Some(ref serial) = usb_info.serial_number {
                                info = info.with_serial_number(serial);
                            }
                            info
                        }
                        _ => info,
                    }
                })
                .collect();

            Ok(port_infos)
        }
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(Error::other(format!("Failed to enumerate ports: {}", e)))
        }
    }
}

/// Check if a port name matches CNC controller patterns
fn is_valid_cnc_port(port_name: &str) -> bool {
    // Windows COM ports
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    // Linux USB and ACM devices
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }

    // macOS serial and modem devices
    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }

    false
}

/// Get a user-friendly description for a port
fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Trait for serial port I/O operations
pub trait ReadWrite: io::Read + io::Write + Send {}
impl<T: io::Read + io::Write + Send> ReadWrite for T {}

/// Real serial port transport using the serialport crate
///
/// The flow coordinator holds this behind [`Transport`]; the owner keeps a
/// reference for the read pump and the queued-for-send counter.
pub struct SerialTransport {
    port_name: String,
    port: Mutex<Box<dyn ReadWrite>>,
    queued: AtomicUsize,
}

impl SerialTransport {
    /// Open a serial port at the given baud rate
    ///
    /// Uses a short read timeout so pump loops stay responsive.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let builder = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(10))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None);

        match builder.open_native() {
            Ok(port) => Ok(SerialTransport {
                port_name: port_name.to_string(),
                port: Mutex::new(Box::new(port)),
                queued: AtomicUsize::new(0),
            }),
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", port_name, e);
                Err(Error::FailedToOpen {
                    port: port_name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Wrap an already-open I/O object
    ///
    /// Used for virtual ports and loopback setups.
    pub fn from_io(port_name: impl Into<String>, io: Box<dyn ReadWrite>) -> Self {
        SerialTransport {
            port_name: port_name.into(),
            port: Mutex::new(io),
            queued: AtomicUsize::new(0),
        }
    }

    /// Read data from the port
    ///
    /// Returns `Ok(0)` on timeout with no data.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.lock().read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Write a full buffer and flush, mapping failures to [`Error`]
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let mut port = self.port.lock();
        port.write_all(data).and_then(|_| port.flush()).map_err(|e| {
            Error::WriteFailed {
                port: self.port_name.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Record how many commands the owner currently has queued for send
    pub fn set_queued_for_send(&self, count: usize) {
        self.queued.store(count, Ordering::Relaxed);
    }
}

impl Transport for SerialTransport {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.port.lock().write(data)
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn queued_for_send(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_name", &self.port_name)
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .finish()
    }
}
