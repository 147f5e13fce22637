//! Address strings that select and configure a transport.
//!
//! Three forms are understood:
//!
//! - A plain device path such as `/dev/ttyUSB0` or `COM3` opens a serial port with defaults.
//! - `hw://<device>?key=value&...` opens a serial port configured by query parameters, e.g.
//!   `hw:///dev/ttyS0?baudrate=57600&bytesize=EIGHTBITS&parity=PARITY_NONE&stopbits=STOPBITS_ONE`.
//! - `socket://host:port[?key=value&...]` opens a TCP socket.
//!
//! Everything else is rejected with [`InstrumentError::UnsupportedScheme`].

use std::{fmt::Display, str::FromStr, time::Duration};

use percent_encoding::percent_decode_str;
use url::{Host, Url};

use crate::{DEFAULT_TIMEOUT, InstrumentError};

/// Default baud rate for serial ports.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Port on which instruments listen for the token that closes a stale session.
pub const DEFAULT_DEAD_SESSION_PORT: u16 = 5030;

/// The transport scheme an [`Address`] selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    /// A plain serial device path.
    SerialDevice,
    /// A serial device with settings given as query parameters (`hw://`).
    SerialUrl,
    /// A TCP socket (`socket://`).
    Socket,
}

/// Number of data bits per serial character.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataBits {
    /// 5 bits
    Five,
    /// 6 bits
    Six,
    /// 7 bits
    Seven,
    /// 8 bits
    Eight,
}

/// Serial parity checking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of serial stop bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopBits {
    /// One stop bit.
    One,
    /// Two stop bits.
    Two,
}

/// Serial flow control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowControl {
    /// No flow control.
    None,
    /// XON/XOFF.
    Software,
    /// RTS/CTS.
    Hardware,
}

/// Settings to open a serial port with.
#[derive(Clone, Debug, PartialEq)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Flow control.
    pub flow_control: FlowControl,
    /// Read and write timeout.
    pub timeout: Duration,
    /// Terminator appended to commands.
    pub write_terminator: String,
    /// Terminator that ends responses.
    pub read_terminator: String,
}

impl SerialSettings {
    fn with_defaults(port: &str) -> Self {
        Self {
            port: port.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: DEFAULT_TIMEOUT,
            write_terminator: "\n".to_string(),
            read_terminator: "\n".to_string(),
        }
    }
}

/// Settings to open a TCP socket with.
#[derive(Clone, Debug, PartialEq)]
pub struct SocketSettings {
    /// Host name or IP address.
    pub host: String,
    /// TCP port of the instrument's command interface.
    pub port: u16,
    /// Port that accepts the token to close a stale session, if the instrument has one.
    pub dead_session_port: Option<u16>,
    /// Read and write timeout.
    pub timeout: Duration,
    /// Terminator appended to commands.
    pub write_terminator: String,
    /// Terminator that ends responses.
    pub read_terminator: String,
}

#[derive(Clone, Debug, PartialEq)]
enum Endpoint {
    Serial(SerialSettings),
    Socket(SocketSettings),
}

/// A parsed transport selector.
///
/// An address is immutable once parsed.
///
/// # Example
///
/// ```
/// use ivkit::{Address, Scheme};
///
/// let addr: Address = "socket://192.168.1.20:5025".parse().unwrap();
/// assert_eq!(addr.scheme(), Scheme::Socket);
/// assert_eq!(addr.socket_settings().unwrap().dead_session_port, Some(5030));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Address {
    raw: String,
    scheme: Scheme,
    endpoint: Endpoint,
}

impl Address {
    /// The scheme of this address.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The address string as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this address selects a serial port, either way it was written.
    pub fn is_serial(&self) -> bool {
        matches!(self.endpoint, Endpoint::Serial(_))
    }

    /// Serial settings, if this is a serial address.
    pub fn serial_settings(&self) -> Option<&SerialSettings> {
        match &self.endpoint {
            Endpoint::Serial(settings) => Some(settings),
            Endpoint::Socket(_) => None,
        }
    }

    /// Socket settings, if this is a socket address.
    pub fn socket_settings(&self) -> Option<&SocketSettings> {
        match &self.endpoint {
            Endpoint::Socket(settings) => Some(settings),
            Endpoint::Serial(_) => None,
        }
    }

    /// Terminators (write, read) that interfaces opened from this address use.
    pub fn terminators(&self) -> (&str, &str) {
        match &self.endpoint {
            Endpoint::Serial(s) => (&s.write_terminator, &s.read_terminator),
            Endpoint::Socket(s) => (&s.write_terminator, &s.read_terminator),
        }
    }

    fn invalid(raw: &str, reason: impl Into<String>) -> InstrumentError {
        InstrumentError::InvalidAddress {
            address: raw.to_string(),
            reason: reason.into(),
        }
    }

    fn parse_url(raw: &str) -> Result<Url, InstrumentError> {
        Url::parse(raw).map_err(|err| Self::invalid(raw, err.to_string()))
    }

    fn parse_serial_url(raw: &str) -> Result<Self, InstrumentError> {
        let url = Self::parse_url(raw)?;
        // `hw://COM3` puts the device into the host, `hw:///dev/ttyS0` into the path
        let device = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
        let device = percent_decode_str(&device)
            .decode_utf8()
            .map_err(|_| Self::invalid(raw, "serial device is not valid UTF-8"))?;
        if device.is_empty() {
            return Err(Self::invalid(raw, "no serial device given"));
        }
        let mut settings = SerialSettings::with_defaults(&device);
        for (key, value) in url.query_pairs() {
            let (key, value) = (key.trim(), value.trim());
            match key {
                "baudrate" => settings.baud_rate = parse_num(raw, key, value)?,
                "bytesize" => settings.data_bits = parse_data_bits(raw, value)?,
                "parity" => settings.parity = parse_parity(raw, value)?,
                "stopbits" => settings.stop_bits = parse_stop_bits(raw, value)?,
                "timeout" => {
                    if let Some(timeout) = parse_seconds(raw, key, value)? {
                        settings.timeout = timeout;
                    }
                }
                "write_timeout" | "inter_byte_timeout" => {
                    // serialport has a single timeout for both directions
                    if let Some(timeout) = parse_seconds(raw, key, value)? {
                        settings.timeout = settings.timeout.max(timeout);
                    }
                }
                "xonxoff" => {
                    if parse_bool(raw, key, value)? {
                        settings.flow_control = FlowControl::Software;
                    }
                }
                "rtscts" => {
                    if parse_bool(raw, key, value)? {
                        settings.flow_control = FlowControl::Hardware;
                    }
                }
                "dsrdtr" => {
                    if parse_bool(raw, key, value)? {
                        return Err(Self::invalid(raw, "DSR/DTR flow control is not supported"));
                    }
                }
                "write_term" => settings.write_terminator = parse_terminator(raw, value)?,
                "read_term" => settings.read_terminator = parse_terminator(raw, value)?,
                other => return Err(Self::invalid(raw, format!("unknown parameter '{other}'"))),
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            scheme: Scheme::SerialUrl,
            endpoint: Endpoint::Serial(settings),
        })
    }

    fn parse_socket(raw: &str) -> Result<Self, InstrumentError> {
        let url = Self::parse_url(raw)?;
        let host = match url.host() {
            Some(Host::Domain("")) | None => return Err(Self::invalid(raw, "no host given")),
            Some(Host::Domain(name)) => name.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
        };
        let port = url
            .port()
            .ok_or_else(|| Self::invalid(raw, "expected host:port"))?;
        let mut settings = SocketSettings {
            host,
            port,
            dead_session_port: Some(DEFAULT_DEAD_SESSION_PORT),
            timeout: DEFAULT_TIMEOUT,
            write_terminator: "\n".to_string(),
            read_terminator: "\n".to_string(),
        };
        for (key, value) in url.query_pairs() {
            let (key, value) = (key.trim(), value.trim());
            match key {
                "timeout" => {
                    if let Some(timeout) = parse_seconds(raw, key, value)? {
                        settings.timeout = timeout;
                    }
                }
                "dead_port" => {
                    settings.dead_session_port = match value.to_ascii_lowercase().as_str() {
                        "none" => None,
                        _ => Some(parse_num(raw, key, value)?),
                    }
                }
                "write_term" => settings.write_terminator = parse_terminator(raw, value)?,
                "read_term" => settings.read_terminator = parse_terminator(raw, value)?,
                other => return Err(Self::invalid(raw, format!("unknown parameter '{other}'"))),
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            scheme: Scheme::Socket,
            endpoint: Endpoint::Socket(settings),
        })
    }
}

impl FromStr for Address {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(Self::invalid(raw, "empty address"));
        }
        match raw.split_once("://") {
            Some((scheme, _)) => match scheme.to_ascii_lowercase().as_str() {
                "hw" => Self::parse_serial_url(raw),
                "socket" => Self::parse_socket(raw),
                _ => Err(InstrumentError::UnsupportedScheme(scheme.to_string())),
            },
            None => Ok(Self {
                raw: raw.to_string(),
                scheme: Scheme::SerialDevice,
                endpoint: Endpoint::Serial(SerialSettings::with_defaults(raw)),
            }),
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn parse_num<T: FromStr>(raw: &str, key: &str, value: &str) -> Result<T, InstrumentError> {
    value
        .parse()
        .map_err(|_| Address::invalid(raw, format!("'{value}' is not a valid {key}")))
}

fn parse_seconds(raw: &str, key: &str, value: &str) -> Result<Option<Duration>, InstrumentError> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let secs: f64 = parse_num(raw, key, value)?;
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| Address::invalid(raw, format!("'{value}' is not a valid {key}")))
}

fn parse_bool(raw: &str, key: &str, value: &str) -> Result<bool, InstrumentError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Address::invalid(raw, format!("'{value}' is not a valid {key}"))),
    }
}

fn parse_data_bits(raw: &str, value: &str) -> Result<DataBits, InstrumentError> {
    match value.to_ascii_uppercase().as_str() {
        "5" | "FIVEBITS" => Ok(DataBits::Five),
        "6" | "SIXBITS" => Ok(DataBits::Six),
        "7" | "SEVENBITS" => Ok(DataBits::Seven),
        "8" | "EIGHTBITS" => Ok(DataBits::Eight),
        _ => Err(Address::invalid(raw, format!("'{value}' is not a valid bytesize"))),
    }
}

fn parse_parity(raw: &str, value: &str) -> Result<Parity, InstrumentError> {
    match value.to_ascii_uppercase().as_str() {
        "N" | "NONE" | "PARITY_NONE" => Ok(Parity::None),
        "O" | "ODD" | "PARITY_ODD" => Ok(Parity::Odd),
        "E" | "EVEN" | "PARITY_EVEN" => Ok(Parity::Even),
        _ => Err(Address::invalid(raw, format!("'{value}' is not a valid parity"))),
    }
}

fn parse_stop_bits(raw: &str, value: &str) -> Result<StopBits, InstrumentError> {
    match value.to_ascii_uppercase().as_str() {
        "1" | "STOPBITS_ONE" => Ok(StopBits::One),
        "2" | "STOPBITS_TWO" => Ok(StopBits::Two),
        _ => Err(Address::invalid(raw, format!("'{value}' is not a valid stopbits"))),
    }
}

fn parse_terminator(raw: &str, value: &str) -> Result<String, InstrumentError> {
    match value.to_ascii_lowercase().as_str() {
        "lf" => Ok("\n".to_string()),
        "cr" => Ok("\r".to_string()),
        "crlf" => Ok("\r\n".to_string()),
        _ => Err(Address::invalid(raw, format!("'{value}' is not a valid terminator"))),
    }
}
