//! Tests for address parsing.

use std::time::Duration;

use rstest::*;

use ivkit::{Address, DataBits, FlowControl, InstrumentError, Parity, Scheme, StopBits};

#[rstest]
#[case("/dev/ttyUSB0", Scheme::SerialDevice)]
#[case("COM3", Scheme::SerialDevice)]
#[case("hw:///dev/ttyS0?baudrate=57600", Scheme::SerialUrl)]
#[case("HW:///dev/ttyS0", Scheme::SerialUrl)]
#[case("socket://192.168.1.204:5025", Scheme::Socket)]
#[case("socket://k2450.lab:5025?dead_port=none", Scheme::Socket)]
fn test_scheme_selection(#[case] addr: &str, #[case] scheme: Scheme) {
    let addr: Address = addr.parse().unwrap();
    assert_eq!(addr.scheme(), scheme);
    assert_eq!(addr.is_serial(), scheme != Scheme::Socket);
}

#[rstest]
#[case("gpib://0::24::INSTR")]
#[case("rfc2217://host:2217")]
#[case("tcp://host:5025")]
fn test_unknown_scheme(#[case] addr: &str) {
    assert!(matches!(
        addr.parse::<Address>(),
        Err(InstrumentError::UnsupportedScheme(_))
    ));
}

#[rstest]
fn test_serial_device_defaults() {
    let addr: Address = "/dev/ttyUSB0".parse().unwrap();
    let settings = addr.serial_settings().unwrap();
    assert_eq!(settings.port, "/dev/ttyUSB0");
    assert_eq!(settings.baud_rate, 9600);
    assert_eq!(settings.data_bits, DataBits::Eight);
    assert_eq!(settings.parity, Parity::None);
    assert_eq!(settings.stop_bits, StopBits::One);
    assert_eq!(settings.flow_control, FlowControl::None);
    assert_eq!(addr.terminators(), ("\n", "\n"));
    assert!(addr.socket_settings().is_none());
}

#[rstest]
fn test_serial_url_parameters() {
    let addr: Address = "hw:///dev/ttyS0?baudrate=57600&bytesize=SEVENBITS&parity=PARITY_ODD\
        &stopbits=STOPBITS_TWO&timeout=1.5&xonxoff=True&write_term=cr&read_term=crlf"
        .parse()
        .unwrap();
    let settings = addr.serial_settings().unwrap();
    assert_eq!(settings.port, "/dev/ttyS0");
    assert_eq!(settings.baud_rate, 57600);
    assert_eq!(settings.data_bits, DataBits::Seven);
    assert_eq!(settings.parity, Parity::Odd);
    assert_eq!(settings.stop_bits, StopBits::Two);
    assert_eq!(settings.flow_control, FlowControl::Software);
    assert_eq!(settings.timeout, Duration::from_millis(1500));
    assert_eq!(addr.terminators(), ("\r", "\r\n"));
}

#[rstest]
fn test_serial_url_hardware_flow() {
    let addr: Address = "hw:///dev/ttyS0?rtscts=1&dsrdtr=0&timeout=None"
        .parse()
        .unwrap();
    let settings = addr.serial_settings().unwrap();
    assert_eq!(settings.flow_control, FlowControl::Hardware);
    assert_eq!(settings.timeout, Duration::from_secs(3));
}

#[rstest]
#[case("hw:///dev/ttyS0?baudrate=fast")]
#[case("hw:///dev/ttyS0?colour=blue")]
#[case("hw:///dev/ttyS0?dsrdtr=1")]
#[case("hw:///dev/ttyS0?parity")]
#[case("hw://?baudrate=9600")]
#[case("socket://no-port-here")]
#[case("socket://host:99999")]
#[case("socket://:5025")]
#[case("")]
fn test_invalid_address(#[case] addr: &str) {
    assert!(matches!(
        addr.parse::<Address>(),
        Err(InstrumentError::InvalidAddress { .. })
    ));
}

#[rstest]
fn test_socket_settings() {
    let addr: Address = "socket://10.0.0.5:5025".parse().unwrap();
    let settings = addr.socket_settings().unwrap();
    assert_eq!(settings.host, "10.0.0.5");
    assert_eq!(settings.port, 5025);
    assert_eq!(settings.dead_session_port, Some(5030));
    assert_eq!(settings.timeout, Duration::from_secs(3));
    assert_eq!(addr.to_string(), "socket://10.0.0.5:5025");
}

#[rstest]
fn test_socket_query_parameters() {
    let addr: Address = "socket://10.0.0.5:5025?dead_port=none&timeout=10&read_term=crlf"
        .parse()
        .unwrap();
    let settings = addr.socket_settings().unwrap();
    assert_eq!(settings.dead_session_port, None);
    assert_eq!(settings.timeout, Duration::from_secs(10));
    assert_eq!(addr.terminators(), ("\n", "\r\n"));
}

#[rstest]
#[case("socket://[::1]:5025", "::1")]
#[case("socket://[fe80::1]:5025?dead_port=none", "fe80::1")]
#[case("socket://k2450.lab:5025", "k2450.lab")]
fn test_socket_host(#[case] addr: &str, #[case] host: &str) {
    let addr: Address = addr.parse().unwrap();
    let settings = addr.socket_settings().unwrap();
    assert_eq!(settings.host, host);
    assert_eq!(settings.port, 5025);
}

/// A bracketed IPv6 host must resolve without its brackets.
#[rstest]
fn test_socket_ipv6_resolves() {
    use std::net::ToSocketAddrs;

    let addr: Address = "socket://[::1]:5025".parse().unwrap();
    let settings = addr.socket_settings().unwrap();
    let resolved = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .unwrap()
        .next()
        .unwrap();
    assert!(resolved.is_ipv6());
}

#[rstest]
#[case("hw:///dev/serial/by-id/usb-FTDI%20cable", "/dev/serial/by-id/usb-FTDI cable")]
#[case("hw://COM3?baudrate=19200", "COM3")]
#[case("hw:///dev/ttyS0?baudrate=9600", "/dev/ttyS0")]
fn test_serial_url_device(#[case] addr: &str, #[case] device: &str) {
    let addr: Address = addr.parse().unwrap();
    assert_eq!(addr.serial_settings().unwrap().port, device);
}
