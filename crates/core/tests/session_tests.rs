// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use halwire_config::{ConfigIssue, HalConfig};
use halwire_core::bridge::{Publisher, Subscriber};
use halwire_core::mock::MockTarget;
use halwire_core::{
    builtin_catalog, DispatchError, EmulatorTarget, InterceptAction, Payload, Publish,
    PeripheralId, Session, SessionError, StopEvent,
};
use std::path::Path;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);
const HUART: u64 = 0x2000_0100;
const USART2: u64 = 0x4000_4400;

fn config(out_dir: &Path, rx_port: u16, intercepts: &str) -> HalConfig {
    let yaml = format!(
        r#"
machine:
  arch: cortex-m4
  vector_base: 0x08000000
memories:
  ram:
    base_addr: 0x20000000
    size: 0x10000
symbols:
  0x08000401: HAL_UART_Transmit
  0x08000501: HAL_GetTick
{intercepts}
options:
  tx_port: 0
  rx_port: {rx_port}
  output_dir: {dir}
"#,
        intercepts = intercepts,
        rx_port = rx_port,
        dir = out_dir.display()
    );
    let mut config = HalConfig::new();
    config
        .add_yaml_str(&yaml, &out_dir.join("session.yaml"))
        .unwrap();
    config
}

const INTERCEPTS: &str = r#"
intercepts:
  - class: stm32f4.UART
    function: HAL_UART_Transmit
  - class: generic.ReturnConstant
    function: HAL_GetTick
    registration_args: { ret_value: 1234, silent: true }
"#;

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_session_services_intercepts_and_bridge() {
    let dir = tempfile::tempdir().unwrap();
    // Device side: publishes into the session, subscribes to what the session emits.
    let device = Publisher::bind("127.0.0.1:0").unwrap();
    let cfg = config(dir.path(), device.local_addr().port(), INTERCEPTS);

    let target = MockTarget::arm();
    let injector = target.injector();
    let mut session = Session::start(cfg, target, builtin_catalog()).unwrap();
    assert_eq!(injector.vector_base(), Some(0x0800_0000));
    assert_eq!(session.target().breakpoints.len(), 2);

    let mut device_rx = Subscriber::connect(session.publisher().local_addr().to_string());
    assert!(session.publisher().wait_for_subscribers(1, WAIT));
    assert!(device.wait_for_subscribers(1, WAIT));

    // Guest: HAL_UART_Transmit(&huart2, "hello", 5) called from 0x08000123.
    {
        let target = session.target_mut();
        target.write_word(HUART, USART2).unwrap();
        target.write_memory(0x2000_0200, b"hello").unwrap();
        target.push_call(0x0800_0400, 0x0800_0123, &[HUART, 0x2000_0200, 5]);
        target.push_call(0x0800_0500, 0x0800_0133, &[]);
    }

    assert_eq!(session.step().unwrap(), Some(InterceptAction::ReturnValue(0)));
    assert_eq!(session.target_mut().pc().unwrap(), 0x0800_0123);
    let msg = device_rx.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(msg.topic, "Peripheral.UARTPublisher.write");
    assert_eq!(msg.payload.get_u64("id"), Some(USART2));
    assert_eq!(msg.payload.get_bytes("chars"), Some(&b"hello"[..]));

    assert_eq!(session.step().unwrap(), Some(InterceptAction::ReturnValue(1234)));
    assert_eq!(session.target_mut().read_register("r0").unwrap(), 1234);

    device
        .publish(
            "Peripheral.UARTPublisher.rx_data",
            Payload::new().with("id", USART2).with("chars", &b"abc"[..]),
        )
        .unwrap();
    let uart = session.models().uart.clone();
    assert!(wait_until(|| uart.pending(&PeripheralId::from(USART2)) == 3));

    session.run().unwrap();
    assert_eq!(session.stats().hits(0x0800_0400), 1);
    session.shutdown().unwrap();

    let stats = std::fs::read_to_string(dir.path().join("stats.yaml")).unwrap();
    assert!(stats.contains("HAL_GetTick"));
    device.shutdown();
}

#[test]
fn test_invalid_intercepts_prevent_start() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        dir.path(),
        1,
        r#"
intercepts:
  - class: stm32f4.Nonexistent
    function: HAL_UART_Transmit
  - class: generic.ReturnZero
    function: HAL_GetTick
    registration_args: { bogus: 1 }
  - class: generic.SkipFunc
    function: not_in_symbols
"#,
    );

    let err = Session::start(cfg, MockTarget::arm(), builtin_catalog()).unwrap_err();
    let SessionError::Config(err) = err else {
        panic!("expected a configuration error, got {:?}", err);
    };
    let issues = err.0.issues();
    assert_eq!(issues.len(), 3);
    assert!(issues
        .iter()
        .any(|i| matches!(i, ConfigIssue::UnresolvedSymbol { function, .. } if function == "not_in_symbols")));
    assert!(issues
        .iter()
        .any(|i| matches!(i, ConfigIssue::UnknownHandlerClass { class, .. } if class == "stm32f4.Nonexistent")));
    assert!(issues
        .iter()
        .any(|i| matches!(i, ConfigIssue::InvalidHandlerArgs { .. })));
}

#[test]
fn test_stop_at_unbound_address_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 1, INTERCEPTS);
    let mut target = MockTarget::arm();
    target.push_stop(StopEvent::Breakpoint { pc: 0x0800_0600 });

    let mut session = Session::start(cfg, target, builtin_catalog()).unwrap();
    let err = session.run().unwrap_err();
    assert!(matches!(
        err,
        SessionError::Dispatch(DispatchError::Unmapped(0x0800_0600))
    ));
    session.shutdown().unwrap();
}
