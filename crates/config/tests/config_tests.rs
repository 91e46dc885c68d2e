// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use halwire_config::{AccessMode, Arch, ConfigIssue, HalConfig};
use std::fs;

const MEMORY_YAML: &str = r#"
machine:
  arch: cortex-m3
  vector_base: 0x08000000
memories:
  flash:
    base_addr: 0x08000000
    size: 0x100000
    permissions: r-x
    file: firmware.bin
  ram:
    base_addr: 0x20000000
    size: "128KiB"
peripherals:
  logger:
    base_addr: 0x40000000
    size: 0x20000000
    emulate: GenericPeripheral
    permissions: rw-
"#;

const INTERCEPT_YAML: &str = r#"
symbols:
  0x08001235: HAL_UART_Transmit
  0x08001301: HAL_Delay
intercepts:
  - class: stm32f4.UART
    function: HAL_UART_Transmit
  - class: generic.ReturnZero
    function: delay_wrapper
    symbol: HAL_Delay
    registration_args: { silent: true }
  - class: generic.Counter
    function: rx_flag
    addr: 0x20000100
    watchpoint: w
    run_once: true
"#;

#[test]
fn test_two_file_config_resolves_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("firmware.bin"), [0u8; 16]).unwrap();
    let mem_path = dir.path().join("memory.yaml");
    let int_path = dir.path().join("intercepts.yaml");
    fs::write(&mem_path, MEMORY_YAML).unwrap();
    fs::write(&int_path, INTERCEPT_YAML).unwrap();

    let mut cfg = HalConfig::from_files(&[&mem_path, &int_path]).unwrap();
    let report = cfg.prepare_and_validate();
    assert!(report.is_ok(), "{}", report);

    assert_eq!(cfg.machine.arch, Arch::Arm);
    assert_eq!(cfg.memories["ram"].size, 128 * 1024);
    assert_eq!(
        cfg.memories["flash"].file.as_deref(),
        Some(dir.path().join("firmware.bin").as_path())
    );
    assert!(cfg.memories["logger"].is_peripheral);

    assert_eq!(cfg.intercepts.len(), 3);
    assert_eq!(cfg.intercepts[0].addr, Some(0x0800_1234));
    assert_eq!(cfg.intercepts[1].addr, Some(0x0800_1300));
    assert_eq!(cfg.intercepts[1].config_file, int_path);
    assert_eq!(cfg.intercepts[2].access_mode(), Some(AccessMode::Write));
    assert!(cfg.intercepts[2].run_once);
    assert_eq!(cfg.symbol_for(0x0800_1235), Some("HAL_UART_Transmit"));
}

#[test]
fn test_peripheral_without_emulate_is_rejected() {
    let mut cfg = HalConfig::new();
    cfg.add_yaml_str(
        r#"
peripherals:
  uart:
    base_addr: 0x40011000
    size: 0x1000
"#,
        std::path::Path::new("periph.yaml"),
    )
    .unwrap();

    let report = cfg.validate();
    assert!(matches!(
        report.issues(),
        [ConfigIssue::MissingEmulate { name, .. }] if name == "uart"
    ));
}

#[test]
fn test_unknown_intercept_field_fails_to_load() {
    let mut cfg = HalConfig::new();
    let err = cfg
        .add_yaml_str(
            "intercepts:\n  - class: generic.ReturnZero\n    function: f\n    adress: 0x10\n",
            std::path::Path::new("typo.yaml"),
        )
        .unwrap_err();
    assert!(format!("{:#}", err).contains("typo.yaml"));
}

#[test]
fn test_csv_symbols_feed_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("syms.csv");
    fs::write(&csv, "sd_mmc_init, 0x4001, 0x4040\n").unwrap();

    let mut cfg = HalConfig::new();
    assert_eq!(cfg.add_csv_symbols(&csv).unwrap(), 1);
    cfg.add_yaml_str(
        "intercepts:\n  - class: asf.SdMmc\n    function: sd_mmc_init\n",
        std::path::Path::new("sd.yaml"),
    )
    .unwrap();

    assert!(cfg.prepare_and_validate().is_ok());
    assert_eq!(cfg.intercepts[0].addr, Some(0x4000));
}
