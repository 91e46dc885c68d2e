// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Terminal for one emulated UART: guest output is written to a local sink, typed
//! lines are sent back as received bytes.

use crate::IoServer;
use halwire_core::bridge::{peripheral_topic, BridgeError, Payload};
use halwire_core::peripherals::{ByteStreamModel, PeripheralId};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const UART_MODEL: &str = ByteStreamModel::UART;

#[derive(Debug, Clone)]
pub struct UartConsole {
    server: Arc<IoServer>,
    id: PeripheralId,
}

impl UartConsole {
    /// Output for UARTs other than `id` is ignored.
    pub fn new<W>(server: Arc<IoServer>, id: PeripheralId, out: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let out = Mutex::new(out);
        let filter = id.clone();
        server.register_topic(&peripheral_topic(UART_MODEL, "write"), move |_, msg| {
            let from = msg.payload.get("id").and_then(PeripheralId::from_value);
            if from.as_ref() != Some(&filter) {
                debug!("Ignoring UART output for {:?}", from);
                return;
            }
            let Some(chars) = msg.payload.get_bytes("chars") else {
                warn!("UART write without 'chars'");
                return;
            };
            if let Ok(mut out) = out.lock() {
                if let Err(e) = out.write_all(chars).and_then(|_| out.flush()) {
                    warn!("UART console output failed: {}", e);
                }
            }
        });
        Self { server, id }
    }

    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    pub fn send_data(&self, chars: &[u8]) -> Result<(), BridgeError> {
        self.server.send_msg(
            &peripheral_topic(UART_MODEL, "rx_data"),
            Payload::new().with("id", self.id.to_value()).with("chars", chars),
        )
    }
}

/// Maps one line of terminal input to the bytes sent to the guest. An empty line
/// sends nothing; a literal `\n` sends a carriage return and line feed.
pub fn translate_input(line: &str) -> Option<Vec<u8>> {
    match line {
        "" => None,
        "\\n" => Some(b"\r\n".to_vec()),
        other => Some(other.as_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_input() {
        assert_eq!(translate_input(""), None);
        assert_eq!(translate_input("\\n"), Some(b"\r\n".to_vec()));
        assert_eq!(translate_input("AT+RST"), Some(b"AT+RST".to_vec()));
    }
}
