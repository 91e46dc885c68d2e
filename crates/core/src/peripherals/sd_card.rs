// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{lock, PeripheralError, PeripheralId, PeripheralModel};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_BLOCK_SIZE: usize = 0x200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardConfig {
    pub path: PathBuf,
    pub block_size: usize,
}

/// Block storage backed by one flat image file per card.
///
/// A card's geometry is fixed on first use: either an explicit [`configure`]
/// call or the default `sd_card_<id>.bin` image with 512-byte blocks.
///
/// [`configure`]: SdCardModel::configure
#[derive(Debug)]
pub struct SdCardModel {
    cards: Mutex<HashMap<PeripheralId, CardConfig>>,
    base_dir: Option<PathBuf>,
}

impl SdCardModel {
    pub const NAME: &'static str = "SDCardModel";

    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            cards: Mutex::new(HashMap::new()),
            base_dir,
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn configure(&self, id: &PeripheralId, path: Option<&Path>, block_size: usize) -> CardConfig {
        let path = match path {
            Some(p) => self.resolve(p),
            None => self.resolve(&Self::default_file(id)),
        };
        let config = CardConfig {
            path,
            block_size: block_size.max(1),
        };
        info!(
            "SD card {} -> {:?} ({} byte blocks)",
            id, config.path, config.block_size
        );
        lock(&self.cards).insert(id.clone(), config.clone());
        config
    }

    pub fn default_file(id: &PeripheralId) -> PathBuf {
        PathBuf::from(format!("sd_card_{}.bin", id))
    }

    pub fn config(&self, id: &PeripheralId) -> CardConfig {
        let mut cards = lock(&self.cards);
        cards
            .entry(id.clone())
            .or_insert_with(|| CardConfig {
                path: self.resolve(&Self::default_file(id)),
                block_size: DEFAULT_BLOCK_SIZE,
            })
            .clone()
    }

    pub fn block_size(&self, id: &PeripheralId) -> usize {
        self.config(id).block_size
    }

    /// Reads one whole block. Missing images and blocks extending past the end of the
    /// image are errors, never zero-filled.
    pub fn read_block(&self, id: &PeripheralId, block: u64) -> Result<Vec<u8>, PeripheralError> {
        let card = self.config(id);
        let io_err = |source| PeripheralError::Io {
            path: card.path.clone(),
            source,
        };
        let mut file = match File::open(&card.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PeripheralError::MissingStore {
                    id: id.clone(),
                    path: card.path.clone(),
                })
            }
            Err(e) => return Err(io_err(e)),
        };
        let len = file.metadata().map_err(io_err)?.len();
        let size = card.block_size as u64;
        let Some(offset) = block
            .checked_mul(size)
            .filter(|o| o.checked_add(size).is_some_and(|end| end <= len))
        else {
            return Err(PeripheralError::BlockOutOfRange {
                id: id.clone(),
                block,
                path: card.path.clone(),
                len,
            });
        };
        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        let mut data = vec![0u8; card.block_size];
        file.read_exact(&mut data).map_err(io_err)?;
        debug!("SD {} read block {}", id, block);
        Ok(data)
    }

    /// Writes `data` at the start of `block`, creating the image on first use.
    pub fn write_block(&self, id: &PeripheralId, block: u64, data: &[u8]) -> Result<(), PeripheralError> {
        let card = self.config(id);
        let io_err = |source| PeripheralError::Io {
            path: card.path.clone(),
            source,
        };
        let Some(offset) = block
            .checked_mul(card.block_size as u64)
            .filter(|o| o.checked_add(data.len() as u64).is_some())
        else {
            return Err(PeripheralError::BlockOutOfRange {
                id: id.clone(),
                block,
                path: card.path.clone(),
                len: std::fs::metadata(&card.path).map_or(0, |m| m.len()),
            });
        };
        if let Some(parent) = card.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&card.path)
            .map_err(io_err)?;
        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        file.write_all(data).map_err(io_err)?;
        debug!("SD {} wrote {} bytes at block {}", id, data.len(), block);
        Ok(())
    }
}

impl PeripheralModel for SdCardModel {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let sd = SdCardModel::new(Some(dir.path().to_path_buf()));
        let id = PeripheralId::from(0u64);
        let mut data = vec![0u8; 64];
        data.push(0xff);
        sd.configure(&id, None, data.len());

        sd.write_block(&id, 3, &data).unwrap();
        assert_eq!(sd.read_block(&id, 3).unwrap(), data);
        assert!(dir.path().join("sd_card_0x0.bin").exists());
    }

    #[test]
    fn test_missing_store_and_eof_fail() {
        let dir = tempfile::tempdir().unwrap();
        let sd = SdCardModel::new(Some(dir.path().to_path_buf()));
        let id = PeripheralId::from("card");

        assert!(matches!(
            sd.read_block(&id, 0),
            Err(PeripheralError::MissingStore { .. })
        ));

        sd.write_block(&id, 0, &[0xab; DEFAULT_BLOCK_SIZE]).unwrap();
        assert_eq!(sd.read_block(&id, 0).unwrap(), vec![0xab; DEFAULT_BLOCK_SIZE]);
        assert!(matches!(
            sd.read_block(&id, 1),
            Err(PeripheralError::BlockOutOfRange { block: 1, .. })
        ));
    }

    #[test]
    fn test_huge_block_number_is_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let sd = SdCardModel::new(Some(dir.path().to_path_buf()));
        let id = PeripheralId::from(2u64);
        sd.write_block(&id, 0, &[1; DEFAULT_BLOCK_SIZE]).unwrap();

        for block in [u64::MAX, u64::MAX / DEFAULT_BLOCK_SIZE as u64] {
            assert!(matches!(
                sd.read_block(&id, block),
                Err(PeripheralError::BlockOutOfRange { .. })
            ));
        }
        assert!(matches!(
            sd.write_block(&id, u64::MAX, &[2; DEFAULT_BLOCK_SIZE]),
            Err(PeripheralError::BlockOutOfRange { .. })
        ));
        assert_eq!(sd.read_block(&id, 0).unwrap(), vec![1; DEFAULT_BLOCK_SIZE]);
    }

    #[test]
    fn test_explicit_image_path() {
        let dir = tempfile::tempdir().unwrap();
        let sd = SdCardModel::new(Some(dir.path().to_path_buf()));
        let id = PeripheralId::from(1u64);
        let cfg = sd.configure(&id, Some(Path::new("images/card1.img")), 16);
        assert_eq!(cfg.path, dir.path().join("images/card1.img"));

        sd.write_block(&id, 2, &[7; 16]).unwrap();
        let raw = std::fs::read(&cfg.path).unwrap();
        assert_eq!(raw.len(), 48);
        assert_eq!(&raw[32..], &[7; 16]);
        assert_eq!(sd.block_size(&id), 16);
    }
}
