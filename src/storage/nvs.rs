//! NVS-backed configuration storage for ESP32 targets.

use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};

use super::{ConfigStore, StorageError, CONFIG_NAMESPACE};

/// Largest blob the store will read. Comfortably above the worst-case
/// encoded configuration (255 credentials at boundary lengths).
const MAX_BLOB_SIZE: usize = 32 * 1024;

/// Configuration store backed by the default NVS partition.
pub struct NvsStore {
    nvs: Option<EspNvs<NvsDefault>>,
}

impl NvsStore {
    pub fn new() -> Self {
        Self { nvs: None }
    }
}

impl Default for NvsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn esp_err(e: esp_idf_sys::EspError) -> StorageError {
    StorageError::Io(format!("{:?}", e))
}

impl ConfigStore for NvsStore {
    fn open(&mut self) -> Result<(), StorageError> {
        if self.nvs.is_some() {
            return Ok(());
        }
        let partition = EspNvsPartition::<NvsDefault>::take().map_err(esp_err)?;
        let nvs = EspNvs::new(partition, CONFIG_NAMESPACE, true).map_err(esp_err)?;
        self.nvs = Some(nvs);
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let nvs = self.nvs.as_ref().ok_or(StorageError::NotOpen)?;
        let mut buf = vec![0u8; MAX_BLOB_SIZE];
        match nvs.get_raw(key, &mut buf) {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(esp_err(e)),
        }
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let nvs = self.nvs.as_mut().ok_or(StorageError::NotOpen)?;
        nvs.set_raw(key, value).map_err(esp_err)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        // esp-idf-svc commits on set_raw; nothing further to flush.
        if self.nvs.is_none() {
            return Err(StorageError::NotOpen);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.nvs = None;
    }
}
