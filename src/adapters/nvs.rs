//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`] over the ESP-IDF NVS partition. Each call
//! opens the namespace, does its work, commits if it wrote, and closes
//! the handle again. Host builds use
//! [`MemoryStore`](crate::adapters::memory_store::MemoryStore) instead.
//!
//! NVS limits namespace and key names to 15 bytes; longer names are
//! rejected rather than truncated so two long keys cannot collide.

use esp_idf_svc::sys::*;
use log::{info, warn};

use crate::app::ports::{MAX_BLOB_BYTES, StorageError, StoragePort};

const NVS_NAME_MAX: usize = 15;

pub struct NvsStore {
    _private: (),
}

impl NvsStore {
    /// Initialise NVS flash. On first boot or after a layout version bump
    /// the partition is erased and initialised again.
    pub fn new() -> Result<Self, StorageError> {
        // SAFETY: nvs_flash_init / nvs_flash_erase run once from the main
        // task before any other NVS access.
        let ret = unsafe { nvs_flash_init() };
        if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
            warn!("NVS: erasing and re-initialising flash partition");
            if unsafe { nvs_flash_erase() } != ESP_OK {
                return Err(StorageError::IoError);
            }
            if unsafe { nvs_flash_init() } != ESP_OK {
                return Err(StorageError::IoError);
            }
        } else if ret != ESP_OK {
            return Err(StorageError::IoError);
        }
        info!("NVS: flash initialised");
        Ok(Self { _private: () })
    }

    /// NUL-terminated copy of a namespace or key name.
    fn c_name(name: &str) -> Result<[u8; NVS_NAME_MAX + 1], StorageError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > NVS_NAME_MAX || bytes.contains(&0) {
            warn!("NVS: invalid name '{}'", name);
            return Err(StorageError::IoError);
        }
        let mut buf = [0u8; NVS_NAME_MAX + 1];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }

    /// Open a namespace, run `f` with the handle, close it.
    fn with_handle<T>(
        namespace: &str,
        write: bool,
        f: impl FnOnce(nvs_handle_t) -> Result<T, esp_err_t>,
    ) -> Result<T, esp_err_t> {
        let ns = Self::c_name(namespace).map_err(|_| ESP_ERR_INVALID_ARG)?;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        let mut handle: nvs_handle_t = 0;
        // SAFETY: `ns` is NUL-terminated and outlives the call.
        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }
        let result = f(handle);
        // SAFETY: handle opened above and not used afterwards.
        unsafe { nvs_close(handle) };
        result
    }

    fn map_err(ret: esp_err_t) -> StorageError {
        match ret {
            ESP_ERR_NVS_NOT_FOUND => StorageError::NotFound,
            ESP_ERR_NVS_NOT_ENOUGH_SPACE => StorageError::Full,
            ESP_ERR_NVS_INVALID_LENGTH => StorageError::Corrupted,
            _ => StorageError::IoError,
        }
    }
}

impl StoragePort for NvsStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let key = Self::c_name(key)?;
        Self::with_handle(namespace, false, |handle| {
            let mut size: usize = 0;
            // SAFETY: size query with a null output pointer.
            let ret = unsafe {
                nvs_get_blob(handle, key.as_ptr().cast(), core::ptr::null_mut(), &mut size)
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            if size > buf.len() || size > MAX_BLOB_BYTES {
                return Err(ESP_FAIL);
            }
            // SAFETY: `buf` holds at least `size` bytes.
            let ret = unsafe {
                nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(size)
        })
        .map_err(Self::map_err)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_BYTES {
            return Err(StorageError::Full);
        }
        let key = Self::c_name(key)?;
        Self::with_handle(namespace, true, |handle| {
            // SAFETY: `data` is valid for `data.len()` bytes.
            let ret = unsafe {
                nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len())
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            // SAFETY: open read-write handle.
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        })
        .map_err(Self::map_err)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let key = Self::c_name(key)?;
        let result = Self::with_handle(namespace, true, |handle| {
            // SAFETY: open read-write handle, NUL-terminated key.
            let ret = unsafe { nvs_erase_key(handle, key.as_ptr().cast()) };
            if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                return Err(ret);
            }
            // SAFETY: open read-write handle.
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        });
        match result {
            // A namespace that was never written does not exist yet.
            Ok(()) | Err(ESP_ERR_NVS_NOT_FOUND) => Ok(()),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        let Ok(key) = Self::c_name(key) else {
            return false;
        };
        Self::with_handle(namespace, false, |handle| {
            // SAFETY: open handle, NUL-terminated key, null type output.
            let ret = unsafe {
                nvs_find_key(handle, key.as_ptr().cast(), core::ptr::null_mut())
            };
            if ret == ESP_OK { Ok(()) } else { Err(ret) }
        })
        .is_ok()
    }
}
