//! C ABI.
//!
//! Opaque handles over the Rust API for embedding in non-Rust miners and
//! verifiers. Handles are created and destroyed in matched pairs; functions
//! return null (constructors) or a negative code (operations) on failure and
//! never unwind across the boundary.
//!
//! Variant codes: 0 Monero, 1 Wownero, 2 Arqma, 3 Graft, 4 Safex, 5 Yada.
#![allow(unsafe_code)]

use std::os::raw::c_int;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use crate::cache::Cache;
use crate::config::Variant;
use crate::dataset::Dataset;
use crate::types::{Error, Flags, DIGEST_SIZE};
use crate::vm::Vm;

/// Success.
pub const QUASAR_OK: c_int = 0;
/// A required pointer was null.
pub const QUASAR_ERR_ARGUMENT: c_int = -1;
/// Memory allocation failed.
pub const QUASAR_ERR_ALLOCATION: c_int = -2;
/// The flag combination is not supported on this machine.
pub const QUASAR_ERR_FLAGS: c_int = -3;
/// Invalid configuration or mismatched handles.
pub const QUASAR_ERR_CONFIG: c_int = -4;
/// The VM is not bound to a cache.
pub const QUASAR_ERR_NO_CACHE: c_int = -5;
/// The VM is not bound to a dataset.
pub const QUASAR_ERR_NO_DATASET: c_int = -6;
/// A pipelined hash is still in flight.
pub const QUASAR_ERR_BUSY: c_int = -7;
/// No pipelined hash is in flight.
pub const QUASAR_ERR_IDLE: c_int = -8;
/// The handle is shared and cannot be mutated.
pub const QUASAR_ERR_SHARED: c_int = -9;
/// A panic was caught at the boundary.
pub const QUASAR_ERR_PANIC: c_int = -10;

/// Opaque cache handle.
pub struct QuasarCache(Arc<Cache>);

/// Opaque dataset handle.
pub struct QuasarDataset(Arc<Dataset>);

/// Opaque VM handle.
pub struct QuasarVm(Vm);

fn error_code(err: &Error) -> c_int {
    match err {
        Error::Allocation(_) => QUASAR_ERR_ALLOCATION,
        Error::UnsupportedFlags(_) => QUASAR_ERR_FLAGS,
        Error::Config(_) => QUASAR_ERR_CONFIG,
        Error::MissingCache => QUASAR_ERR_NO_CACHE,
        Error::MissingDataset => QUASAR_ERR_NO_DATASET,
        Error::VmBusy => QUASAR_ERR_BUSY,
        Error::VmIdle => QUASAR_ERR_IDLE,
    }
}

const fn variant_from_code(code: u32) -> Option<Variant> {
    match code {
        0 => Some(Variant::Monero),
        1 => Some(Variant::Wownero),
        2 => Some(Variant::Arqma),
        3 => Some(Variant::Graft),
        4 => Some(Variant::Safex),
        5 => Some(Variant::Yada),
        _ => None,
    }
}

/// # Safety
/// `data` must point to `len` readable bytes, or be null only when `len`
/// is zero.
unsafe fn byte_slice<'a>(data: *const u8, len: usize) -> Option<&'a [u8]> {
    if len == 0 {
        Some(&[])
    } else if data.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts(data, len))
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// Builds a cache for the given variant code and key. The `flags` argument
/// is accepted for ABI stability; cache memory is always heap-backed.
/// Returns null on failure.
///
/// # Safety
/// `key` must point to `key_len` readable bytes (null is allowed when
/// `key_len` is zero).
#[no_mangle]
pub unsafe extern "C" fn quasar_cache_create(
    variant: u32,
    _flags: u32,
    key: *const u8,
    key_len: usize,
) -> *mut QuasarCache {
    let Some(variant) = variant_from_code(variant) else {
        return ptr::null_mut();
    };
    let Some(key) = byte_slice(key, key_len) else {
        return ptr::null_mut();
    };
    catch_unwind(|| {
        Cache::new(&variant.configuration(), key)
            .map(|cache| Box::into_raw(Box::new(QuasarCache(Arc::new(cache)))))
            .unwrap_or(ptr::null_mut())
    })
    .unwrap_or(ptr::null_mut())
}

/// Re-keys a cache in place. Fails with `QUASAR_ERR_SHARED` while any VM or
/// dataset still references the handle's cache.
///
/// # Safety
/// `cache` must be a live handle from [`quasar_cache_create`]; `key` as for
/// [`quasar_cache_create`].
#[no_mangle]
pub unsafe extern "C" fn quasar_cache_reinit(
    cache: *mut QuasarCache,
    key: *const u8,
    key_len: usize,
) -> c_int {
    let Some(handle) = cache.as_mut() else {
        return QUASAR_ERR_ARGUMENT;
    };
    let Some(key) = byte_slice(key, key_len) else {
        return QUASAR_ERR_ARGUMENT;
    };
    let Some(inner) = Arc::get_mut(&mut handle.0) else {
        return QUASAR_ERR_SHARED;
    };
    catch_unwind(AssertUnwindSafe(|| {
        inner.reinit(key).map_or_else(|e| error_code(&e), |()| QUASAR_OK)
    }))
    .unwrap_or(QUASAR_ERR_PANIC)
}

/// Releases a cache handle.
///
/// # Safety
/// `cache` must be a handle from [`quasar_cache_create`] or null, and must
/// not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn quasar_cache_destroy(cache: *mut QuasarCache) {
    if !cache.is_null() {
        drop(Box::from_raw(cache));
    }
}

// =============================================================================
// DATASET
// =============================================================================

/// Allocates an uninitialised dataset for the cache's configuration.
/// `numa_node` below zero means no placement preference. Returns null on
/// failure.
///
/// # Safety
/// `cache` must be a live handle from [`quasar_cache_create`].
#[no_mangle]
pub unsafe extern "C" fn quasar_dataset_create(
    cache: *const QuasarCache,
    flags: u32,
    numa_node: i32,
) -> *mut QuasarDataset {
    let Some(handle) = cache.as_ref() else {
        return ptr::null_mut();
    };
    let numa = u32::try_from(numa_node).ok();
    catch_unwind(|| {
        Dataset::new(handle.0.config(), Flags::from_bits(flags), numa)
            .map(|dataset| Box::into_raw(Box::new(QuasarDataset(Arc::new(dataset)))))
            .unwrap_or(ptr::null_mut())
    })
    .unwrap_or(ptr::null_mut())
}

/// Number of 64-byte items in the dataset, for splitting initialisation
/// across threads. Returns 0 for a null handle.
///
/// # Safety
/// `dataset` must be a live handle from [`quasar_dataset_create`] or null.
#[no_mangle]
pub unsafe extern "C" fn quasar_dataset_item_count(dataset: *const QuasarDataset) -> u64 {
    dataset.as_ref().map_or(0, |handle| handle.0.item_count())
}

/// Initialises the item range `start_item .. start_item + item_count` from
/// `cache`. Fails with `QUASAR_ERR_SHARED` once a VM is bound to the
/// dataset; initialise before creating VMs.
///
/// # Safety
/// `dataset` and `cache` must be live handles. Calls for the same dataset
/// must not run concurrently.
#[no_mangle]
pub unsafe extern "C" fn quasar_dataset_init(
    dataset: *mut QuasarDataset,
    cache: *const QuasarCache,
    start_item: u64,
    item_count: u64,
) -> c_int {
    let Some(handle) = dataset.as_mut() else {
        return QUASAR_ERR_ARGUMENT;
    };
    let Some(cache) = cache.as_ref() else {
        return QUASAR_ERR_ARGUMENT;
    };
    let Some(inner) = Arc::get_mut(&mut handle.0) else {
        return QUASAR_ERR_SHARED;
    };
    catch_unwind(AssertUnwindSafe(|| {
        inner
            .init(&cache.0, start_item, item_count)
            .map_or_else(|e| error_code(&e), |()| QUASAR_OK)
    }))
    .unwrap_or(QUASAR_ERR_PANIC)
}

/// Releases a dataset handle.
///
/// # Safety
/// `dataset` must be a handle from [`quasar_dataset_create`] or null, and
/// must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn quasar_dataset_destroy(dataset: *mut QuasarDataset) {
    if !dataset.is_null() {
        drop(Box::from_raw(dataset));
    }
}

// =============================================================================
// VM
// =============================================================================

/// Creates a VM. A non-null `dataset` selects full-memory mode; otherwise
/// `cache` selects light mode. Returns null on failure.
///
/// # Safety
/// Non-null arguments must be live handles.
#[no_mangle]
pub unsafe extern "C" fn quasar_vm_create(
    cache: *const QuasarCache,
    dataset: *const QuasarDataset,
    flags: u32,
) -> *mut QuasarVm {
    let flags = Flags::from_bits(flags);
    let vm = if let Some(handle) = dataset.as_ref() {
        Vm::full(Arc::clone(&handle.0), flags)
    } else if let Some(handle) = cache.as_ref() {
        Vm::light(Arc::clone(&handle.0), flags.difference(Flags::FULL_MEM))
    } else {
        return ptr::null_mut();
    };
    catch_unwind(AssertUnwindSafe(|| {
        vm.map(|vm| Box::into_raw(Box::new(QuasarVm(vm))))
            .unwrap_or(ptr::null_mut())
    }))
    .unwrap_or(ptr::null_mut())
}

/// Hashes `input` into the 32-byte `output` buffer.
///
/// # Safety
/// `vm` must be a live handle, `input` must point to `input_len` readable
/// bytes (null allowed when `input_len` is zero) and `output` must point to
/// 32 writable bytes.
#[no_mangle]
pub unsafe extern "C" fn quasar_vm_hash(
    vm: *mut QuasarVm,
    input: *const u8,
    input_len: usize,
    output: *mut u8,
) -> c_int {
    let Some(handle) = vm.as_mut() else {
        return QUASAR_ERR_ARGUMENT;
    };
    let Some(input) = byte_slice(input, input_len) else {
        return QUASAR_ERR_ARGUMENT;
    };
    if output.is_null() {
        return QUASAR_ERR_ARGUMENT;
    }
    catch_unwind(AssertUnwindSafe(|| match handle.0.hash(input) {
        Ok(digest) => {
            ptr::copy_nonoverlapping(digest.as_ptr(), output, DIGEST_SIZE);
            QUASAR_OK
        }
        Err(err) => error_code(&err),
    }))
    .unwrap_or(QUASAR_ERR_PANIC)
}

/// Begins a pipelined hash.
///
/// # Safety
/// As for [`quasar_vm_hash`], without an output buffer.
#[no_mangle]
pub unsafe extern "C" fn quasar_vm_hash_first(
    vm: *mut QuasarVm,
    input: *const u8,
    input_len: usize,
) -> c_int {
    let Some(handle) = vm.as_mut() else {
        return QUASAR_ERR_ARGUMENT;
    };
    let Some(input) = byte_slice(input, input_len) else {
        return QUASAR_ERR_ARGUMENT;
    };
    catch_unwind(AssertUnwindSafe(|| {
        handle
            .0
            .hash_first(input)
            .map_or_else(|e| error_code(&e), |()| QUASAR_OK)
    }))
    .unwrap_or(QUASAR_ERR_PANIC)
}

/// Finishes the in-flight hash into `output` and starts hashing
/// `next_input`.
///
/// # Safety
/// As for [`quasar_vm_hash`].
#[no_mangle]
pub unsafe extern "C" fn quasar_vm_hash_next(
    vm: *mut QuasarVm,
    next_input: *const u8,
    next_input_len: usize,
    output: *mut u8,
) -> c_int {
    let Some(handle) = vm.as_mut() else {
        return QUASAR_ERR_ARGUMENT;
    };
    let Some(next_input) = byte_slice(next_input, next_input_len) else {
        return QUASAR_ERR_ARGUMENT;
    };
    if output.is_null() {
        return QUASAR_ERR_ARGUMENT;
    }
    catch_unwind(AssertUnwindSafe(|| match handle.0.hash_next(next_input) {
        Ok(digest) => {
            ptr::copy_nonoverlapping(digest.as_ptr(), output, DIGEST_SIZE);
            QUASAR_OK
        }
        Err(err) => error_code(&err),
    }))
    .unwrap_or(QUASAR_ERR_PANIC)
}

/// Finishes the in-flight hash into `output` and leaves the VM idle.
///
/// # Safety
/// `vm` must be a live handle and `output` must point to 32 writable bytes.
#[no_mangle]
pub unsafe extern "C" fn quasar_vm_hash_last(vm: *mut QuasarVm, output: *mut u8) -> c_int {
    let Some(handle) = vm.as_mut() else {
        return QUASAR_ERR_ARGUMENT;
    };
    if output.is_null() {
        return QUASAR_ERR_ARGUMENT;
    }
    catch_unwind(AssertUnwindSafe(|| match handle.0.hash_last() {
        Ok(digest) => {
            ptr::copy_nonoverlapping(digest.as_ptr(), output, DIGEST_SIZE);
            QUASAR_OK
        }
        Err(err) => error_code(&err),
    }))
    .unwrap_or(QUASAR_ERR_PANIC)
}

/// Rebinds a light-mode VM to another cache of the same configuration.
///
/// # Safety
/// `vm` and `cache` must be live handles.
#[no_mangle]
pub unsafe extern "C" fn quasar_vm_set_cache(vm: *mut QuasarVm, cache: *const QuasarCache) -> c_int {
    let Some(handle) = vm.as_mut() else {
        return QUASAR_ERR_ARGUMENT;
    };
    let Some(cache) = cache.as_ref() else {
        return QUASAR_ERR_ARGUMENT;
    };
    handle
        .0
        .set_cache(Arc::clone(&cache.0))
        .map_or_else(|e| error_code(&e), |()| QUASAR_OK)
}

/// Rebinds a full-memory VM to another dataset of the same configuration.
///
/// # Safety
/// `vm` and `dataset` must be live handles.
#[no_mangle]
pub unsafe extern "C" fn quasar_vm_set_dataset(
    vm: *mut QuasarVm,
    dataset: *const QuasarDataset,
) -> c_int {
    let Some(handle) = vm.as_mut() else {
        return QUASAR_ERR_ARGUMENT;
    };
    let Some(dataset) = dataset.as_ref() else {
        return QUASAR_ERR_ARGUMENT;
    };
    handle
        .0
        .set_dataset(Arc::clone(&dataset.0))
        .map_or_else(|e| error_code(&e), |()| QUASAR_OK)
}

/// Releases a VM handle.
///
/// # Safety
/// `vm` must be a handle from [`quasar_vm_create`] or null, and must not be
/// used afterwards.
#[no_mangle]
pub unsafe extern "C" fn quasar_vm_destroy(vm: *mut QuasarVm) {
    if !vm.is_null() {
        drop(Box::from_raw(vm));
    }
}
