//! C ABI surface tests.
#![allow(unsafe_code)]
#![allow(clippy::unwrap_used)]

use std::ptr;

use quasar::ffi::{
    quasar_cache_create, quasar_cache_destroy, quasar_cache_reinit, quasar_dataset_destroy,
    quasar_vm_create, quasar_vm_destroy, quasar_vm_hash, quasar_vm_hash_first,
    quasar_vm_hash_last, QUASAR_ERR_ARGUMENT, QUASAR_ERR_BUSY, QUASAR_ERR_IDLE,
    QUASAR_ERR_SHARED, QUASAR_OK,
};
use quasar::Variant;

const ARQMA: u32 = 2;

#[test]
fn invalid_arguments_are_rejected() {
    unsafe {
        // Unknown variant code.
        assert!(quasar_cache_create(99, 0, ptr::null(), 0).is_null());
        // Non-zero length with a null pointer.
        assert!(quasar_cache_create(ARQMA, 0, ptr::null(), 4).is_null());
        // A VM needs a cache or a dataset.
        assert!(quasar_vm_create(ptr::null(), ptr::null(), 0).is_null());
        assert_eq!(
            quasar_vm_hash(ptr::null_mut(), ptr::null(), 0, ptr::null_mut()),
            QUASAR_ERR_ARGUMENT
        );
        // Destroying null handles is a no-op.
        quasar_cache_destroy(ptr::null_mut());
        quasar_dataset_destroy(ptr::null_mut());
        quasar_vm_destroy(ptr::null_mut());
    }
}

#[test]
fn c_api_matches_the_rust_api() {
    let key = b"ffi test key";
    let input = b"ffi input";
    let expected = quasar::hash(Variant::Arqma, key, input).unwrap();

    unsafe {
        let cache = quasar_cache_create(ARQMA, 0, key.as_ptr(), key.len());
        assert!(!cache.is_null());
        let vm = quasar_vm_create(cache, ptr::null(), 0);
        assert!(!vm.is_null());

        let mut out = [0_u8; 32];
        assert_eq!(
            quasar_vm_hash(vm, input.as_ptr(), input.len(), out.as_mut_ptr()),
            QUASAR_OK
        );
        assert_eq!(out, expected);

        // Pipeline state codes travel through the ABI.
        assert_eq!(quasar_vm_hash_last(vm, out.as_mut_ptr()), QUASAR_ERR_IDLE);
        assert_eq!(
            quasar_vm_hash_first(vm, input.as_ptr(), input.len()),
            QUASAR_OK
        );
        assert_eq!(
            quasar_vm_hash_first(vm, input.as_ptr(), input.len()),
            QUASAR_ERR_BUSY
        );
        assert_eq!(quasar_vm_hash_last(vm, out.as_mut_ptr()), QUASAR_OK);
        assert_eq!(out, expected);

        // Re-keying is refused while the VM still shares the cache.
        assert_eq!(
            quasar_cache_reinit(cache, key.as_ptr(), key.len()),
            QUASAR_ERR_SHARED
        );
        quasar_vm_destroy(vm);
        assert_eq!(
            quasar_cache_reinit(cache, key.as_ptr(), key.len()),
            QUASAR_OK
        );
        quasar_cache_destroy(cache);
    }
}
