//! Store Identity Tests

use crate::common::*;
use tessera::layers::core::STORE_ID_SIZE;
use tessera::StoreId;

#[test]
fn generated_store_id_names_the_engine() {
    let kernel = open_kernel();
    let id = kernel.store_id();
    assert_eq!(id.storage_engine_name, "memory");
    assert_eq!(id.format_name, "standard");
    assert!(id.creation_time > 0);
}

#[test]
fn store_id_survives_the_64_byte_layout() {
    let kernel = open_kernel();
    let bytes = kernel.store_id().serialize().unwrap();
    assert_eq!(bytes.len(), STORE_ID_SIZE);
    assert_eq!(&StoreId::deserialize(&bytes).unwrap(), kernel.store_id());
}

#[test]
fn restart_keeps_the_store_id() {
    let kernel = open_kernel();
    let before = kernel.store_id().clone();
    let kernel = restart(kernel);
    assert_eq!(kernel.store_id(), &before);
}

#[test]
fn two_kernels_get_different_ids() {
    let a = open_kernel();
    let b = open_kernel();
    assert_ne!(a.store_id(), b.store_id());
}

#[test]
fn corrupt_layout_rejected() {
    let kernel = open_kernel();
    let mut bytes = kernel.store_id().serialize().unwrap();
    bytes[0] = 0xEE;
    assert!(matches!(
        StoreId::deserialize(&bytes),
        Err(KernelError::InvalidStoreId(_))
    ));
    assert!(StoreId::deserialize(&bytes[..32]).is_err());
}
