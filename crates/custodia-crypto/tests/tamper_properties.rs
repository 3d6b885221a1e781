//! Property tests for the AEAD primitives: round-trips hold and any single
//! bit flip in ciphertext, nonce or AAD is rejected.

use custodia_crypto::{
    build_aad, decrypt_field, encrypt_field, unwrap_key, wrap_key, DataKey, KeyBytes, MasterKey,
    Sealed,
};
use proptest::prelude::*;

fn dek_from(seed: [u8; 32]) -> DataKey {
    DataKey::from_bytes(seed)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn field_roundtrip(
        seed in any::<[u8; 32]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 0..512),
        table in "[a-z_]{1,12}",
        field in "[a-z_]{1,12}",
        record_id in "[A-Za-z0-9-]{1,24}",
    ) {
        let dek = dek_from(seed);
        let aad = build_aad(&table, &field, &record_id);
        let sealed = encrypt_field(&dek, &aad, &plaintext).unwrap();
        prop_assert_eq!(decrypt_field(&dek, &aad, &sealed).unwrap(), plaintext);
    }

    #[test]
    fn ciphertext_bit_flip_rejected(
        seed in any::<[u8; 32]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 1..128),
        bit in any::<usize>(),
    ) {
        let dek = dek_from(seed);
        let aad = build_aad("accounts", "name", "A1");
        let mut sealed = encrypt_field(&dek, &aad, &plaintext).unwrap();

        let bit = bit % (sealed.ciphertext.len() * 8);
        sealed.ciphertext[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(decrypt_field(&dek, &aad, &sealed).is_err());
    }

    #[test]
    fn nonce_bit_flip_rejected(
        seed in any::<[u8; 32]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 0..128),
        bit in 0usize..96,
    ) {
        let dek = dek_from(seed);
        let aad = build_aad("accounts", "name", "A1");
        let mut sealed = encrypt_field(&dek, &aad, &plaintext).unwrap();

        sealed.nonce[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(decrypt_field(&dek, &aad, &sealed).is_err());
    }

    #[test]
    fn aad_bit_flip_rejected(
        seed in any::<[u8; 32]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 0..128),
        record_id in "[A-Za-z0-9]{1,16}",
        bit in any::<usize>(),
    ) {
        let dek = dek_from(seed);
        let aad = build_aad("accounts", "name", &record_id);
        let sealed = encrypt_field(&dek, &aad, &plaintext).unwrap();

        let mut tampered = aad.clone();
        let bit = bit % (tampered.len() * 8);
        tampered[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(decrypt_field(&dek, &tampered, &sealed).is_err());
    }

    #[test]
    fn wrap_roundtrip_and_tamper(
        master_seed in any::<[u8; 32]>(),
        key_seed in any::<[u8; 32]>(),
        bit in 0usize..((32 + 16) * 8),
    ) {
        let master = MasterKey::from_bytes(master_seed);
        let dek = dek_from(key_seed);

        let wrapped = wrap_key(&master, &dek).unwrap();
        let unwrapped: DataKey = unwrap_key(&master, &wrapped).unwrap();
        prop_assert_eq!(unwrapped.as_bytes(), dek.as_bytes());

        let mut tampered: Sealed = wrapped.clone();
        tampered.ciphertext[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(unwrap_key::<DataKey>(&master, &tampered).is_err());
    }
}

#[test]
fn same_plaintext_under_two_contexts_is_not_interchangeable() {
    let dek = DataKey::generate();
    let aad_a = build_aad("accounts", "name", "A1");
    let aad_b = build_aad("accounts", "name", "A2");

    let sealed_a = encrypt_field(&dek, &aad_a, b"Bar Centrale").unwrap();
    let sealed_b = encrypt_field(&dek, &aad_b, b"Bar Centrale").unwrap();

    assert!(decrypt_field(&dek, &aad_b, &sealed_a).is_err());
    assert!(decrypt_field(&dek, &aad_a, &sealed_b).is_err());
    assert_eq!(decrypt_field(&dek, &aad_a, &sealed_a).unwrap(), b"Bar Centrale");
}

#[test]
fn stored_text_form_roundtrips_through_legacy_hex() {
    let dek = DataKey::generate();
    let aad = build_aad("contacts", "phone", "C1");
    let sealed = encrypt_field(&dek, &aad, b"+39 02 1234").unwrap();

    let legacy_ct = format!("\\x{}", hex::encode(&sealed.ciphertext));
    let legacy_nonce = format!("\\x{}", hex::encode(sealed.nonce));
    let parsed = Sealed::from_text(&legacy_ct, &legacy_nonce).unwrap();

    assert_eq!(decrypt_field(&dek, &aad, &parsed).unwrap(), b"+39 02 1234");
}
