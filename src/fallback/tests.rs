use proptest::prelude::*;

use super::*;

#[test]
fn test_round_trip() {
    let key = [0x42u8; 32];
    let cipher = AesGcmCipher::new(&key).unwrap();
    let nonce = AesGcmCipher::generate_nonce();

    let ciphertext = cipher.encrypt(b"payload", &nonce, None).unwrap();
    let plaintext = cipher.decrypt(&ciphertext, &nonce, None).unwrap();

    assert_eq!(plaintext, b"payload");
    assert_eq!(ciphertext.len(), b"payload".len() + TAG_SIZE);
}

#[test]
fn test_round_trip_with_aad() {
    let key = AesGcmCipher::generate_key();
    let cipher = AesGcmCipher::new(&key).unwrap();
    let nonce = AesGcmCipher::generate_nonce();

    let ciphertext = cipher
        .encrypt(b"payload", &nonce, Some(b"qk_2026_01_01_ab"))
        .unwrap();

    // Correct AAD decrypts
    assert!(cipher
        .decrypt(&ciphertext, &nonce, Some(b"qk_2026_01_01_ab"))
        .is_ok());
    // Wrong AAD does not
    assert!(cipher
        .decrypt(&ciphertext, &nonce, Some(b"qk_2026_01_01_cd"))
        .is_err());
}

#[test]
fn test_tampered_ciphertext_rejected() {
    let key = [7u8; 32];
    let cipher = AesGcmCipher::new(&key).unwrap();
    let nonce = AesGcmCipher::generate_nonce();
    let mut ciphertext = cipher.encrypt(b"payload", &nonce, None).unwrap();

    for index in 0..ciphertext.len() {
        ciphertext[index] ^= 0x01;
        assert!(
            cipher.decrypt(&ciphertext, &nonce, None).is_err(),
            "flipping byte {} was not detected",
            index
        );
        ciphertext[index] ^= 0x01;
    }
}

#[test]
fn test_invalid_key_size() {
    assert!(AesGcmCipher::new(&[0u8; 16]).is_err());
    assert!(AesGcmCipher::new(&[0u8; 33]).is_err());
}

#[test]
fn test_invalid_nonce_size() {
    let cipher = AesGcmCipher::new(&[0u8; 32]).unwrap();
    assert!(cipher.encrypt(b"x", &[0u8; 8], None).is_err());
    assert!(cipher.decrypt(&[0u8; 32], &[0u8; 8], None).is_err());
}

#[test]
fn test_truncated_ciphertext() {
    let cipher = AesGcmCipher::new(&[0u8; 32]).unwrap();
    let nonce = AesGcmCipher::generate_nonce();
    assert!(cipher.decrypt(&[0u8; 4], &nonce, None).is_err());
}

proptest! {
    #[test]
    fn prop_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let key = [0x11u8; 32];
        let cipher = AesGcmCipher::new(&key).unwrap();
        let nonce = AesGcmCipher::generate_nonce();

        let ciphertext = cipher.encrypt(&payload, &nonce, None).unwrap();
        let plaintext = cipher.decrypt(&ciphertext, &nonce, None).unwrap();
        prop_assert_eq!(plaintext, payload);
    }
}
