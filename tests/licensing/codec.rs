use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use licensegate::codec;
use licensegate::crypto::{self, KeyPair};

use crate::common::*;

// ============ Round trip ============

#[test]
fn test_generated_key_verifies_to_same_license() {
    let mut req = GenerateRequest::new("cust-42", "Globex", Tier::Enterprise, 90);
    req.hardware_id = Some(TEST_HARDWARE_ID.to_string());
    req.metadata.insert("region".to_string(), "eu-west-1".to_string());
    req.metadata.insert("contract".to_string(), "C-1009".to_string());

    let (issued, key) = make_key_with(req);
    let verified = codec::verify_license(&key, &test_public_key()).unwrap();

    assert_eq!(verified, issued);
    assert_eq!(verified.metadata["region"], "eu-west-1");
}

#[test]
fn test_surrounding_whitespace_is_ignored() {
    let key = make_key(Tier::Pro, 30);
    let padded = format!("  \n{}\r\n", key);
    assert!(codec::parse_and_verify(&padded, &test_public_key()).is_ok());
}

// ============ Tamper detection ============

#[test]
fn test_modified_payload_fails_signature() {
    let key = make_key(Tier::Community, 30);
    let (payload_b64, sig_b64) = key.rsplit_once('.').unwrap();

    let payload = URL_SAFE_NO_PAD.decode(payload_b64).unwrap();
    let tampered = String::from_utf8(payload)
        .unwrap()
        .replace("\"community\"", "\"enterprise\"");
    let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(tampered), sig_b64);

    let err = codec::parse_and_verify(&forged, &test_public_key()).unwrap_err();
    assert!(matches!(err, LicenseError::InvalidSignature));
}

#[test]
fn test_flipped_payload_byte_fails_signature() {
    let key = make_key(Tier::Pro, 30);
    let (payload_b64, sig_b64) = key.rsplit_once('.').unwrap();

    let mut payload = URL_SAFE_NO_PAD.decode(payload_b64).unwrap();
    payload[10] ^= 0x01;
    let forged = codec::encode(&payload, &URL_SAFE_NO_PAD.decode(sig_b64).unwrap());

    let err = codec::parse_and_verify(&forged, &test_public_key()).unwrap_err();
    assert!(matches!(err, LicenseError::InvalidSignature));
}

#[test]
fn test_key_signed_by_other_issuer_rejected() {
    let other = KeyPair::generate();
    let key = LicenseGenerator::new(other.signing_key)
        .generate(&GenerateRequest::new("cust-1", "Acme", Tier::Pro, 30))
        .unwrap();

    let err = codec::parse_and_verify(&key, &test_public_key()).unwrap_err();
    assert!(matches!(err, LicenseError::InvalidSignature));
}

#[test]
fn test_unsigned_garbage_is_invalid_license() {
    let err = codec::parse_and_verify("not-a-license", &test_public_key()).unwrap_err();
    assert!(matches!(err, LicenseError::InvalidLicense(_)));

    let err = codec::parse_and_verify("abc!.def", &test_public_key()).unwrap_err();
    assert!(matches!(err, LicenseError::InvalidLicense(_)));
}

#[test]
fn test_signed_non_json_payload_is_invalid_license() {
    let payload = b"definitely not json";
    let signature = crypto::sign(&test_signing_key(), payload);
    let key = codec::encode(payload, &signature);

    let err = codec::parse_and_verify(&key, &test_public_key()).unwrap_err();
    assert!(matches!(err, LicenseError::InvalidLicense(_)));
}

// ============ Key material ============

#[test]
fn test_base64_keys_round_trip_through_loaders() {
    let kp = KeyPair::generate();
    let public = crypto::load_public_key(&kp.public_key_base64()).unwrap();
    let private = crypto::load_private_key(&kp.private_key_base64()).unwrap();

    assert_eq!(public, kp.verifying_key);
    assert_eq!(private.verifying_key(), kp.verifying_key);
}

#[test]
fn test_wrong_length_keys_rejected() {
    let kp = KeyPair::generate();
    let err = crypto::load_public_key(&kp.private_key_base64()).unwrap_err();
    assert!(matches!(err, LicenseError::InvalidKey(_)));

    let err = crypto::load_private_key(&kp.public_key_base64()).unwrap_err();
    assert!(matches!(err, LicenseError::InvalidKey(_)));
}
