use hls_auth_proxy::server::utils::signature_utils::{SignatureUtil, sign, time_bucket};

#[test]
fn test_signature_matches_known_value() {
    let signature = sign("test_secret", "1-1-2", "client123", 1234567890, 150);

    assert_eq!(signature.bucket, 8230452);
    assert_eq!(signature.signature, "e23d6cad3b213fe434a77abfbd8d0bdc");
}

#[test]
fn test_signature_stable_within_window() {
    let util = SignatureUtil::new("test_secret".to_string(), 150);

    // 1234567800 and 1234567949 both land in bucket 8230452
    let sig1 = util.generate_signature("1-1-2", "client123", 1234567800);
    let sig2 = util.generate_signature("1-1-2", "client123", 1234567949);

    assert_eq!(sig1, sig2);
}

#[test]
fn test_signature_changes_across_windows() {
    let util = SignatureUtil::new("test_secret".to_string(), 150);

    let sig1 = util.generate_signature("1-1-2", "client123", 1234567949);
    let sig2 = util.generate_signature("1-1-2", "client123", 1234567950);

    assert_ne!(sig1.bucket, sig2.bucket);
    assert_ne!(sig1.signature, sig2.signature);
}

#[test]
fn test_signature_depends_on_route_and_identity() {
    let util = SignatureUtil::new("test_secret".to_string(), 150);
    let base = util.generate_signature("1-1-2", "client123", 1234567890);

    assert_ne!(base, util.generate_signature("/live/index.m3u8", "client123", 1234567890));
    assert_ne!(base, util.generate_signature("1-1-2", "client456", 1234567890));
}

#[test]
fn test_zero_window_does_not_panic() {
    assert_eq!(time_bucket(42, 0), 42);
}

#[test]
fn test_playlist_query_carries_bucket_signature_and_identity() {
    let util = SignatureUtil::new("test_secret".to_string(), 150);
    let query = util.playlist_query("/live/index.m3u8", "client123", 1234567890);
    let expected = sign("test_secret", "/live/index.m3u8", "client123", 1234567890, 150);

    assert_eq!(query[0], ("ct", "8230452".to_string()));
    assert_eq!(query[1], ("tsum", expected.signature));
    assert_eq!(query[2], ("tid", "client123".to_string()));
}

#[test]
fn test_signed_payload_keeps_the_payload() {
    let util = SignatureUtil::new("test_secret".to_string(), 150);
    let signed = util.sign_payload("1-1-2", "client123", 1234567890, vec![1, 2, 3]);

    assert_eq!(signed.time_bucket, 8230452);
    assert_eq!(signed.signature, "e23d6cad3b213fe434a77abfbd8d0bdc");
    assert_eq!(signed.payload, vec![1, 2, 3]);
}
