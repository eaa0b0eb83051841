use serde::Serialize;

/// An outbound request body together with the bucket and signature it was signed with.
/// Never stored, rebuilt for every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedRequest<T> {
    pub time_bucket: u64,
    pub signature: String,
    pub payload: T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub bucket: u64,
    pub signature: String,
}

/// floor(now / window), a zero window is treated as one second
pub fn time_bucket(now: u64, window_seconds: u64) -> u64 {
    now / window_seconds.max(1)
}

/// md5(secret + route_key + identity + bucket) as lowercase hex, the upstream checks exactly this
pub fn sign(secret: &str, route_key: &str, identity: &str, now: u64, window_seconds: u64) -> Signature {
    let bucket = time_bucket(now, window_seconds);

    let digest = md5::compute(format!("{}{}{}{}", secret, route_key, identity, bucket));

    Signature {
        bucket,
        signature: format!("{:x}", digest),
    }
}

pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// holds the secret and window so callers only pass what changes per request
#[derive(Debug, Clone)]
pub struct SignatureUtil {
    secret: String,
    window_seconds: u64,
}

impl SignatureUtil {
    pub fn new(secret: String, window_seconds: u64) -> Self {
        Self {
            secret,
            window_seconds,
        }
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn generate_signature(&self, route_key: &str, identity: &str, now: u64) -> Signature {
        sign(&self.secret, route_key, identity, now, self.window_seconds)
    }

    pub fn sign_payload<T>(&self, route_key: &str, identity: &str, now: u64, payload: T) -> SignedRequest<T> {
        let Signature { bucket, signature } = self.generate_signature(route_key, identity, now);

        SignedRequest {
            time_bucket: bucket,
            signature,
            payload,
        }
    }

    /// `ct`, `tsum` and `tid` query params for a signed playlist fetch, the route is the url path
    pub fn playlist_query(&self, path: &str, identity: &str, now: u64) -> [(&'static str, String); 3] {
        let Signature { bucket, signature } = self.generate_signature(path, identity, now);

        [
            ("ct", bucket.to_string()),
            ("tsum", signature),
            ("tid", identity.to_string()),
        ]
    }
}
