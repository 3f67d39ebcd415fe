//! Shared Key request signing
//!
//! Produces the `Authorization: SharedKey {account}:{signature}` header for
//! blob service requests. The string to sign is:
//!
//! ```text
//! VERB\n
//! Content-Encoding\n
//! Content-Language\n
//! Content-Length\n          (empty when zero)
//! Content-MD5\n
//! Content-Type\n
//! Date\n
//! If-Modified-Since\n
//! If-Match\n
//! If-None-Match\n
//! If-Unmodified-Since\n
//! Range\n
//! CanonicalizedHeaders\n    (x-ms-* headers, lowercased, sorted)
//! CanonicalizedResource     (/{account}{path} + sorted query parameters)
//! ```

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Standard headers that take part in the string to sign, in order
const SIGNED_STANDARD_HEADERS: [&str; 10] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
];

/// Signs requests with a storage account key
#[derive(Clone)]
pub struct SharedKeySigner {
    account: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for SharedKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeySigner")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SharedKeySigner {
    /// Create a signer from a base64-encoded account key
    pub fn new(account: &str, base64_key: &str) -> Result<Self, base64::DecodeError> {
        let key = BASE64_STANDARD.decode(base64_key.trim())?;
        Ok(Self {
            account: account.to_string(),
            key,
        })
    }

    /// Build the canonical string to sign
    pub fn string_to_sign(&self, method: &str, url: &Url, headers: &[(String, String)]) -> String {
        let lookup = |name: &str| -> String {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        let mut lines: Vec<String> = Vec::with_capacity(14);
        lines.push(method.to_uppercase());
        for name in SIGNED_STANDARD_HEADERS {
            let value = lookup(name);
            if name == "content-length" && value == "0" {
                lines.push(String::new());
            } else {
                lines.push(value);
            }
        }
        lines.push(lookup("range"));

        let mut ms_headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
            .filter(|(k, _)| k.starts_with("x-ms-"))
            .collect();
        ms_headers.sort_by(|a, b| a.0.cmp(&b.0));
        for (k, v) in ms_headers {
            lines.push(format!("{}:{}", k, v));
        }

        lines.push(self.canonicalized_resource(url));
        lines.join("\n")
    }

    fn canonicalized_resource(&self, url: &Url) -> String {
        let mut resource = format!("/{}{}", self.account, url.path());

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in url.query_pairs() {
            params
                .entry(k.to_lowercase())
                .or_default()
                .push(v.into_owned());
        }
        for (k, mut values) in params {
            values.sort();
            resource.push_str(&format!("\n{}:{}", k, values.join(",")));
        }

        resource
    }

    /// Compute the `Authorization` header value
    pub fn authorization(&self, method: &str, url: &Url, headers: &[(String, String)]) -> String {
        let string_to_sign = self.string_to_sign(method, url, headers);

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        format!("SharedKey {}:{}", self.account, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> SharedKeySigner {
        SharedKeySigner::new("myaccount", &BASE64_STANDARD.encode(b"secret-key")).unwrap()
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(SharedKeySigner::new("myaccount", "not base64!!").is_err());
    }

    #[test]
    fn test_string_to_sign_layout() {
        let url = Url::parse("https://myaccount.blob.core.windows.net/logs/app.log?comp=appendblock")
            .unwrap();
        let headers = vec![
            ("x-ms-version".to_string(), "2021-08-06".to_string()),
            ("x-ms-date".to_string(), "Mon, 19 Oct 2026 10:00:00 GMT".to_string()),
            ("x-ms-lease-id".to_string(), "lease-1".to_string()),
            ("Content-Length".to_string(), "5".to_string()),
        ];

        let sts = signer().string_to_sign("PUT", &url, &headers);
        let expected = "PUT\n\n\n5\n\n\n\n\n\n\n\n\n\
                        x-ms-date:Mon, 19 Oct 2026 10:00:00 GMT\n\
                        x-ms-lease-id:lease-1\n\
                        x-ms-version:2021-08-06\n\
                        /myaccount/logs/app.log\ncomp:appendblock";
        assert_eq!(sts, expected);
    }

    #[test]
    fn test_zero_content_length_is_empty() {
        let url = Url::parse("https://myaccount.blob.core.windows.net/logs/app.log").unwrap();
        let headers = vec![("Content-Length".to_string(), "0".to_string())];
        let sts = signer().string_to_sign("put", &url, &headers);
        assert!(sts.starts_with("PUT\n\n\n\n"));
    }

    #[test]
    fn test_emulator_path_keeps_account_segment() {
        let url = Url::parse("http://127.0.0.1:10000/devstoreaccount1/logs?restype=container")
            .unwrap();
        let signer = SharedKeySigner::new("devstoreaccount1", &BASE64_STANDARD.encode(b"k")).unwrap();
        let sts = signer.string_to_sign("HEAD", &url, &[]);
        assert!(sts.ends_with("/devstoreaccount1/devstoreaccount1/logs\nrestype:container"));
    }

    #[test]
    fn test_authorization_is_deterministic() {
        let url = Url::parse("https://myaccount.blob.core.windows.net/logs/app.log").unwrap();
        let a = signer().authorization("HEAD", &url, &[]);
        let b = signer().authorization("HEAD", &url, &[]);
        assert_eq!(a, b);
        assert!(a.starts_with("SharedKey myaccount:"));
    }
}
