//! External interface. `FetchConfig` is everything a caller must supply;
//! `FetchOutcome` is everything `fetch()` hands back. These are the only
//! two types a consumer of this crate needs to know about.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

use crate::error::SabrError;

/// Default `clientName` value (web music).
pub const DEFAULT_CLIENT_NAME: i64 = 67;

/// Decode a base64 blob, preferring URL-safe-no-padding and falling back to
/// standard encoding — the rule both `po_token` and `ustreamer_config` follow.
fn decode_base64_field(name: &str, value: &str) -> Result<Vec<u8>, SabrError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .or_else(|_| STANDARD.decode(value))
        .map_err(|e| SabrError::protocol(format!("failed to decode {name}: {e}")))
}

/// Everything needed to drive one SABR fetch to completion. Constructed
/// entirely by the caller — the player-response fetch, poToken minting,
/// and locale/user-agent resolution are all out of scope here.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// The initial streaming URL returned by the player response.
    pub streaming_url: String,
    /// Preferred audio format.
    pub itag: i32,
    pub lmt: i64,
    /// Informational only; not used by the driver.
    pub duration_ms: Option<i64>,

    /// Base64, URL-safe-no-padding preferred, standard as fallback.
    pub po_token: Option<String>,
    /// Base64, same encoding rules as `po_token`. Passed through verbatim
    /// in request field 5.
    pub ustreamer_config: Option<String>,

    pub output_file: PathBuf,

    pub visitor_data: Option<String>,
    pub client_name: i64,
    pub client_version: Option<String>,
    pub user_agent: Option<String>,
    pub hl: Option<String>,
    pub gl: Option<String>,
    pub cookie: Option<String>,
    pub proxy: Option<String>,
}

impl FetchConfig {
    pub fn new(streaming_url: impl Into<String>, itag: i32, output_file: impl Into<PathBuf>) -> Self {
        Self {
            streaming_url: streaming_url.into(),
            itag,
            lmt: 0,
            duration_ms: None,
            po_token: None,
            ustreamer_config: None,
            output_file: output_file.into(),
            visitor_data: None,
            client_name: DEFAULT_CLIENT_NAME,
            client_version: None,
            user_agent: None,
            hl: None,
            gl: None,
            cookie: None,
            proxy: None,
        }
    }

    pub fn po_token_bytes(&self) -> Result<Option<Vec<u8>>, SabrError> {
        self.po_token
            .as_deref()
            .map(|v| decode_base64_field("poToken", v))
            .transpose()
    }

    pub fn ustreamer_config_bytes(&self) -> Result<Option<Vec<u8>>, SabrError> {
        self.ustreamer_config
            .as_deref()
            .map(|v| decode_base64_field("ustreamerConfig", v))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_url_safe_no_pad() {
        let mut c = FetchConfig::new("https://example.test/", 251, "out.bin");
        c.po_token = Some("aGVsbG8".into()); // "hello", URL-safe-no-pad
        assert_eq!(c.po_token_bytes().unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn falls_back_to_standard_padding() {
        let mut c = FetchConfig::new("https://example.test/", 251, "out.bin");
        c.ustreamer_config = Some("aGVsbG8=".into()); // standard, padded
        assert_eq!(c.ustreamer_config_bytes().unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn absent_fields_decode_to_none() {
        let c = FetchConfig::new("https://example.test/", 251, "out.bin");
        assert_eq!(c.po_token_bytes().unwrap(), None);
        assert_eq!(c.ustreamer_config_bytes().unwrap(), None);
    }
}

/// Result of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub bytes_written: u64,
    pub output_file: PathBuf,
}
