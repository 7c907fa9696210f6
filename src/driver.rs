//! Session driver and HTTP transport: the request loop and its resource
//! model. One polling loop posts the session's current state, reads the
//! response body, dispatches parts, tracks stalls, and decides whether to
//! loop again — no bandwidth-estimate backoff, no virtual-player-time
//! pacing, no command channel for mid-stream seeks, since `fetch()` runs
//! one request loop to completion and returns rather than feeding a live
//! player.
//!
//! The HTTP client is passed in rather than held as a module-level
//! singleton: the [`Transport`] trait lets tests drive the same driver
//! loop against a scripted in-memory transport instead of a real socket.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::config::{FetchConfig, FetchOutcome};
use crate::error::SabrError;
use crate::handlers::dispatch;
use crate::output::Output;
use crate::request::build_request_body;
use crate::session::{Session, MAX_REQUESTS, MAX_STALLED_REQUESTS};
use crate::ump::UmpPartReader;

const WEB_MUSIC_ORIGIN: &str = "https://music.youtube.com";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY_SNIPPET: usize = 500;

/// One HTTP response, reduced to what the driver needs: the body as a
/// stream of byte chunks. A non-2xx status or a transport-level failure is
/// surfaced as an `Err` before this type is ever constructed.
pub struct TransportResponse {
    pub chunks: BoxStream<'static, Result<Vec<u8>, SabrError>>,
}

/// Abstracts one HTTP round-trip so the driver loop can run identically
/// against a real `reqwest::Client` or an in-memory fake used by tests.
pub trait Transport {
    async fn post(&self, url: String, body: Vec<u8>) -> Result<TransportResponse, SabrError>;
}

/// `reqwest`-backed transport. Built once per `fetch()` call — there is no
/// shared session state across fetches to amortize a longer-lived client
/// against.
pub struct ReqwestTransport {
    client: reqwest::Client,
    user_agent: String,
    cookie: Option<String>,
}

impl ReqwestTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, SabrError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT + WRITE_TIMEOUT);
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| SabrError::transport(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| SabrError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            user_agent: config
                .user_agent
                .clone()
                .unwrap_or_else(|| "Mozilla/5.0".to_string()),
            cookie: config.cookie.clone(),
        })
    }
}

impl Transport for ReqwestTransport {
    async fn post(&self, url: String, body: Vec<u8>) -> Result<TransportResponse, SabrError> {
        let mut req = self
            .client
            .post(&url)
            .header("content-type", "application/x-protobuf")
            .header("accept", "application/vnd.yt-ump")
            .header("accept-encoding", "identity")
            .header("origin", WEB_MUSIC_ORIGIN)
            .header("referer", format!("{WEB_MUSIC_ORIGIN}/"))
            .header("user-agent", &self.user_agent);
        if let Some(cookie) = &self.cookie {
            req = req.header("cookie", cookie);
        }

        let res = req
            .body(body)
            .send()
            .await
            .map_err(|e| SabrError::transport(format!("request failed: {e}")))?;

        let status = res.status();
        if !status.is_success() {
            let bytes = res.bytes().await.unwrap_or_default();
            let snippet = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_ERROR_BODY_SNIPPET)]);
            return Err(SabrError::transport(format!(
                "HTTP {status}: {snippet}"
            )));
        }

        let stream = res
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| SabrError::transport(format!("body read failed: {e}"))));
        Ok(TransportResponse {
            chunks: Box::pin(stream),
        })
    }
}

fn request_url(base: &str, request_number: u32) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}rn={request_number}")
}

/// Run one SABR fetch to completion against a real `reqwest::Client`.
pub async fn fetch(config: FetchConfig) -> Result<FetchOutcome, SabrError> {
    let transport = ReqwestTransport::new(&config)?;
    fetch_with_transport(config, &transport).await
}

/// The request/response loop itself, generic over [`Transport`] so tests
/// can drive it against scripted byte buffers instead of a real socket.
pub async fn fetch_with_transport<T: Transport>(
    config: FetchConfig,
    transport: &T,
) -> Result<FetchOutcome, SabrError> {
    let preferred_lmt = if config.lmt > 0 { Some(config.lmt) } else { None };
    let mut session = Session::new(config.streaming_url.clone(), config.itag, preferred_lmt);
    session.po_token = config.po_token_bytes()?;
    session.ustreamer_config = config.ustreamer_config_bytes()?;

    let mut output = Output::create(&config.output_file).await?;

    let result = run_loop(&mut session, &mut output, &config, transport).await;

    if let Err(e) = result {
        output.discard().await;
        return Err(e);
    }

    if output.bytes_written() == 0 {
        output.discard().await;
        return Err(SabrError::EmptyStream);
    }

    let bytes_written = output.finish().await?;
    Ok(FetchOutcome {
        bytes_written,
        output_file: config.output_file,
    })
}

async fn run_loop<T: Transport>(
    session: &mut Session,
    output: &mut Output,
    config: &FetchConfig,
    transport: &T,
) -> Result<(), SabrError> {
    loop {
        if session.stream_complete || session.request_number >= MAX_REQUESTS {
            return Ok(());
        }

        session.request_number += 1;
        session.activity_in_request = false;
        session.partial_segments.clear();

        let body = build_request_body(session, config);
        let url = request_url(&session.url, session.request_number);

        tracing::debug!(
            request_number = session.request_number,
            url = %url,
            body_len = body.len(),
            "sabr: sending request"
        );

        let response = transport.post(url, body).await?;

        let mut reader = UmpPartReader::new();
        let mut total_bytes = 0usize;
        let mut chunks = response.chunks;

        let read = tokio::time::timeout(READ_TIMEOUT, async {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                total_bytes += chunk.len();
                for part in reader.push(&chunk)? {
                    dispatch(part, session, output).await?;
                }
            }
            reader.finish()
        })
        .await
        .map_err(|_| SabrError::transport("response body read timed out"))?;

        read?;

        if total_bytes == 0 {
            return Err(SabrError::protocol("empty response body"));
        }

        if session.activity_in_request {
            session.stalled_requests = 0;
        } else {
            session.stalled_requests += 1;
            tracing::debug!(
                stalled_requests = session.stalled_requests,
                "sabr: no activity this request"
            );
            if session.stalled_requests >= MAX_STALLED_REQUESTS {
                tracing::debug!("sabr: stall exhausted, ending fetch");
                return Ok(());
            }
        }

        if let Some(format) = session.audio_format() {
            if format.is_complete(session.player_time_ms) {
                tracing::debug!(player_time_ms = session.player_time_ms, "sabr: stream complete");
                session.stream_complete = true;
            } else {
                session.player_time_ms = format.advance_player_time(session.player_time_ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{
        FORMAT_INITIALIZATION_METADATA, MEDIA, MEDIA_END, MEDIA_HEADER, SABR_REDIRECT,
        STREAM_PROTECTION_STATUS,
    };
    use crate::proto::ProtoWriter;
    use crate::varint::encode_ump_varint;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn encode_part(part_type: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = encode_ump_varint(part_type);
        out.extend(encode_ump_varint(payload.len() as u32));
        out.extend_from_slice(payload);
        out
    }

    fn encode_format_init(itag: i64, mime: &str, total_segments: Option<i64>) -> Vec<u8> {
        let mut format_id = ProtoWriter::new();
        format_id.write_varint_field_nonzero(1, itag as u64);
        let mut w = ProtoWriter::new();
        w.write_message(2, format_id);
        if let Some(total) = total_segments {
            w.write_varint_field_nonzero(4, total as u64);
        }
        w.write_string(5, mime);
        w.finish()
    }

    fn encode_media_header(id: u64, itag: i64, seq: u64, start_ms: u64, duration_ms: u64) -> Vec<u8> {
        let mut format_id = ProtoWriter::new();
        format_id.write_varint_field_nonzero(1, itag as u64);
        let mut w = ProtoWriter::new();
        w.write_varint_field_nonzero(1, id);
        w.write_message(13, format_id);
        w.write_varint_field_nonzero(9, seq);
        w.write_varint_field_nonzero(11, start_ms);
        w.write_varint_field_nonzero(12, duration_ms);
        w.finish()
    }

    fn encode_media(id: u32, data: &[u8]) -> Vec<u8> {
        let mut payload = encode_ump_varint(id);
        payload.extend_from_slice(data);
        payload
    }

    /// `MEDIA_END`'s payload is a bare UMP varint headerId, same as `MEDIA`'s
    /// leading bytes — not a protobuf field.
    fn encode_media_end(id: u64) -> Vec<u8> {
        encode_ump_varint(id as u32)
    }

    /// A transport that replays a fixed, scripted sequence of whole
    /// response bodies — one per request — instead of hitting a real
    /// socket.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Vec<u8>>>,
        requested_urls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requested_urls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn post(&self, url: String, _body: Vec<u8>) -> Result<TransportResponse, SabrError> {
            self.requested_urls.lock().unwrap().push(url);
            let body = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            Ok(TransportResponse {
                chunks: Box::pin(futures::stream::once(async move { Ok(body) })),
            })
        }
    }

    fn config(output: &std::path::Path) -> FetchConfig {
        FetchConfig::new("https://example.test/videoplayback", 251, output)
    }

    fn temp_output(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sabr-driver-test-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn s2_empty_stream_exhausts_stall_and_deletes_file() {
        let out = temp_output("s2");
        let response = encode_part(
            FORMAT_INITIALIZATION_METADATA,
            &encode_format_init(137, "video/mp4", None),
        );
        let responses: Vec<Vec<u8>> = (0..MAX_STALLED_REQUESTS as usize + 1)
            .map(|_| response.clone())
            .collect();
        let transport = ScriptedTransport::new(responses);

        let err = fetch_with_transport(config(&out), &transport).await.unwrap_err();
        assert!(matches!(err, SabrError::EmptyStream));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn s3_happy_path_known_total_writes_bytes_in_order() {
        let out = temp_output("s3");

        let mut response1 = encode_part(
            FORMAT_INITIALIZATION_METADATA,
            &encode_format_init(251, "audio/webm", Some(3)),
        );
        response1.extend(encode_part(MEDIA_HEADER, &encode_media_header(1, 251, 1, 0, 1000)));
        response1.extend(encode_part(MEDIA, &encode_media(1, b"AAAA")));
        response1.extend(encode_part(MEDIA_END, &encode_media_end(1)));

        let mut response2 = encode_part(MEDIA_HEADER, &encode_media_header(1, 251, 2, 1000, 1000));
        response2.extend(encode_part(MEDIA, &encode_media(1, b"BBBB")));
        response2.extend(encode_part(MEDIA_END, &encode_media_end(1)));

        let mut response3 = encode_part(MEDIA_HEADER, &encode_media_header(1, 251, 3, 2000, 1000));
        response3.extend(encode_part(MEDIA, &encode_media(1, b"CCCC")));
        response3.extend(encode_part(MEDIA_END, &encode_media_end(1)));

        let transport = ScriptedTransport::new(vec![response1, response2, response3]);
        let outcome = fetch_with_transport(config(&out), &transport).await.unwrap();

        assert_eq!(outcome.bytes_written, 12);
        let contents = std::fs::read(&out).unwrap();
        assert_eq!(contents, b"AAAABBBBCCCC");
        assert!(outcome.output_file == out);
        std::fs::remove_file(&out).unwrap();
    }

    #[tokio::test]
    async fn s4_redirect_keeps_request_number_monotonic() {
        let out = temp_output("s4");

        let mut response1 = encode_part(
            FORMAT_INITIALIZATION_METADATA,
            &encode_format_init(251, "audio/webm", Some(1)),
        );
        let mut redirect = ProtoWriter::new();
        redirect.write_string(1, "https://redirected.test/videoplayback");
        response1.extend(encode_part(SABR_REDIRECT, &redirect.finish()));

        let mut response2 = encode_part(MEDIA_HEADER, &encode_media_header(1, 251, 1, 0, 1000));
        response2.extend(encode_part(MEDIA, &encode_media(1, b"DATA")));
        response2.extend(encode_part(MEDIA_END, &encode_media_end(1)));

        let transport = ScriptedTransport::new(vec![response1, response2]);
        let outcome = fetch_with_transport(config(&out), &transport).await.unwrap();

        assert_eq!(outcome.bytes_written, 4);
        let urls = transport.requested_urls.lock().unwrap();
        assert!(urls[0].starts_with("https://example.test/videoplayback?rn=1"));
        assert!(urls[1].starts_with("https://redirected.test/videoplayback?rn=2"));
        std::fs::remove_file(&out).unwrap();
    }

    #[tokio::test]
    async fn s5_attestation_required_is_fatal_and_deletes_file() {
        let out = temp_output("s5");
        let mut status = ProtoWriter::new();
        status.write_varint_field_nonzero(1, 3);
        let response = encode_part(STREAM_PROTECTION_STATUS, &status.finish());

        let transport = ScriptedTransport::new(vec![response]);
        let err = fetch_with_transport(config(&out), &transport).await.unwrap_err();
        assert!(matches!(err, SabrError::AttestationRequired));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn s6_discard_only_format_writes_zero_bytes() {
        let out = temp_output("s6");
        let response = encode_part(
            FORMAT_INITIALIZATION_METADATA,
            &encode_format_init(137, "video/mp4", Some(1)),
        );
        let responses: Vec<Vec<u8>> = (0..MAX_STALLED_REQUESTS as usize + 1)
            .map(|_| response.clone())
            .collect();
        let transport = ScriptedTransport::new(responses);

        let err = fetch_with_transport(config(&out), &transport).await.unwrap_err();
        assert!(matches!(err, SabrError::EmptyStream));
        assert!(!out.exists());
    }
}
