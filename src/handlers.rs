//! Part handlers: one per known UMP part type, dispatched by a table keyed
//! on the part-type id. Each handler mutates `Session` state and/or
//! appends to the output file. Operates on `ParsedMessage` rather than
//! per-message hand-unrolled structs, and on the `Session`/
//! `InitializedFormat` consumed-range model in `session.rs` rather than a
//! single running end-segment scalar.

use crate::error::SabrError;
use crate::output::Output;
use crate::proto::{split_header_id, ParsedMessage};
use crate::session::{InitializedFormat, Session, WritePolicy};
use crate::ump::UmpPart;

pub const MEDIA_HEADER: u32 = 20;
pub const MEDIA: u32 = 21;
pub const MEDIA_END: u32 = 22;
pub const LIVE_METADATA: u32 = 31;
pub const NEXT_REQUEST_POLICY: u32 = 35;
pub const FORMAT_INITIALIZATION_METADATA: u32 = 42;
pub const SABR_REDIRECT: u32 = 43;
pub const SABR_ERROR: u32 = 44;
pub const SABR_CONTEXT_UPDATE: u32 = 57;
pub const STREAM_PROTECTION_STATUS: u32 = 58;
pub const SABR_CONTEXT_SENDING_POLICY: u32 = 59;

/// Dispatch one UMP part. Unknown types are silently ignored.
pub async fn dispatch(
    part: UmpPart,
    session: &mut Session,
    output: &mut Output,
) -> Result<(), SabrError> {
    match part.part_type {
        MEDIA_HEADER => handle_media_header(&part.payload, session),
        MEDIA => handle_media(&part.payload, session, output).await,
        MEDIA_END => handle_media_end(&part.payload, session),
        LIVE_METADATA => Ok(()),
        NEXT_REQUEST_POLICY => handle_next_request_policy(&part.payload, session),
        FORMAT_INITIALIZATION_METADATA => handle_format_init(&part.payload, session),
        SABR_REDIRECT => handle_redirect(&part.payload, session),
        SABR_ERROR => handle_sabr_error(&part.payload),
        SABR_CONTEXT_UPDATE => handle_context_update(&part.payload, session),
        STREAM_PROTECTION_STATUS => handle_stream_protection_status(&part.payload),
        SABR_CONTEXT_SENDING_POLICY => handle_context_sending_policy(&part.payload, session),
        _ => Ok(()),
    }
}

fn format_key_from_header(msg: &ParsedMessage) -> Option<String> {
    if let Some(format_id_msg) = msg.first_submessage(13) {
        if let Some(itag) = format_id_msg.first_varint(1) {
            return Some((itag as i32).to_string());
        }
    }
    msg.first_varint(3).map(|itag| (itag as i32).to_string())
}

fn handle_media_header(payload: &[u8], session: &mut Session) -> Result<(), SabrError> {
    let msg = ParsedMessage::parse(payload);
    let Some(id) = msg.first_varint(1) else {
        return Ok(());
    };
    let id = id as u8;

    let Some(format_key) = format_key_from_header(&msg) else {
        return Ok(());
    };

    let is_init_segment = msg.first_bool(8).unwrap_or(false);
    let sequence_number = msg.first_varint(9).map(|v| v as i64);
    let start_ms = msg.first_varint(11).unwrap_or(0) as i64;
    let duration_ms = msg.first_varint(12).unwrap_or(0) as i64;

    let discard = session
        .initialized_formats
        .get(&format_key)
        .map(|f| f.discard)
        .unwrap_or(true);

    session.partial_segments.insert(
        id,
        crate::session::PartialSegment {
            format_key,
            is_init_segment,
            sequence_number,
            start_ms,
            duration_ms,
            discard,
            received_bytes: 0,
        },
    );
    Ok(())
}

async fn handle_media(
    payload: &[u8],
    session: &mut Session,
    output: &mut Output,
) -> Result<(), SabrError> {
    if payload.is_empty() {
        return Ok(());
    }
    let (header_id, data) = split_header_id(payload)?;
    let header_id = header_id as u8;

    let Some(segment) = session.partial_segments.get_mut(&header_id) else {
        return Ok(());
    };
    segment.received_bytes += data.len() as u64;
    let discard = segment.discard;

    if !discard && !data.is_empty() {
        output.append(data).await?;
    }
    Ok(())
}

fn handle_media_end(payload: &[u8], session: &mut Session) -> Result<(), SabrError> {
    if payload.is_empty() {
        return Ok(());
    }
    let (header_id, _) = split_header_id(payload)?;
    let header_id = header_id as u8;

    let Some(segment) = session.partial_segments.remove(&header_id) else {
        return Ok(());
    };

    if !segment.discard {
        session.activity_in_request = true;
    }

    if let Some(format) = session.initialized_formats.get_mut(&segment.format_key) {
        if segment.is_init_segment {
            format.init_segment_received = true;
        } else if let Some(seq) = segment.sequence_number {
            format.record_segment(seq, segment.start_ms, segment.duration_ms);
        }
    }
    Ok(())
}

fn handle_next_request_policy(payload: &[u8], session: &mut Session) -> Result<(), SabrError> {
    let msg = ParsedMessage::parse(payload);
    if let Some(cookie) = msg.first_bytes(7) {
        session.playback_cookie = Some(cookie.to_vec());
    }
    Ok(())
}

fn handle_format_init(payload: &[u8], session: &mut Session) -> Result<(), SabrError> {
    let msg = ParsedMessage::parse(payload);
    let Some(format_id_msg) = msg.first_submessage(2) else {
        return Ok(());
    };
    let Some(itag) = format_id_msg.first_varint(1) else {
        return Ok(());
    };
    let itag = itag as i32;
    let key = itag.to_string();

    if session.initialized_formats.contains_key(&key) {
        return Ok(());
    }

    let lmt = format_id_msg.first_varint(2).filter(|&v| v > 0).map(|v| v as i64);
    let xtags = format_id_msg.first_string(3);
    let end_time_ms = msg.first_varint(3).map(|v| v as i64);
    let total_segments = msg.first_varint(4).map(|v| v as i64);
    let mime_type = msg.first_string(5);
    let discard = !mime_type
        .as_deref()
        .map(|m| m.starts_with("audio/"))
        .unwrap_or(false);

    let mut format = InitializedFormat::new(itag, lmt, xtags, discard);
    format.end_time_ms = end_time_ms;
    format.total_segments = total_segments;
    format.mime_type = mime_type;

    if !discard && session.audio_format_key.is_none() {
        session.audio_format_key = Some(key.clone());
    }

    session.initialized_formats.insert(key, format);
    Ok(())
}

fn handle_redirect(payload: &[u8], session: &mut Session) -> Result<(), SabrError> {
    let msg = ParsedMessage::parse(payload);
    if let Some(url) = msg.first_string(1) {
        tracing::debug!(new_url = %url, "sabr: redirect");
        session.url = url;
    }
    Ok(())
}

fn handle_sabr_error(payload: &[u8]) -> Result<(), SabrError> {
    let msg = ParsedMessage::parse(payload);
    let error_type = msg.first_string(1);
    let action = msg.first_varint(2).map(|v| v as i64).unwrap_or(0);
    let status_code = msg
        .first_submessage(3)
        .and_then(|sub| sub.first_varint(1))
        .map(|v| v as i64);
    tracing::warn!(?error_type, action, ?status_code, "sabr: SABR_ERROR part");
    Err(SabrError::Sabr {
        error_type,
        action,
        status_code,
    })
}

fn handle_context_update(payload: &[u8], session: &mut Session) -> Result<(), SabrError> {
    let msg = ParsedMessage::parse(payload);
    let Some(context_type) = msg.first_varint(1) else {
        return Ok(());
    };
    let context_type = context_type as i32;
    let value = msg.first_bytes(3).unwrap_or(&[]).to_vec();
    let send_by_default = msg.first_bool(4).unwrap_or(false);
    let write_policy = WritePolicy::from_wire(msg.first_varint(5).map(|v| v as i64).unwrap_or(0));

    if write_policy == WritePolicy::KeepFirst
        && session.sabr_context_updates.contains_key(&context_type)
    {
        // keep the first value; only the send-set membership can still change.
    } else {
        session.sabr_context_updates.insert(
            context_type,
            crate::session::SabrContext {
                context_type,
                value,
                send_by_default,
                write_policy,
            },
        );
    }

    if send_by_default {
        session.sabr_contexts_to_send.insert(context_type);
    }
    Ok(())
}

fn handle_stream_protection_status(payload: &[u8]) -> Result<(), SabrError> {
    let msg = ParsedMessage::parse(payload);
    match msg.first_varint(1) {
        Some(3) => {
            tracing::warn!("sabr: STREAM_PROTECTION_STATUS=REQUIRED, aborting fetch");
            Err(SabrError::AttestationRequired)
        }
        _ => Ok(()),
    }
}

fn handle_context_sending_policy(payload: &[u8], session: &mut Session) -> Result<(), SabrError> {
    let msg = ParsedMessage::parse(payload);
    for t in msg.all_varints(1) {
        session.sabr_contexts_to_send.insert(t as i32);
    }
    for t in msg.all_varints(2) {
        session.sabr_contexts_to_send.remove(&(t as i32));
    }
    for t in msg.all_varints(3) {
        // Removed from updates but deliberately left in the send-set: an
        // "unsent" entry the server may re-supply next request.
        session.sabr_context_updates.remove(&(t as i32));
    }
    Ok(())
}
