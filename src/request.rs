//! Request builder: serializes the session's current state into a
//! protobuf request body against an exact field-number table.
//!
//! Deliberately minimal on `client_abr_state`: a production client might
//! also write fields like `16,21,22,23,34,35,39,44,69` because a given
//! server happens to accept (and sometimes expect) them, but this wire
//! contract only requires `28,40,46,76` at that level.

use crate::config::FetchConfig;
use crate::proto::ProtoWriter;
use crate::session::{ConsumedRange, FormatId, Session};

pub fn build_request_body(session: &Session, config: &FetchConfig) -> Vec<u8> {
    let mut top = ProtoWriter::new();

    let mut abr_state = ProtoWriter::new();
    abr_state.write_varint_field(28, session.player_time_ms as u64);
    abr_state.write_varint_field(40, 1);
    abr_state.write_varint_field(46, 1);
    abr_state.write_varint_field(76, 1);
    top.write_message(1, abr_state);

    for format in session.initialized_formats.values() {
        let mut w = ProtoWriter::new();
        encode_format_id(&format.format_id(), &mut w);
        top.write_message(2, w);
    }

    for format in session.initialized_formats.values() {
        for range in &format.consumed_ranges {
            let mut w = ProtoWriter::new();
            encode_buffered_range(&format.format_id(), range, &mut w);
            top.write_message(3, w);
        }
    }

    if let Some(ustreamer_config) = &session.ustreamer_config {
        if !ustreamer_config.is_empty() {
            top.write_bytes(5, ustreamer_config);
        }
    }

    let mut preferred = ProtoWriter::new();
    encode_format_id(
        &FormatId {
            itag: session.preferred_itag,
            lmt: session.preferred_lmt,
            xtags: None,
        },
        &mut preferred,
    );
    top.write_message(16, preferred);

    let mut streamer_context = ProtoWriter::new();
    encode_streamer_context(session, config, &mut streamer_context);
    top.write_message(19, streamer_context);

    top.finish()
}

fn encode_format_id(format_id: &FormatId, w: &mut ProtoWriter) {
    w.write_varint_field_nonzero(1, format_id.itag as u64);
    if let Some(lmt) = format_id.lmt {
        if lmt > 0 {
            w.write_varint_field_nonzero(2, lmt as u64);
        }
    }
    if let Some(xtags) = &format_id.xtags {
        w.write_string(3, xtags);
    }
}

fn encode_time_range(range: &ConsumedRange, w: &mut ProtoWriter) {
    w.write_varint_field_nonzero(1, range.start_time_ms as u64);
    w.write_varint_field_nonzero(2, range.duration_ms as u64);
    w.write_varint_field(3, 1000);
}

fn encode_buffered_range(format_id: &FormatId, range: &ConsumedRange, w: &mut ProtoWriter) {
    let mut fid = ProtoWriter::new();
    encode_format_id(format_id, &mut fid);
    w.write_message(1, fid);
    w.write_varint_field_nonzero(2, range.start_time_ms as u64);
    w.write_varint_field_nonzero(3, range.duration_ms as u64);
    w.write_varint_field_nonzero(4, range.start_sequence_number as u64);
    w.write_varint_field_nonzero(5, range.end_sequence_number as u64);
    let mut time_range = ProtoWriter::new();
    encode_time_range(range, &mut time_range);
    w.write_message(6, time_range);
}

/// The fuller `ClientInfo` variant: `hl`/`gl`/`visitorData`/`userAgent`
/// are all emitted when the caller supplied them, alongside the
/// mandatory `clientName` (see DESIGN.md's Open Question 1).
fn encode_client_info(config: &FetchConfig, w: &mut ProtoWriter) {
    if let Some(hl) = &config.hl {
        w.write_string(1, hl);
    }
    if let Some(gl) = &config.gl {
        w.write_string(2, gl);
    }
    if let Some(visitor_data) = &config.visitor_data {
        w.write_string(14, visitor_data);
    }
    if let Some(user_agent) = &config.user_agent {
        w.write_string(15, user_agent);
    }
    w.write_varint_field(16, config.client_name as u64);
    if let Some(client_version) = &config.client_version {
        w.write_string(17, client_version);
    }
}

fn encode_streamer_context(session: &Session, config: &FetchConfig, w: &mut ProtoWriter) {
    let mut client_info = ProtoWriter::new();
    encode_client_info(config, &mut client_info);
    w.write_message(1, client_info);

    if let Some(po_token) = &session.po_token {
        if !po_token.is_empty() {
            w.write_bytes(2, po_token);
        }
    }
    if let Some(cookie) = &session.playback_cookie {
        if !cookie.is_empty() {
            w.write_bytes(3, cookie);
        }
    }

    let (with_update, unsent) = session.contexts_to_send();
    for ctx in with_update {
        let mut sub = ProtoWriter::new();
        sub.write_varint_field_nonzero(1, ctx.context_type as u64);
        sub.write_bytes(2, &ctx.value);
        w.write_message(5, sub);
    }
    for context_type in unsent {
        w.write_varint_field_nonzero(6, context_type as u64);
    }
}
