//! Object paths on the wire.
//!
//! Object names are stored decoded. Request URIs and the `Destination`,
//! `X-Copy-From` and `X-Link-To` headers carry them percent-encoded, so every
//! hop decodes on the way in and encodes on the way out.

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::str::Utf8Error;

/// Bytes escaped inside a single path segment. Non-ASCII is always escaped.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-decode a path taken from a URI or header.
pub fn decode_object_path(raw: &str) -> Result<String, Utf8Error> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
}

/// Percent-encode a decoded path, keeping `/` as the segment separator.
pub fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}
