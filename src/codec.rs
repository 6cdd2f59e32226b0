//! Wire codec for the three-digit ASCII ventilation protocol.
//!
//! Implements the CR-terminated, LF-led frame grammar:
//!
//! ```text
//! write request:    LF AAA 's' 'W' FFF VVV CR
//! read request:     LF AAA 'l' 'W' FFF CR
//! write response:   LF AAA 's' 'W' '#' FFF VVV CR
//! read response:    LF AAA 'l' 'W' '#' FFF VVV CR
//! no-data response: LF AAA ('s'|'l') 'W' '#' '?' CR
//! ```
//!
//! `AAA`, `FFF` and `VVV` are exactly three zero-padded decimal digits for
//! address, function and value. The codec is asymmetric: [`encode`] accepts
//! only request frames, [`decode`] only response frames — the device side
//! of the conversation is never synthesized here.
//!
//! Decoding is pure: the same input always yields the same outcome.

use tracing::{debug, trace};

use crate::error::{Result, VentioError};
use crate::frame::{Frame, FrameKind};

/// Frame start marker.
pub const CHAR_LF: u8 = b'\n';
/// Frame terminator.
pub const CHAR_CR: u8 = b'\r';
/// Register-group letter present in every frame.
pub const CHAR_WRG: u8 = b'W';
/// Kind letter of write frames.
pub const CHAR_WRITE: u8 = b's';
/// Kind letter of read frames.
pub const CHAR_READ: u8 = b'l';
/// Marker distinguishing responses from requests.
pub const CHAR_RESPONSE: u8 = b'#';
/// Payload sentinel for a device-rejected function.
pub const CHAR_NO_DATA: u8 = b'?';

/// Wire length of an encoded read request.
pub const READ_REQUEST_LEN: usize = 10;
/// Wire length of an encoded write request.
pub const WRITE_REQUEST_LEN: usize = 13;
/// Wire length of a numeric response.
const RESPONSE_LEN: usize = 14;
/// Wire length of a no-data (`?`) response.
const NO_DATA_RESPONSE_LEN: usize = 9;

/// Encode a request frame into its wire representation.
///
/// # Errors
///
/// Returns [`VentioError::EncodeUnsupported`] for response kinds; only the
/// device emits responses.
pub fn encode(frame: &Frame) -> Result<String> {
    trace!(?frame, "encoding frame");

    let data = match frame.kind() {
        FrameKind::ReadRequest => {
            format!("\n{:03}lW{:03}\r", frame.address(), frame.function())
        }
        FrameKind::WriteRequest => format!(
            "\n{:03}sW{:03}{:03}\r",
            frame.address(),
            frame.function(),
            frame.value()
        ),
        kind => return Err(VentioError::EncodeUnsupported(kind)),
    };

    trace!(data = %escape_crlf(&data), "encoded frame");
    Ok(data)
}

/// Decode a single response frame from its wire representation.
///
/// The input is one CR-terminated line as read off the serial port. Noise
/// bytes before the frame's LF are tolerated; the decoder scans for the
/// first position at which the response grammar matches.
///
/// # Errors
///
/// - [`VentioError::DecodeMismatch`] if no position matches the grammar.
/// - [`VentioError::QuestionMark`] if the payload is the `?` sentinel.
/// - [`VentioError::OutOfRange`] if a matched field fails validation.
pub fn decode(data: &str) -> Result<Frame> {
    trace!(data = %escape_crlf(data), "decoding frame");

    let bytes = data.as_bytes();
    for (start, _) in data.match_indices(char::from(CHAR_LF)) {
        if let Some(matched) = decode_at(bytes, start, data) {
            match &matched {
                Ok(frame) => trace!(?frame, "successfully decoded frame"),
                Err(error) => debug!(%error, "error decoding frame"),
            }
            return matched;
        }
    }

    Err(VentioError::DecodeMismatch {
        data: data.to_string(),
    })
}

/// Try to match the response grammar at `start`. Returns `None` if the
/// grammar does not match there; a grammar match yields the final outcome.
fn decode_at(bytes: &[u8], start: usize, data: &str) -> Option<Result<Frame>> {
    let rest = &bytes[start..];
    if rest.len() < NO_DATA_RESPONSE_LEN {
        return None;
    }

    // Common prefix: LF AAA (l|s) W #
    let address = parse_three_digits(&rest[1..4])?;
    let kind = match rest[4] {
        CHAR_READ => FrameKind::ReadResponse,
        CHAR_WRITE => FrameKind::WriteResponse,
        _ => return None,
    };
    if rest[5] != CHAR_WRG || rest[6] != CHAR_RESPONSE {
        return None;
    }

    if rest[7] == CHAR_NO_DATA && rest[8] == CHAR_CR {
        return Some(Err(VentioError::QuestionMark {
            data: data.to_string(),
        }));
    }

    if rest.len() < RESPONSE_LEN || rest[13] != CHAR_CR {
        return None;
    }
    let function = parse_three_digits(&rest[7..10])?;
    let value = parse_three_digits(&rest[10..13])?;

    Some(Frame::response(kind, address, function, value))
}

/// Parse exactly three ASCII decimal digits.
fn parse_three_digits(digits: &[u8]) -> Option<u16> {
    debug_assert_eq!(digits.len(), 3);
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(
        u16::from(digits[0] - b'0') * 100
            + u16::from(digits[1] - b'0') * 10
            + u16::from(digits[2] - b'0'),
    )
}

/// Render wire data with LF/CR replaced by `\n`/`\r` for log records.
pub fn escape_crlf(data: &str) -> String {
    data.replace('\n', "\\n").replace('\r', "\\r")
}
