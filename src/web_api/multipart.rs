//! `multipart/x-mixed-replace` framing for the media stream

use axum::body::Bytes;

pub const BOUNDARY: &str = "frame";

pub fn content_type() -> String {
    format!("multipart/x-mixed-replace;boundary={}", BOUNDARY)
}

/// One JPEG part, boundary first
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// Firefox renders each part as it arrives; other browsers show a part
/// only once the next one starts, so they get every part twice.
pub fn parts_per_frame(user_agent: Option<&str>) -> usize {
    match user_agent {
        Some(ua) if ua.contains("Firefox") => 1,
        _ => 2,
    }
}
