use base64::{engine::general_purpose, Engine as _};
use qrcode::render::{svg, unicode};
use qrcode::types::QrError;
use qrcode::QrCode;

pub const DEFAULT_SVG_SIZE: u32 = 256;

/// Render `data` as an SVG document of at least `size`×`size` pixels.
pub fn render_svg(data: &str, size: Option<u32>) -> Result<String, QrError> {
    let size = size.unwrap_or(DEFAULT_SVG_SIZE);
    let code = QrCode::new(data.as_bytes())?;

    Ok(code
        .render::<svg::Color>()
        .min_dimensions(size, size)
        .build())
}

/// Render `data` with half-block characters so it can be scanned off a
/// terminal.
pub fn render_terminal(data: &str) -> Result<String, QrError> {
    let code = QrCode::new(data.as_bytes())?;

    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

/// Split a `data:<mime>;base64,<payload>` URL into its mimetype and bytes.
pub fn decode_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let (header, payload) = url.strip_prefix("data:")?.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let bytes = general_purpose::STANDARD.decode(payload.trim()).ok()?;
    let mime = if mime.is_empty() { "application/octet-stream" } else { mime };
    Some((mime.to_string(), bytes))
}
