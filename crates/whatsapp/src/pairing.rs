//! Operator side channel for pairing codes.

use {
    qrcode::{QrCode, render::unicode::Dense1x2},
    tracing::{info, warn},
};

/// Render a pairing code as a terminal QR code (two modules per character).
pub fn render_qr(code: &str) -> Option<String> {
    let qr = QrCode::new(code.as_bytes()).ok()?;
    Some(
        qr.render::<Dense1x2>()
            .dark_color(Dense1x2::Light)
            .light_color(Dense1x2::Dark)
            .quiet_zone(true)
            .build(),
    )
}

/// Log the code and print it as a QR code on stderr.
pub fn announce(code: &str) {
    info!(
        code_len = code.len(),
        "pairing required: open WhatsApp > Linked Devices > Link a Device and scan the code below"
    );
    match render_qr(code) {
        Some(qr) => eprintln!("\n{qr}"),
        None => warn!(code, "pairing code too long for a QR code, printing it raw"),
    }
}
