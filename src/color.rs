//! Styling of the diagnostics the CLI prints on standard error.

use crate::cli::ColorMode;
use lazy_static::lazy_static;
use nu_ansi_term::{Color, Style};
use std::sync::atomic::{AtomicBool, Ordering};

lazy_static! {
    pub(crate) static ref ERROR_INDICATOR: Style = Color::Red.bold();
    pub(crate) static ref ERROR_TEXT: Style = Color::Default.bold();
}

static USE_COLOR: AtomicBool = AtomicBool::new(true);

pub(crate) fn configure_color(cmode: ColorMode) {
    USE_COLOR.store(matches!(cmode, ColorMode::On), Ordering::Relaxed);
}

/// `text` in `style`, or unstyled when color is off.
pub(crate) fn paint(style: &Style, text: &str) -> String {
    if USE_COLOR.load(Ordering::Relaxed) {
        style.paint(text).to_string()
    } else {
        text.to_string()
    }
}
