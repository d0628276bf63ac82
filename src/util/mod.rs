//! Text helpers shared by the normalizer and the command-line output.

mod html;
mod text;

pub use html::{decode_entities, html_to_text};
pub use text::{has_control_chars, strip_control_chars, truncate_to_width};
