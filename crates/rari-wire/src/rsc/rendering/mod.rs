pub mod html;
pub mod streaming;

pub use html::{
    Snapshot, escape_attribute, escape_html, render_eager, render_static, render_when_ready,
    snapshot,
};
pub use streaming::{HtmlStreamOptions, render_html_stream};
