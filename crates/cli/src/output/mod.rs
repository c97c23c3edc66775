//! Output formatting

mod formatter;

pub use formatter::Formatter;

/// Output settings shared by all commands
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    pub json: bool,
    pub no_color: bool,
    pub quiet: bool,
}
