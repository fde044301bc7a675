//! Run log formatting
//!
//! Hosts render the run log in a terminal, so lines carry raw ANSI SGR codes
//! and end with CRLF. Every formatted fragment is closed with a reset.

pub const NEW_LINE: &str = "\r\n";
pub const TAB: &str = "\t";
pub const GREEN: &str = "\u{1b}[32m";
pub const RED: &str = "\u{1b}[31m";
pub const BOLD: &str = "\u{1b}[1m";
pub const RESET: &str = "\u{1b}[0m";

/// Builds coloured, indented run log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct Formatter;

impl Formatter {
    pub fn new() -> Self {
        Self
    }

    pub fn new_line(&self) -> &'static str {
        NEW_LINE
    }

    pub fn tab(&self) -> &'static str {
        TAB
    }

    pub fn format_in_bold(&self, text: &str) -> String {
        self.format(&format!("{}{}", BOLD, text))
    }

    pub fn format_in_red(&self, text: &str) -> String {
        self.format(&format!("{}{}", RED, text))
    }

    pub fn format_in_green(&self, text: &str) -> String {
        self.format(&format!("{}{}", GREEN, text))
    }

    pub fn format_with_tab(&self, text: &str) -> String {
        self.format(&format!("{}{}", TAB, text))
    }

    fn format(&self, text: &str) -> String {
        format!("{}{}{}", text, RESET, NEW_LINE)
    }
}
