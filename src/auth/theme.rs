//! Theme naming and color validation rules.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Built-in theme names custom themes may not shadow.
pub const RESERVED_THEMES: [&str; 3] = ["light", "dark", "red"];

/// Active theme a user falls back to when their current one is deleted.
pub const DEFAULT_THEME: &str = "light";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTheme {
    pub name: String,
    pub hex: String,
}

/// `#rgb` or `#rrggbb`, case-insensitive.
#[must_use]
pub fn valid_hex(hex: &str) -> bool {
    Regex::new(r"^#([0-9A-Fa-f]{3}){1,2}$").is_ok_and(|re| re.is_match(hex))
}

#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_THEMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}
