#![forbid(unsafe_code)]

//! Model configuration.
//!
//! Environment variables (read by [`ModelConfig::from_env`]) override the
//! defaults:
//!
//! | variable                   | field           | default |
//! |----------------------------|-----------------|---------|
//! | `SUPERMODEL_OBSERVE_READS` | `observe_reads` | `true`  |
//! | `SUPERMODEL_TRIM_INPUT`    | `trim_input`    | `true`  |

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    /// Emit `get` / `get:<key>` on plain reads and no-op writes.
    pub observe_reads: bool,
    /// Trim text flowing back from a bound input before storing it.
    pub trim_input: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            observe_reads: true,
            trim_input: true,
        }
    }
}

impl ModelConfig {
    /// Defaults, overridden by any recognised environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(val) = env::var("SUPERMODEL_OBSERVE_READS")
            && let Some(flag) = parse_flag(&val)
        {
            config.observe_reads = flag;
        }
        if let Ok(val) = env::var("SUPERMODEL_TRIM_INPUT")
            && let Some(flag) = parse_flag(&val)
        {
            config.trim_input = flag;
        }
        config
    }

    #[must_use]
    pub fn with_observe_reads(mut self, observe: bool) -> Self {
        self.observe_reads = observe;
        self
    }

    #[must_use]
    pub fn with_trim_input(mut self, trim: bool) -> Self {
        self.trim_input = trim;
        self
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    let val = val.trim();
    if val == "1" || val.eq_ignore_ascii_case("true") {
        Some(true)
    } else if val == "0" || val.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        tracing::debug!(value = val, "ignoring unrecognised boolean flag");
        None
    }
}
