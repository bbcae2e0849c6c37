use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::APP_NAME;

/// Build information. `GREETD_COMMIT` and `GREETD_BUILD_TIME` are read at
/// compile time; `build.rs` records the compiler version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub version: String,
    pub commit: String,
    pub build_time: String,
    pub rust_version: String,
}

pub fn get() -> Info {
    Info {
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: option_env!("GREETD_COMMIT").unwrap_or("unknown").to_string(),
        build_time: option_env!("GREETD_BUILD_TIME").unwrap_or("unknown").to_string(),
        rust_version: option_env!("GREETD_RUST_VERSION").unwrap_or("unknown").to_string(),
    }
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (commit: {}, built: {}, rust: {})",
            APP_NAME, self.version, self.commit, self.build_time, self.rust_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_fills_every_field() {
        let info = get();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(!info.commit.is_empty());
        assert!(!info.build_time.is_empty());
        assert!(!info.rust_version.is_empty());
    }

    #[test]
    fn test_display() {
        let info = Info {
            version: "1.2.3".into(),
            commit: "abc123".into(),
            build_time: "2024-01-01".into(),
            rust_version: "1.78.0".into(),
        };
        assert_eq!(
            info.to_string(),
            "greetd 1.2.3 (commit: abc123, built: 2024-01-01, rust: 1.78.0)"
        );
    }
}
