use std::fmt;

/// A single structured configuration-validation failure.
///
/// Renders as:
/// ```text
/// Configuration error at <json_path>: <message>
/// Suggestion: <suggestion>
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub json_path: String,
    pub suggestion: String,
}

impl ValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        json_path: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            json_path: json_path.into(),
            suggestion: suggestion.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Configuration error at {}: {}\nSuggestion: {}",
            self.json_path, self.message, self.suggestion
        )
    }
}

impl std::error::Error for ValidationError {}

/// Fails unless `1 <= port <= 65535`.
pub fn port_range(port: i64, json_path: &str) -> Result<(), ValidationError> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "port",
            format!("port {port} is out of range (expected 1..=65535)"),
            json_path,
            "choose a port between 1 and 65535",
        ))
    }
}

/// Fails unless `n >= 1`.
pub fn timeout_positive(n: i64, field: &str, json_path: &str) -> Result<(), ValidationError> {
    if n >= 1 {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("{field} must be >= 1 (got {n})"),
            json_path,
            format!("set {field} to a positive number of seconds"),
        ))
    }
}

/// Validates a `"source:dest[:mode]"` mount specification.
///
/// Splits on `:` into exactly 3 parts; both `source` and `dest` must be
/// non-empty and absolute (start with `/`); `mode` must be the literal
/// lowercase string `ro` or `rw`.
pub fn mount_format(spec: &str, index: usize, json_path: &str) -> Result<(), ValidationError> {
    let parts: Vec<&str> = spec.split(':').collect();
    let fail = |message: String| {
        Err(ValidationError::new(
            format!("mounts[{index}]"),
            message,
            json_path,
            "use the form \"/absolute/source:/absolute/dest:ro\" or \"...:rw\"",
        ))
    };

    if parts.len() != 3 {
        return fail(format!(
            "mount '{spec}' must have exactly 3 ':'-separated parts (source:dest:mode)"
        ));
    }

    let (source, dest, mode) = (parts[0], parts[1], parts[2]);

    if source.is_empty() || !source.starts_with('/') {
        return fail(format!("mount source '{source}' must be a non-empty absolute path"));
    }
    if dest.is_empty() || !dest.starts_with('/') {
        return fail(format!(
            "mount destination '{dest}' must be a non-empty absolute path"
        ));
    }
    if mode != "ro" && mode != "rw" {
        return fail(format!("mount mode '{mode}' must be exactly 'ro' or 'rw'"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_two_line_rendering() {
        let err = ValidationError::new("gateway.port", "bad port", "$.gateway.port", "fix it");
        assert_eq!(
            err.to_string(),
            "Configuration error at $.gateway.port: bad port\nSuggestion: fix it"
        );
    }

    #[test]
    fn port_range_accepts_boundaries() {
        assert!(port_range(1, "$.p").is_ok());
        assert!(port_range(65535, "$.p").is_ok());
    }

    #[test]
    fn port_range_rejects_out_of_bounds() {
        assert!(port_range(0, "$.p").is_err());
        assert!(port_range(65536, "$.p").is_err());
    }

    #[test]
    fn timeout_positive_rejects_zero_and_negative() {
        assert!(timeout_positive(1, "startup_timeout_s", "$.t").is_ok());
        assert!(timeout_positive(0, "startup_timeout_s", "$.t").is_err());
        assert!(timeout_positive(-1, "startup_timeout_s", "$.t").is_err());
    }

    #[test]
    fn mount_format_accepts_root_mount() {
        assert!(mount_format("/:/root:ro", 0, "$.m").is_ok());
    }

    #[test]
    fn mount_format_rejects_relative_source() {
        assert!(mount_format("./x:/y:ro", 0, "$.m").is_err());
    }

    #[test]
    fn mount_format_rejects_uppercase_mode() {
        assert!(mount_format("/x:/y:RO", 0, "$.m").is_err());
    }

    #[test]
    fn mount_format_rejects_wrong_part_count() {
        assert!(mount_format("/x:/y", 0, "$.m").is_err());
        assert!(mount_format("/x:/y:ro:extra", 0, "$.m").is_err());
    }
}
