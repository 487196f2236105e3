use super::{Mode, MxPattern, Policy};

// RFC 8461 upper bound for max_age.
const MAX_AGE_CAP: u64 = 31_557_600;

impl Policy {
    /// Parses the `.well-known/mta-sts.txt` document. Line-oriented
    /// `key: value` pairs, LF or CRLF terminated; unknown keys and lines
    /// without a colon are ignored. `version`, `mode` and `max_age` are
    /// mandatory, and any mode other than `none` requires at least one
    /// `mx` entry.
    pub fn parse(data: &str) -> Result<Policy, String> {
        let mut has_version = false;
        let mut mode = None;
        let mut max_age = None;
        let mut mx = Vec::new();

        for line in data.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "version" => {
                    if !value.eq_ignore_ascii_case("STSv1") {
                        return Err(format!("Unsupported version {value:?}."));
                    }
                    has_version = true;
                }
                "mode" => {
                    mode = match value {
                        "enforce" => Some(Mode::Enforce),
                        "testing" => Some(Mode::Testing),
                        "none" => Some(Mode::None),
                        _ => return Err(format!("Unsupported mode {value:?}.")),
                    };
                }
                "max_age" => {
                    max_age = match value.parse::<u64>() {
                        Ok(seconds) if seconds > 0 => Some(seconds.min(MAX_AGE_CAP)),
                        _ => return Err(format!("Invalid max_age {value:?}.")),
                    };
                }
                "mx" => {
                    if let Some(suffix) = value.strip_prefix('*') {
                        if !suffix.is_empty() {
                            mx.push(MxPattern::StartsWith(suffix.to_lowercase()));
                        }
                    } else if !value.is_empty() {
                        mx.push(MxPattern::Equals(value.to_lowercase()));
                    }
                }
                _ => (),
            }
        }

        if !has_version {
            return Err("Missing 'version' key.".to_string());
        }
        let mode = mode.ok_or_else(|| "Missing 'mode' key.".to_string())?;
        let max_age = max_age.ok_or_else(|| "Missing 'max_age' key.".to_string())?;
        if mode != Mode::None && mx.is_empty() {
            return Err("No 'mx' entries found.".to_string());
        }

        Ok(Policy { mode, mx, max_age })
    }
}
