//! # Utility Functions Module
//!
//! Small helpers shared by the tool adapters.

use std::time::Duration;

/// Converts any iterable of displayable items into owned command-line arguments.
///
/// # Example
/// ```rust
/// use media_compressor::utils::to_string_vec;
///
/// let crf = 24;
/// let args = to_string_vec(["-c:v", "libx265", "-crf", &crf.to_string()]);
/// assert_eq!(args[3], "24");
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Builds an argument vector from mixed displayable values.
///
/// # Example
/// ```rust
/// use media_compressor::args;
///
/// let crf = 24;
/// let args = args!["-crf", crf, "-preset", "slow"];
/// assert_eq!(args, vec!["-crf", "24", "-preset", "slow"]);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        $crate::utils::to_string_vec([$($item.to_string()),*])
    };
}

/// Formats a duration as `1h02m03s`, `2m03s` or `4.2s` for log lines
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Last `max_lines` lines of tool output, used as diagnostic text
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string_vec_mixed_types() {
        let crf = 28;
        let result = to_string_vec(["-crf", &crf.to_string(), "-an"]);
        assert_eq!(result, vec!["-crf".to_string(), "28".to_string(), "-an".to_string()]);
    }

    #[test]
    fn test_to_string_vec_empty() {
        let result: Vec<String> = to_string_vec(Vec::<&str>::new());
        assert!(result.is_empty());
    }

    #[test]
    fn test_args_macro() {
        let kbps = 2500;
        let result = args!["-b:v", format!("{}k", kbps), "-preset", "slow"];
        assert_eq!(result, vec!["-b:v", "2500k", "-preset", "slow"]);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_duration(Duration::from_secs(123)), "2m03s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h02m03s");
    }

    #[test]
    fn test_tail_lines() {
        let text = "a\n\nb\nc\nd\n";
        assert_eq!(tail_lines(text, 2), "c\nd");
        assert_eq!(tail_lines("", 3), "");
    }
}
