// src/utils/export.rs

use std::sync::LazyLock;

use regex::Regex;

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\w\-.]").unwrap_or_else(|e| panic!("invalid filename pattern: {e}"))
});

/// Quotes a CSV field when it contains a delimiter, quote or line break.
pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Appends one CSV line (CRLF terminated) to `out`.
pub fn push_csv_row<I, S>(out: &mut String, fields: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let line = fields
        .into_iter()
        .map(|f| csv_quote(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push_str("\r\n");
}

/// Makes a string safe for a `Content-Disposition` filename.
pub fn safe_filename(name: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(name, "_").into_owned()
}

/// Formats an optional score for export; missing scores become an empty cell.
pub fn format_score(score: Option<f64>) -> String {
    score.map(|s| format!("{}", s)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(csv_quote("Smith"), "Smith");
        assert_eq!(csv_quote("Smith, John"), "\"Smith, John\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn rows_end_with_crlf() {
        let mut out = String::new();
        push_csv_row(&mut out, ["a", "b,c"]);
        assert_eq!(out, "a,\"b,c\"\r\n");
    }

    #[test]
    fn filenames_are_sanitised() {
        assert_eq!(safe_filename("Session 1/A:B.csv"), "Session_1_A_B.csv");
    }

    #[test]
    fn missing_score_is_blank() {
        assert_eq!(format_score(None), "");
        assert_eq!(format_score(Some(7.5)), "7.5");
    }
}
