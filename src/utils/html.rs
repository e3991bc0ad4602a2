use ammonia;

/// Clean free text typed by examiners and staff (score comments, item notes,
/// station scenarios) before it is stored and shown back in other clients.
///
/// Whitelist-based: safe formatting tags survive, `<script>` and event
/// handler attributes are stripped.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_keeps_text() {
        let cleaned = clean_html("Good rapport<script>alert(1)</script>");
        assert_eq!(cleaned, "Good rapport");
    }

    #[test]
    fn keeps_basic_formatting() {
        assert_eq!(clean_html("<b>Critical</b>"), "<b>Critical</b>");
    }
}
