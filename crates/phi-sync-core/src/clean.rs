//! OCR text cleanup and per-group aggregation.
//!
//! Recognized text carries layout artifacts: runs of spaces and newlines
//! between cells, and hyphens or em-dashes used as separators on forms.
//! [`clean_page_text`] removes every hyphen and em-dash, collapses
//! whitespace runs to one space and trims the ends. Dashes go first so the
//! whitespace they leave behind is collapsed too, which keeps the function
//! idempotent.

/// Characters removed anywhere in recognized text.
const STRIPPED_CHARS: [char; 2] = ['-', '\u{2014}'];

/// Clean the recognized text of one page.
pub fn clean_page_text(raw: &str) -> String {
    let without_dashes: String = raw.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
    without_dashes.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Append one cleaned page to a group buffer, followed by the page separator.
pub fn push_page(buffer: &mut String, cleaned: &str) {
    buffer.push_str(cleaned);
    buffer.push(' ');
}

/// Join cleaned pages in order into the text persisted for a group.
///
/// Equals `trim(p1 + " " + p2 + ... + " " + pn)`.
pub fn aggregate_pages<S: AsRef<str>>(pages: &[S]) -> String {
    let mut buffer = String::new();
    for page in pages {
        push_page(&mut buffer, page.as_ref());
    }
    buffer.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(
            clean_page_text("  Blood   Pressure:\n\t 120/80  "),
            "Blood Pressure: 120/80"
        );
    }

    #[test]
    fn strips_all_hyphens_and_em_dashes() {
        assert_eq!(clean_page_text("- Notes -"), "Notes");
        assert_eq!(clean_page_text("follow-up in 2—3 weeks"), "followup in 23 weeks");
    }

    #[test]
    fn en_dash_is_kept() {
        assert_eq!(clean_page_text("1\u{2013}2"), "1\u{2013}2");
    }

    #[test]
    fn cleanup_is_idempotent() {
        let samples = [
            "- Notes -",
            "  a  -  b  ",
            "Dx:\n\n— hypertension —\n",
            "",
            "---",
            "plain",
        ];
        for raw in samples {
            let once = clean_page_text(raw);
            assert_eq!(clean_page_text(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn aggregate_matches_worked_example() {
        let pages = [
            clean_page_text("Blood   Pressure:  120/80"),
            clean_page_text("- Notes -"),
        ];
        assert_eq!(aggregate_pages(&pages), "Blood Pressure: 120/80 Notes");
    }

    #[test]
    fn aggregate_of_nothing_is_empty() {
        let pages: [&str; 0] = [];
        assert_eq!(aggregate_pages(&pages), "");
        assert_eq!(aggregate_pages(&["", ""]), "");
    }

    #[test]
    fn aggregate_follows_join_formula() {
        let pages = ["a", "", "b"];
        assert_eq!(aggregate_pages(&pages), "a  b");
    }
}
