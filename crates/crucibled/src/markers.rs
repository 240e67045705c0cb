//! Marker extraction from captured output.
//!
//! A marker occurs wherever a line (optionally preceded by horizontal
//! whitespace) begins with a bracketed tag, `[TYPE]` or `[TYPE:SUBTYPE]`;
//! the remainder of the line is the content. Extraction is pure: identical
//! input always yields an identical marker sequence, in document order.

use once_cell::sync::Lazy;
use regex::Regex;

use crucible_protocol::Marker;

// Horizontal whitespace only before the bracket: `\s` would swallow
// preceding newlines and misattribute the line number.
static MARKER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*\[([A-Z][A-Z0-9_]*)(?::([^\]]+))?\][ \t]*(.*)$")
        .expect("marker pattern is valid")
});

/// Extracts all markers from `text`, in the order they appear.
///
/// Unknown marker types are retained with category `unknown`. Line numbers
/// are 1-indexed: they count newlines strictly before the match start.
#[must_use]
pub fn extract_markers(text: &str) -> Vec<Marker> {
    MARKER_PATTERN
        .captures_iter(text)
        .map(|captures| {
            let start = captures.get(0).map_or(0, |m| m.start());
            let kind = captures.get(1).map_or("", |m| m.as_str());
            Marker {
                kind: kind.to_owned(),
                subtype: captures.get(2).map(|m| m.as_str().to_owned()),
                content: captures.get(3).map_or("", |m| m.as_str()).trim().to_owned(),
                line_number: text[..start].matches('\n').count() + 1,
                category: categorise(kind).to_owned(),
            }
        })
        .collect()
}

/// Maps a marker type to its category in the fixed taxonomy.
///
/// The table is static process-wide state: no runtime mutation, unknown
/// types map to `unknown`.
#[must_use]
pub fn categorise(kind: &str) -> &'static str {
    match kind {
        "OBJECTIVE" | "HYPOTHESIS" | "EXPERIMENT" | "OBSERVATION" | "ANALYSIS" | "CONCLUSION" => {
            "research_process"
        }
        "DATA" | "SHAPE" | "DTYPE" | "RANGE" | "MISSING" | "MEMORY" => "data_operations",
        "CALC" | "METRIC" | "STAT" | "CORR" => "calculations",
        "PLOT" | "ARTIFACT" | "TABLE" | "FIGURE" => "artifacts",
        "FINDING" | "INSIGHT" | "PATTERN" => "insights",
        "STEP" | "CHECK" | "INFO" | "WARNING" | "ERROR" | "DEBUG" => "workflow",
        "CITATION" | "LIMITATION" | "NEXT_STEP" | "DECISION" => "scientific",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn text_without_markers_yields_nothing() {
        assert!(extract_markers("plain output\nno tags here\n").is_empty());
        assert!(extract_markers("").is_empty());
    }

    #[test]
    fn extracts_type_and_subtype() {
        let markers = extract_markers("[METRIC:accuracy] 0.95");
        assert_eq!(markers.len(), 1);
        let marker = &markers[0];
        assert_eq!(marker.kind, "METRIC");
        assert_eq!(marker.subtype.as_deref(), Some("accuracy"));
        assert_eq!(marker.content, "0.95");
        assert_eq!(marker.line_number, 1);
        assert_eq!(marker.category, "calculations");
    }

    #[test]
    fn marker_without_subtype_has_none() {
        let markers = extract_markers("[STEP] Loading data...");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].kind, "STEP");
        assert_eq!(markers[0].subtype, None);
        assert_eq!(markers[0].category, "workflow");
    }

    #[test]
    fn line_numbers_survive_embedded_blank_lines() {
        let text = "first\n\n[CHECK] midway\n\n\n[FINDING] at the end";
        let markers = extract_markers(text);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].line_number, 3);
        assert_eq!(markers[1].line_number, 6);
    }

    #[test]
    fn first_line_marker_reports_line_one() {
        let markers = extract_markers("[STEP] start\nrest");
        assert_eq!(markers[0].line_number, 1);
    }

    #[test]
    fn leading_horizontal_whitespace_is_allowed() {
        let markers = extract_markers("    [INFO] indented");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].content, "indented");
        assert_eq!(markers[0].line_number, 1);
    }

    #[test]
    fn unknown_types_are_kept_with_unknown_category() {
        let markers = extract_markers("[ZZTOP] retained anyway");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].kind, "ZZTOP");
        assert_eq!(markers[0].category, "unknown");
    }

    #[test]
    fn lowercase_tags_are_not_markers() {
        assert!(extract_markers("[step] nope\n[Metric] nope").is_empty());
    }

    #[test]
    fn markers_come_back_in_document_order() {
        let text = "[PLOT] a\n[STEP] b\n[PLOT] c";
        let kinds: Vec<String> = extract_markers(text).into_iter().map(|m| m.kind).collect();
        assert_eq!(kinds, ["PLOT", "STEP", "PLOT"]);
    }

    #[test]
    fn extraction_is_idempotent() {
        let text = "[STEP] one\n[METRIC:f1] 0.8\n";
        assert_eq!(extract_markers(text), extract_markers(text));
    }

    #[test]
    fn content_is_trimmed() {
        let markers = extract_markers("[DATA]    loaded 42 rows   ");
        assert_eq!(markers[0].content, "loaded 42 rows");
    }

    #[rstest]
    #[case("OBJECTIVE", "research_process")]
    #[case("SHAPE", "data_operations")]
    #[case("CORR", "calculations")]
    #[case("FIGURE", "artifacts")]
    #[case("PATTERN", "insights")]
    #[case("DEBUG", "workflow")]
    #[case("NEXT_STEP", "scientific")]
    #[case("NOT_IN_TABLE", "unknown")]
    fn taxonomy_is_fixed(#[case] kind: &str, #[case] expected: &str) {
        assert_eq!(categorise(kind), expected);
    }
}
