//! Retry feedback for the extraction producer.

use crate::validator::ValidationError;

/// Render validation errors as a numbered correction list for a retried
/// Extract call.
pub fn format_feedback(errors: &[ValidationError]) -> String {
    if errors.is_empty() {
        return String::new();
    }

    let mut out = format!(
        "The previous knowledge record was rejected with {} problem(s). \
         Return a corrected record that fixes all of them:\n",
        errors.len()
    );
    for (i, error) in errors.iter().enumerate() {
        out.push_str(&format!("{}. {error}\n", i + 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_errors_produce_no_feedback() {
        assert_eq!(format_feedback(&[]), "");
    }

    #[test]
    fn feedback_lists_every_error() {
        let errors = vec![
            ValidationError::DanglingReference {
                chain: "Main argument".into(),
                id: "KP9".into(),
            },
            ValidationError::MissingEvidenceAnchor { id: "KP2".into() },
        ];
        let text = format_feedback(&errors);
        assert!(text.contains("2 problem(s)"));
        assert!(text.contains("1. logic chain 'Main argument': argument_flow references unknown key point 'KP9'"));
        assert!(text.contains("2. key point 'KP2': evidence_anchor is missing"));
    }
}
