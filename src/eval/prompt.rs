//! Prompt text for evaluation heads.

use super::ResponseFormat;

/// Delimiter that opens the answer section of a chain-of-thought response.
pub const RESULT_DELIMITER: &str = "### Result";

const THOUGHTS_DELIMITER: &str = "### Thoughts";

pub fn classification_system(context: &str, options: &str, format: ResponseFormat) -> String {
    match format {
        ResponseFormat::Direct => format!(
            r#"You are master of classification who can classify any text according to the user's instructions.
{context}

These are the labels(KEY: DESCRIPTION) you can use:
{options}

Only output one of these label keys."#
        ),
        ResponseFormat::ChainOfThought => format!(
            r#"You are master of classification who can classify any text according to the user's instructions.
When user give you the text to classify, you do step-by-step thinking within 3 sentences and give a final result.

When doing step-by-step thinking, you must consider the following:
{context}

These are the labels(KEY: DESCRIPTION) you can use:
{options}

Your response must strictly follow this format:
{THOUGHTS_DELIMITER}
<STEP_BY_STEP_THOUGHTS>
{RESULT_DELIMITER}
<SINGLE_LABEL_KEY>"#
        ),
    }
}

pub fn grading_system(context: &str, from: i64, to: i64, format: ResponseFormat) -> String {
    match format {
        ResponseFormat::Direct => format!(
            r#"You are master of grading who can grade any text according to the user's instructions.
{context}

Grade the text with a single integer between {from} and {to}, inclusive. Only output the number."#
        ),
        ResponseFormat::ChainOfThought => format!(
            r#"You are master of grading who can grade any text according to the user's instructions.
When user give you the text to grade, you do step-by-step thinking within 5 sentences and give a final result.

When doing step-by-step thinking, you must consider the following:
{context}

The final result must be a single integer between {from} and {to}, inclusive.

Your response must strictly follow this format:
{THOUGHTS_DELIMITER}
<STEP_BY_STEP_THOUGHTS>
{RESULT_DELIMITER}
<NUMBER>"#
        ),
    }
}

/// Final user message carrying the sample and optional free-text context.
pub fn final_message(sample: &str, context: Option<&str>) -> String {
    match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!("Info about the text: {context}\n\nText: {sample}"),
        None => format!("Text: {sample}"),
    }
}

/// Text after the last result delimiter, trimmed.
///
/// Responses without the delimiter are returned whole.
pub fn result_section(response: &str) -> &str {
    response
        .rsplit_once(RESULT_DELIMITER)
        .map_or(response, |(_, result)| result)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_section_uses_last_delimiter() {
        let response = "### Thoughts\nThe ### Result could be A.\n### Result\nB: negative\n";
        assert_eq!(result_section(response), "B: negative");
        assert_eq!(result_section("  A \n"), "A");
    }

    #[test]
    fn test_final_message_context() {
        assert_eq!(final_message("hello", None), "Text: hello");
        assert_eq!(final_message("hello", Some("  ")), "Text: hello");
        assert_eq!(
            final_message("hello", Some("a greeting")),
            "Info about the text: a greeting\n\nText: hello"
        );
    }

    #[test]
    fn test_chain_of_thought_prompts_carry_format() {
        let system = classification_system("be strict", "A: good\nB: bad", ResponseFormat::ChainOfThought);
        assert!(system.contains("within 3 sentences"));
        assert!(system.contains("### Thoughts\n<STEP_BY_STEP_THOUGHTS>\n### Result"));
        assert!(system.contains("A: good\nB: bad"));

        let system = grading_system("be strict", 1, 5, ResponseFormat::ChainOfThought);
        assert!(system.contains("within 5 sentences"));
        assert!(system.contains("between 1 and 5"));
    }
}
