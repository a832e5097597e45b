use crate::domain::error::{AppError, Result};
use crate::domain::event_context::{FetchedContext, UserRequest};

pub const NO_RELEVANT_DATA_MESSAGE: &str = "The AI agent did not find any specific data in the database for your request. Please try a more specific event name or topic.";

/// Final prompt grounded in the fetched rows. Refuses to build one without data
/// so the model is never asked to invent an event.
pub fn compose_description_prompt(
    request: &UserRequest,
    context: &FetchedContext,
) -> Result<String> {
    if !context.has_data() {
        return Err(AppError::NoRelevantData(NO_RELEVANT_DATA_MESSAGE.to_string()));
    }

    let mut summary =
        String::from("The following relevant data was retrieved from the database:\n\n");
    for (table, rows) in context.non_empty_tables() {
        let json = serde_json::to_string_pretty(rows)
            .map_err(|e| AppError::ParseError(format!("Failed to encode rows: {}", e)))?;
        summary.push_str(&format!("### Data from table `{}`:\n{}\n\n", table, json));
    }

    Ok(format!(
        r#"You are a professional event copywriter. Your task is to write a compelling event description based on structured data.

**CRITICAL INSTRUCTION:** You MUST use the provided "DATABASE CONTEXT" to write your response. Do not invent details. Your description MUST be based on the data provided below.

**DATABASE CONTEXT:**
{summary}
**USER REQUEST:** "{request}"

**TASK:**
Using only the data from the DATABASE CONTEXT, write a compelling, professional event description of 150-300 words. Your description must:
1. Directly reference specific details from the context, such as the event's title, location, date, key speakers, or session topics.
2. Maintain an engaging and persuasive tone.
3. End with a clear call-to-action.
4. The final output must be ONLY the event description text, with no headings, notes, or metadata."#,
        summary = summary.trim_end(),
        request = request.as_str().trim(),
    ))
}

/// Degraded prompt used when the caller opts out of database context.
pub fn build_fallback_prompt(request: &UserRequest) -> String {
    format!(
        r#"You are an expert event copywriter. Create a compelling, professional event description based on this prompt: "{}".
The description should be:
- Engaging and professional
- 150-300 words
- Include key event highlights
- Have a clear call-to-action
- Be suitable for marketing materials
Please provide only the event description without any additional formatting or explanations."#,
        request.as_str().trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: serde_json::Value) -> Vec<crate::domain::event_context::Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_empty_context_is_no_relevant_data() {
        let request = UserRequest::new("RustConf").unwrap();
        let mut context = FetchedContext::new();
        context.append("events", vec![]);

        match compose_description_prompt(&request, &context) {
            Err(AppError::NoRelevantData(msg)) => assert_eq!(msg, NO_RELEVANT_DATA_MESSAGE),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_prompt_sections_only_for_tables_with_rows() {
        let request = UserRequest::new("Write about RustConf").unwrap();
        let mut context = FetchedContext::new();
        context.append("events", rows(json!([{"title": "RustConf", "location": "Montreal"}])));
        context.append("sponsors", vec![]);

        let prompt = compose_description_prompt(&request, &context).unwrap();

        assert!(prompt.contains("### Data from table `events`:"));
        assert!(prompt.contains("\"location\": \"Montreal\""));
        assert!(!prompt.contains("`sponsors`"));
        assert!(prompt.contains("**USER REQUEST:** \"Write about RustConf\""));
        assert!(prompt.contains("150-300 words"));
        assert!(prompt.contains("call-to-action"));
        assert!(prompt.contains("ONLY the event description text"));
    }

    #[test]
    fn test_fallback_prompt_has_no_context() {
        let request = UserRequest::new("A Rust meetup in Lisbon").unwrap();
        let prompt = build_fallback_prompt(&request);
        assert!(prompt.contains("\"A Rust meetup in Lisbon\""));
        assert!(!prompt.contains("DATABASE CONTEXT"));
    }
}
