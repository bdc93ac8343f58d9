//! Prompt rendering for knowledge base chat.
//!
//! Templates use `{{ name }}` placeholders. `context` and `question` are
//! filled in; any other placeholder is left as written.

use crate::llm::{ChatMessage, ChatRequest, GenerationRequest};

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

/// History turns followed by one user message built from the template.
pub fn build_chat_request(request: &GenerationRequest, template: &str) -> ChatRequest {
    let prompt = render_template(
        template,
        &[
            ("context", request.grounding_context.as_str()),
            ("question", request.question.as_str()),
        ],
    );

    let mut messages = Vec::with_capacity(request.history.len() + 1);
    messages.extend(request.history.iter().cloned());
    messages.push(ChatMessage::user(prompt));

    ChatRequest::new(messages, request.parameters.clone())
}
