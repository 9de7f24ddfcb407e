//! Turns a raw `generateContent` response into a [`ChatResponse`].

use crate::gemini::{GenerateContentResponse, UpstreamError};
use crate::models::{ChatResponse, Source};

/// Extract the first candidate's text and its complete web citations.
///
/// A missing candidate, missing text part, or blank text is a
/// [`UpstreamError::Shape`] so the caller retries instead of returning an
/// empty answer.
pub fn normalize(response: GenerateContentResponse) -> Result<ChatResponse, UpstreamError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| UpstreamError::Shape("no candidates".to_string()))?;

    let finish_reason = candidate.finish_reason.unwrap_or_default();

    let text = candidate
        .content
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| {
            if finish_reason.is_empty() {
                UpstreamError::Shape("candidate has no text".to_string())
            } else {
                UpstreamError::Shape(format!("candidate has no text (finish reason {})", finish_reason))
            }
        })?;

    let sources = candidate
        .grounding_metadata
        .map(|metadata| metadata.grounding_attributions)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|attribution| {
            let web = attribution.web?;
            let uri = web.uri.filter(|uri| !uri.is_empty())?;
            let title = web.title.filter(|title| !title.is_empty())?;
            Some(Source { uri, title })
        })
        .collect();

    Ok(ChatResponse { text, sources })
}
