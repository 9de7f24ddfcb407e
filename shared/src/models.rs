//! Shared data models.

use serde::{Deserialize, Deserializer, Serialize};

/// Health profile fields that ground the assistant's answers.
///
/// Every field is optional; blank strings from untouched form inputs are
/// treated the same as missing values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    #[serde(default, deserialize_with = "loose_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub age: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub weight: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub height: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub goal: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub diet_preference: Option<String>,
    #[serde(default, deserialize_with = "loose_list")]
    pub health_issues: Vec<String>,
    #[serde(default, deserialize_with = "loose_list")]
    pub allergies: Vec<String>,
}

/// Chat request payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub user_query: String,
    #[serde(default)]
    pub user_data: UserContext,
}

/// A web citation attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub uri: String,
    pub title: String,
}

/// Chat response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub sources: Vec<Source>,
}

impl ChatResponse {
    /// Fallback body returned when the assistant could not answer.
    pub fn fallback(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            sources: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl Loose {
    fn into_text(self) -> Option<String> {
        let text = match self {
            Loose::Text(s) => s,
            Loose::Number(n) => n.to_string(),
            Loose::Bool(b) => b.to_string(),
        };
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Accept strings or numbers; blank strings and `null` become `None`.
fn loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Loose>::deserialize(deserializer)?.and_then(Loose::into_text))
}

/// Accept a list, a single comma-separated string, or `null`.
fn loose_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrText {
        List(Vec<Option<Loose>>),
        Text(String),
    }

    let items = match Option::<ListOrText>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(ListOrText::List(items)) => items
            .into_iter()
            .flatten()
            .filter_map(Loose::into_text)
            .collect(),
        Some(ListOrText::Text(text)) => text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    };
    Ok(items)
}
