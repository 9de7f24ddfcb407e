//! System instruction builder for the nutrition assistant.

use crate::models::UserContext;

/// Placeholder for absent scalar profile fields.
pub const NOT_AVAILABLE: &str = "N/A";
/// Placeholder for an absent goal.
pub const DEFAULT_GOAL: &str = "General Health";
/// Placeholder for empty list fields.
pub const NONE: &str = "None";

/// Instruction and user turn, kept apart for the upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system_instruction: String,
    pub user_query: String,
}

impl Prompt {
    /// Compose the prompt for `query` grounded in `user`.
    pub fn build(query: &str, user: &UserContext) -> Self {
        Self {
            system_instruction: system_instruction(user),
            user_query: query.trim().to_string(),
        }
    }
}

fn or_fallback<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
}

fn join_or_none(items: &[String]) -> String {
    let joined = items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        NONE.to_string()
    } else {
        joined
    }
}

/// Render the fixed persona plus the user's profile.
pub fn system_instruction(user: &UserContext) -> String {
    format!(
        r#"You are NutriMate, a friendly and knowledgeable nutrition and wellness assistant.
Give practical, evidence-based advice on food, meals, recipes and healthy habits.
Prefer foods and dishes common in the user's region and respect their diet preference.
Never recommend anything containing the user's allergens, and point out allergen risks when relevant.
Take the user's health issues into account. You are not a doctor: for diagnosis, medication or
serious symptoms, tell the user to consult a qualified healthcare professional.
Keep answers concise and well structured.

User profile:
- Name: {name}
- Age: {age}
- Weight: {weight}
- Height: {height}
- Goal: {goal}
- Region: {region}
- Diet preference: {diet}
- Health issues: {issues}
- Allergies: {allergies}"#,
        name = or_fallback(&user.name, NOT_AVAILABLE),
        age = or_fallback(&user.age, NOT_AVAILABLE),
        weight = or_fallback(&user.weight, NOT_AVAILABLE),
        height = or_fallback(&user.height, NOT_AVAILABLE),
        goal = or_fallback(&user.goal, DEFAULT_GOAL),
        region = or_fallback(&user.region, NOT_AVAILABLE),
        diet = or_fallback(&user.diet_preference, NOT_AVAILABLE),
        issues = join_or_none(&user.health_issues),
        allergies = join_or_none(&user.allergies),
    )
}
