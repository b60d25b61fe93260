use crate::models::ViewLabel;

/// Modifier chips offered while refining a chosen style.
pub const MODIFIER_CHIPS: &[&str] = &[
    "in a jet black color",
    "in a warm honey blonde",
    "with soft curtain bangs",
    "with subtle face-framing highlights",
    "with extra volume at the crown",
    "with a sleek straight finish",
];

pub fn build_angle_prompt(refined_prompt: &str, view: ViewLabel) -> String {
    let framing = match view {
        ViewLabel::Side => "a side profile",
        ViewLabel::Angled => "a three-quarter angle",
        ViewLabel::Back => "directly behind",
    };
    format!("{}, shown from {} ({} view) with matching color, length and texture", refined_prompt.trim(), framing, view)
}

/// Appends `modifier` to `prompt` unless it is already present (case-insensitive).
pub fn apply_modifier(prompt: &str, modifier: &str) -> String {
    let modifier = modifier.trim();
    let prompt = prompt.trim_end();
    if modifier.is_empty() || prompt.to_lowercase().contains(&modifier.to_lowercase()) {
        return prompt.to_string();
    }
    if prompt.is_empty() {
        modifier.to_string()
    } else {
        format!("{}, {}", prompt, modifier)
    }
}
