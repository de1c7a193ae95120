//! Structured recipe model produced by the extract stage.
//!
//! The model only fixes the shape of the data. Field values come straight from
//! the language model and are not interpreted.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use super::StageError;

/// A single ingredient line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(
        default,
        alias = "amount",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity: Option<String>,
}

/// Ingredients under an optional heading ("For the dough").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientGroup {
    #[serde(
        default,
        alias = "title",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub group_title: Option<String>,
    #[serde(default, alias = "items")]
    pub ingredients: Vec<Ingredient>,
}

/// Nutrition values per serving, as written by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nutrition {
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub calories: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub protein: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub carbs: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub fat: Option<String>,
}

impl Nutrition {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calories.is_none() && self.protein.is_none() && self.carbs.is_none() && self.fat.is_none()
    }
}

/// Structured recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub servings: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub prep_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub cook_time: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub ingredients: Vec<IngredientGroup>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrition: Option<Nutrition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Wall-clock time of the extraction call, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<u64>,
}

impl Recipe {
    /// Checks the minimum shape a recipe must have to be published.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Schema`] naming the first problem found.
    pub fn validate(&self) -> Result<(), StageError> {
        if self.title.trim().is_empty() {
            return Err(StageError::Schema("title is empty".to_string()));
        }
        if self.ingredients.is_empty() {
            return Err(StageError::Schema("no ingredient groups".to_string()));
        }
        for (index, group) in self.ingredients.iter().enumerate() {
            if group.ingredients.is_empty() {
                return Err(StageError::Schema(format!(
                    "ingredient group {} is empty",
                    index + 1
                )));
            }
            if group.ingredients.iter().any(|i| i.name.trim().is_empty()) {
                return Err(StageError::Schema(format!(
                    "ingredient group {} has an unnamed ingredient",
                    index + 1
                )));
            }
        }
        Ok(())
    }

    /// Total ingredient lines across all groups.
    #[must_use]
    pub fn ingredient_count(&self) -> usize {
        self.ingredients.iter().map(|g| g.ingredients.len()).sum()
    }
}

/// Decodes and validates a model reply.
///
/// Code fences and chatter around the JSON object are tolerated; empty
/// nutrition blocks are dropped.
///
/// # Errors
///
/// [`StageError::Malformed`] when no recipe object can be decoded and
/// [`StageError::Schema`] when it decodes but fails validation.
pub fn parse_model_output(raw: &str, service: &str) -> Result<Recipe, StageError> {
    let body = json_object_slice(raw).ok_or_else(|| StageError::Malformed {
        service: service.to_string(),
        message: "reply contains no JSON object".to_string(),
    })?;

    let mut recipe: Recipe =
        serde_json::from_str(body).map_err(|e| StageError::Malformed {
            service: service.to_string(),
            message: e.to_string(),
        })?;

    if recipe.nutrition.as_ref().is_some_and(Nutrition::is_empty) {
        recipe.nutrition = None;
    }
    recipe.validate()?;
    Ok(recipe)
}

fn json_object_slice(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// JSON schema handed to backends that support constrained output.
#[must_use]
pub fn recipe_json_schema() -> Value {
    let text = json!({ "type": ["string", "null"] });
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "servings": text,
            "prep_time": text,
            "cook_time": text,
            "categories": { "type": "array", "items": { "type": "string" } },
            "ingredients": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "group_title": text,
                        "ingredients": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": { "type": "string" },
                                    "quantity": text
                                },
                                "required": ["name"]
                            }
                        }
                    },
                    "required": ["ingredients"]
                }
            },
            "steps": { "type": "array", "items": { "type": "string" } },
            "notes": { "type": "array", "items": { "type": "string" } },
            "nutrition": {
                "type": ["object", "null"],
                "properties": {
                    "calories": text,
                    "protein": text,
                    "carbs": text,
                    "fat": text
                }
            }
        },
        "required": ["title", "ingredients", "steps"]
    })
}

/// Accepts strings, numbers or null; blank strings become `None`.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

/// Accepts a list of strings, a single string, or null.
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) if s.trim().is_empty() => Vec::new(),
        Some(Value::String(s)) => vec![s],
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(other) => vec![other.to_string()],
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "title": "Protein Pancakes",
        "servings": 2,
        "categories": ["Breakfast", "warm"],
        "ingredients": [
            {"group_title": "Teig", "ingredients": [
                {"name": "Haferflocken", "quantity": "80g"},
                {"name": "Ei", "quantity": 2}
            ]}
        ],
        "steps": ["Mix everything.", "Fry in a pan."],
        "notes": "Serve warm",
        "nutrition": {"calories": 420, "protein": "32"}
    }"#;

    #[test]
    fn test_parse_valid_recipe_with_lenient_fields() {
        let recipe = parse_model_output(VALID, "ollama").unwrap();
        assert_eq!(recipe.title, "Protein Pancakes");
        assert_eq!(recipe.servings.as_deref(), Some("2"));
        assert_eq!(recipe.ingredients[0].ingredients[1].quantity.as_deref(), Some("2"));
        assert_eq!(recipe.notes, vec!["Serve warm".to_string()]);
        assert_eq!(
            recipe.nutrition.as_ref().unwrap().calories.as_deref(),
            Some("420")
        );
        assert_eq!(recipe.ingredient_count(), 2);
    }

    #[test]
    fn test_parse_strips_code_fences() {
        let fenced = format!("Here you go:\n```json\n{VALID}\n```");
        assert!(parse_model_output(&fenced, "gemini").is_ok());
    }

    #[test]
    fn test_parse_accepts_alias_field_names() {
        let raw = r#"{"title": "Salad", "ingredients": [
            {"title": "Zutaten", "items": [{"name": "Gurke", "amount": "1"}]}
        ], "steps": []}"#;
        let recipe = parse_model_output(raw, "lmstudio").unwrap();
        assert_eq!(recipe.ingredients[0].group_title.as_deref(), Some("Zutaten"));
        assert_eq!(recipe.ingredients[0].ingredients[0].quantity.as_deref(), Some("1"));
    }

    #[test]
    fn test_parse_drops_empty_nutrition() {
        let raw = r#"{"title": "Tea", "ingredients": [{"ingredients": [{"name": "Tea"}]}],
            "steps": [], "nutrition": {"calories": null}}"#;
        assert!(parse_model_output(raw, "ollama").unwrap().nutrition.is_none());
    }

    #[test]
    fn test_parse_without_json_is_malformed() {
        let err = parse_model_output("I cannot help with that.", "ollama").unwrap_err();
        assert!(matches!(err, StageError::Malformed { .. }));
    }

    #[test]
    fn test_parse_wrong_shape_is_malformed() {
        let err = parse_model_output(r#"{"name": "x"}"#, "ollama").unwrap_err();
        assert!(matches!(err, StageError::Malformed { .. }));
    }

    #[test]
    fn test_validate_rejects_missing_ingredients() {
        let raw = r#"{"title": "Water", "ingredients": [], "steps": ["Pour."]}"#;
        let err = parse_model_output(raw, "ollama").unwrap_err();
        assert!(matches!(err, StageError::Schema(msg) if msg.contains("ingredient")));
    }

    #[test]
    fn test_validate_rejects_blank_title() {
        let raw = r#"{"title": "  ", "ingredients": [{"ingredients": [{"name": "x"}]}]}"#;
        let err = parse_model_output(raw, "ollama").unwrap_err();
        assert!(matches!(err, StageError::Schema(msg) if msg.contains("title")));
    }

    #[test]
    fn test_schema_requires_title() {
        let schema = recipe_json_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "title"));
    }
}
