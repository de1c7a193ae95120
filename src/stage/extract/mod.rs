//! Extract-stage executors backed by language models.
//!
//! Every backend sends the same instructions and the cleaned caption, asks
//! for JSON output, and validates the reply with
//! [`parse_model_output`](super::recipe::parse_model_output). A reply that
//! cannot be decoded or validated is a permanent failure for the record.

mod gemini;
mod lmstudio;
mod ollama;

pub use gemini::{DEFAULT_GEMINI_URL, GeminiExtractor};
pub use lmstudio::LmStudioExtractor;
pub use ollama::OllamaExtractor;

use super::caption::{CaptionArtifact, clean_caption};
use super::recipe::Recipe;

/// Instructions sent ahead of every caption.
pub(crate) const SYSTEM_PROMPT: &str = "\
You are a precise recipe parser that converts social media captions into structured JSON.
Reply with a single JSON object that matches the provided schema and nothing else.

1. title: a clear title for the dish. Keep the original language of the caption.
2. categories: meal type (breakfast, main course, dessert, snack, drink), temperature (warm, cold) and optionally a diet style (vegan, high-protein).
3. servings, prep_time, cook_time: only when the caption mentions them.
4. ingredients: group them logically (\"For the dough\", \"For the filling\"). Without natural groups use one group. Put the full amount (\"300g\", \"1/2\", \"1 tsp\") into quantity.
5. steps: the instructions as complete sentences, one per entry.
6. nutrition: calories in kcal, protein, carbs and fat in g, only when the caption lists them. Never invent values; omit the field otherwise.
7. notes: any extra tips.";

/// Builds the user message for a caption.
pub(crate) fn user_prompt(caption: &CaptionArtifact) -> String {
    format!(
        "Here is the caption text:\n\n---\n{}\n---",
        clean_caption(&caption.text)
    )
}

/// Attaches provenance that the model is not asked to produce.
pub(crate) fn attach_source(mut recipe: Recipe, caption: &CaptionArtifact, source_url: &str) -> Recipe {
    recipe.source_url = Some(source_url.to_string());
    if recipe.thumbnail_url.is_none() {
        recipe.thumbnail_url.clone_from(&caption.thumbnail_url);
    }
    recipe
}
