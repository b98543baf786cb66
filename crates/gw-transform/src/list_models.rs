//! Google `ListModels` response → OpenAI model list.

use gw_protocol::google::list_models::response::ListModelsResponse as GoogleListModelsResponse;
use gw_protocol::openai::list_models::response::{ListModelsResponse, OpenAIModel};

pub fn translate_list_models(response: GoogleListModelsResponse) -> ListModelsResponse {
    let data = response
        .models
        .into_iter()
        .map(|model| OpenAIModel {
            id: model
                .name
                .strip_prefix("models/")
                .unwrap_or(&model.name)
                .to_string(),
            object: "model",
            owned_by: "google",
        })
        .collect();

    ListModelsResponse {
        object: "list",
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_protocol::google::list_models::response::Model as GoogleModel;

    #[test]
    fn strips_models_prefix() {
        let response = GoogleListModelsResponse {
            models: vec![GoogleModel {
                name: "models/gemini-1.5-pro-latest".to_string(),
                display_name: Some("Gemini 1.5 Pro".to_string()),
            }],
            next_page_token: None,
        };

        let translated = translate_list_models(response);
        assert_eq!(translated.object, "list");
        assert_eq!(translated.data[0].id, "gemini-1.5-pro-latest");
        assert_eq!(translated.data[0].owned_by, "google");
    }
}
