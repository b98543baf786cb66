#[derive(Debug, Clone, Default)]
pub struct ListModelsQuery {
    pub page_size: Option<u32>,
    pub page_token: Option<String>,
}
