use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    /// Bypass every cached copy and go to the origin
    #[serde(default)]
    pub refresh: bool,
}
