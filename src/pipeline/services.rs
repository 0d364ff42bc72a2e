use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// Resolved job configuration. Credentials inside `target` are already decrypted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Publishing target settings, passed through to the publishing service.
    #[serde(default)]
    pub target: serde_json::Value,
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn enabled_by_default() -> bool {
    true
}

/// Job parameters extracted from the queue entry payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub topic: String,
    pub target_word_count: Option<u32>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub tone: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub title: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Content {
    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub featured: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assets {
    pub items: Vec<Asset>,
}

/// Where the publishing service put the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Published {
    pub external_id: String,
    pub url: String,
}

/// Text generation. Must tolerate being called again for the same entry on retry.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate_structure(&self, params: &GenerationParams) -> Result<Structure, JobError>;

    async fn generate_content(
        &self,
        structure: &Structure,
        params: &GenerationParams,
    ) -> Result<Content, JobError>;
}

#[async_trait]
pub trait AssetService: Send + Sync {
    async fn generate_assets(&self, content: &Content) -> Result<Assets, JobError>;
}

#[async_trait]
pub trait PublishingService: Send + Sync {
    async fn publish(
        &self,
        content: &Content,
        assets: &Assets,
        target: &serde_json::Value,
    ) -> Result<Published, JobError>;
}

#[async_trait]
pub trait ConfigurationProvider: Send + Sync {
    async fn get_configuration(&self, configuration_id: Uuid) -> Result<Configuration, JobError>;
}

/// The concrete collaborator set a runner is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub generation: Arc<dyn GenerationService>,
    pub assets: Arc<dyn AssetService>,
    pub publishing: Arc<dyn PublishingService>,
    pub configurations: Arc<dyn ConfigurationProvider>,
}
