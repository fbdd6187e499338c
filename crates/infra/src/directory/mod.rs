//! Entity status and partner scope collaborators

pub mod http_directory;
pub mod static_directory;

use std::sync::Arc;

pub use http_directory::HttpDirectory;
use perkgate_core::{EntityStatus, PartnerScope};
use perkgate_domain::DirectoryConfig;
pub use static_directory::StaticDirectory;

use crate::errors::InfraError;

/// Both collaborator ports, usually served by one directory
#[derive(Clone)]
pub struct Collaborators {
    pub entities: Arc<dyn EntityStatus>,
    pub partners: Arc<dyn PartnerScope>,
}

/// Build the collaborators named by the directory configuration
pub fn build_directory(config: &DirectoryConfig) -> Result<Collaborators, InfraError> {
    match config {
        DirectoryConfig::Static { active_entities, partner_grants } => {
            let directory = Arc::new(StaticDirectory::new(active_entities, partner_grants));
            Ok(Collaborators { entities: directory.clone(), partners: directory })
        }
        DirectoryConfig::Http { base_url, timeout } => {
            let directory = Arc::new(HttpDirectory::new(base_url, *timeout)?);
            Ok(Collaborators { entities: directory.clone(), partners: directory })
        }
    }
}
