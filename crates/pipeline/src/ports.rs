//! Port traits for the remote collaborators the shell forwards commands to.
//!
//! The core never performs I/O itself. Infrastructure crates implement these
//! traits; the shell holds them as `Arc<dyn ..>` and passes them the artefacts
//! produced here: pipeline wire blocks and [`SiteId`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::addressing::{SiteId, SiteRole};
use crate::errors::ServiceError;
use crate::identifiers::{BlockId, BranchName, DatabaseName, FileUuid, KeyPrefix};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Arguments of a branch creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchCreate {
    pub name: BranchName,
    pub tag: String,
    pub level: u8,
    /// Encoded pipeline container, or `None` for a branch without stages.
    pub pipeline: Option<Vec<u8>>,
}

/// One object on one object-storage site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectAddress {
    pub file: FileUuid,
    pub block: BlockId,
    /// Always an OBJECT-STORAGE site.
    pub site: SiteId,
}

/// Network endpoint of a site, as registered in the address table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteEndpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for SiteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// The stream-analytics branch service.
#[async_trait]
pub trait BranchService: Send + Sync {
    /// Registers a branch and its processing pipeline.
    async fn create_branch(&self, request: BranchCreate) -> Result<(), ServiceError>;

    /// Publishes one record line to a branch.
    async fn publish(
        &self,
        name: &BranchName,
        tag: &str,
        level: u8,
        data: &[u8],
    ) -> Result<(), ServiceError>;

    /// Dumps the branch operator result held by one branch-publisher site.
    async fn dump_bor(&self, name: &BranchName, site: SiteId) -> Result<String, ServiceError>;

    /// Evaluates a search expression against an indexed branch on one site.
    async fn search(
        &self,
        name: &BranchName,
        site: SiteId,
        database: &DatabaseName,
        prefix: &KeyPrefix,
        expression: &str,
    ) -> Result<Vec<String>, ServiceError>;
}

/// Cluster membership and file-system status, served by the metadata and
/// directory services.
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Human-readable status of every site with `role`.
    async fn cluster_status(&self, role: SiteRole) -> Result<String, ServiceError>;

    async fn active_sites(&self, role: SiteRole) -> Result<Vec<SiteId>, ServiceError>;

    async fn active_site_count(&self, role: SiteRole) -> Result<u32, ServiceError>;

    async fn offline(&self, site: SiteId, force: bool) -> Result<(), ServiceError>;

    async fn online(&self, site: SiteId) -> Result<(), ServiceError>;

    /// Adds a site to the address table.
    async fn add_site(&self, endpoint: SiteEndpoint, site: SiteId) -> Result<(), ServiceError>;

    /// Removes a site from the address table.
    async fn remove_site(&self, endpoint: SiteEndpoint, site: SiteId)
        -> Result<(), ServiceError>;

    /// Shuts down a site entry left in an error state.
    async fn shutdown(&self, site: SiteId) -> Result<(), ServiceError>;

    /// File-system wide statistics.
    async fn statfs(&self) -> Result<String, ServiceError>;
}

/// Object-storage sites.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Sites holding a copy of the object.
    async fn query(&self, file: FileUuid, block: BlockId) -> Result<Vec<SiteId>, ServiceError>;

    async fn write(&self, object: ObjectAddress, offset: u64, data: &[u8])
        -> Result<(), ServiceError>;

    async fn read(
        &self,
        object: ObjectAddress,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, ServiceError>;

    async fn delete(&self, object: ObjectAddress) -> Result<(), ServiceError>;

    async fn truncate(&self, object: ObjectAddress, length: u64) -> Result<(), ServiceError>;
}
