//! In-process loopback runtime.
//!
//! Keeps the cluster's address table, objects, and branches in memory and
//! answers every port call locally. Pipeline wire blocks handed to
//! [`BranchService::create_branch`] are parsed exactly as the branch service
//! would parse them, so malformed blocks are rejected here too.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use pipeline::{
    BlockId, BranchCreate, BranchName, BranchService, DatabaseName, FileUuid, KeyPrefix,
    MetadataService, ObjectAddress, ObjectStore, OperatorKind, PipelineContainer, ServiceError,
    SiteEndpoint, SiteId, SiteRole, Timestamp,
};

/// Largest object the loopback store will hold, in bytes.
pub const MAX_OBJECT_SIZE: u64 = 64 << 20;

/// Liveness of a registered site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteState {
    Online,
    Offline,
}

/// One journaled port call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub at: Timestamp,
    pub call: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone)]
struct SiteEntry {
    endpoint: SiteEndpoint,
    state: SiteState,
}

#[derive(Debug, Clone)]
struct Record {
    site: SiteId,
    data: String,
}

#[derive(Debug, Clone)]
struct Branch {
    tag: String,
    level: u8,
    stages: PipelineContainer,
    records: Vec<Record>,
}

type ObjectKey = (SiteId, FileUuid, BlockId);

#[derive(Debug, Default)]
struct State {
    sites: BTreeMap<SiteId, SiteEntry>,
    objects: HashMap<ObjectKey, Vec<u8>>,
    branches: BTreeMap<BranchName, Branch>,
    journal: Vec<CallRecord>,
}

impl State {
    fn journal(&mut self, call: &'static str, detail: String) {
        info!(call, %detail, "loopback call");
        self.journal.push(CallRecord {
            at: Timestamp::now(),
            call,
            detail,
        });
    }

    fn site(&self, site: SiteId) -> Result<&SiteEntry, ServiceError> {
        self.sites
            .get(&site)
            .ok_or_else(|| ServiceError::NotFound(format!("site {site}")))
    }

    fn site_mut(&mut self, site: SiteId) -> Result<&mut SiteEntry, ServiceError> {
        self.sites
            .get_mut(&site)
            .ok_or_else(|| ServiceError::NotFound(format!("site {site}")))
    }

    fn branch(&self, name: &BranchName) -> Result<&Branch, ServiceError> {
        self.branches
            .get(name)
            .ok_or_else(|| ServiceError::NotFound(format!("branch {name}")))
    }

    fn online(&self, role: SiteRole) -> Vec<SiteId> {
        self.sites
            .iter()
            .filter(|(id, entry)| id.role() == Some(role) && entry.state == SiteState::Online)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Fails unless `site` is a registered, online site with `role`.
    fn require_online(&self, site: SiteId, role: SiteRole) -> Result<(), ServiceError> {
        if site.role() != Some(role) {
            return Err(ServiceError::InvalidArgument(format!(
                "site {site} is not a {role} site"
            )));
        }
        match self.site(site)?.state {
            SiteState::Online => Ok(()),
            SiteState::Offline => Err(ServiceError::InvalidArgument(format!(
                "site {site} is offline"
            ))),
        }
    }

    fn object(&self, object: &ObjectAddress) -> Result<&Vec<u8>, ServiceError> {
        self.objects
            .get(&(object.site, object.file, object.block))
            .ok_or_else(|| not_found(object))
    }
}

fn not_found(object: &ObjectAddress) -> ServiceError {
    ServiceError::NotFound(format!(
        "object {}:{} on {}",
        object.file, object.block, object.site
    ))
}

fn out_of_range(what: &str, value: u64) -> ServiceError {
    ServiceError::InvalidArgument(format!(
        "{what} {value} exceeds the {MAX_OBJECT_SIZE}B object limit"
    ))
}

/// Converts an object position to an index, refusing anything past
/// [`MAX_OBJECT_SIZE`].
fn object_extent(what: &str, value: u64) -> Result<usize, ServiceError> {
    if value > MAX_OBJECT_SIZE {
        return Err(out_of_range(what, value));
    }
    usize::try_from(value).map_err(|_| out_of_range(what, value))
}

/// In-memory implementation of every runtime port.
#[derive(Debug, Default)]
pub struct LoopbackRuntime {
    state: Mutex<State>,
}

impl LoopbackRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `count` online sites of `role`, ordinals `0..count`, on
    /// consecutive ports starting at `base_port`.
    pub fn with_sites(self, role: SiteRole, count: u32, host: &str, base_port: u16) -> Self {
        {
            let mut state = self.lock();
            for ordinal in 0..count {
                let offset = u16::try_from(ordinal).unwrap_or(u16::MAX);
                let endpoint = SiteEndpoint {
                    host: host.to_string(),
                    port: base_port.saturating_add(offset),
                };
                state.sites.insert(
                    SiteId::new(role, u64::from(ordinal)),
                    SiteEntry {
                        endpoint,
                        state: SiteState::Online,
                    },
                );
            }
        }
        self
    }

    /// Every call served so far, oldest first.
    pub fn journal(&self) -> Vec<CallRecord> {
        self.lock().journal.clone()
    }

    /// Current state of a registered site.
    pub fn site_state(&self, site: SiteId) -> Option<SiteState> {
        self.lock().sites.get(&site).map(|e| e.state)
    }

    /// Stages a created branch was registered with.
    pub fn branch_stages(&self, name: &BranchName) -> Option<PipelineContainer> {
        self.lock().branches.get(name).map(|b| b.stages.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Branch service
// ---------------------------------------------------------------------------

#[async_trait]
impl BranchService for LoopbackRuntime {
    async fn create_branch(&self, request: BranchCreate) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.journal(
            "branch_create",
            format!(
                "{} tag={} level={} pipeline={}B",
                request.name,
                request.tag,
                request.level,
                request.pipeline.as_ref().map_or(0, Vec::len)
            ),
        );

        if state.branches.contains_key(&request.name) {
            return Err(ServiceError::InvalidArgument(format!(
                "branch {} already exists",
                request.name
            )));
        }
        let stages = match &request.pipeline {
            Some(blob) => PipelineContainer::from_wire_blob(blob)?,
            None => PipelineContainer::new(),
        };
        state.branches.insert(
            request.name,
            Branch {
                tag: request.tag,
                level: request.level,
                stages,
                records: Vec::new(),
            },
        );
        Ok(())
    }

    async fn publish(
        &self,
        name: &BranchName,
        tag: &str,
        level: u8,
        data: &[u8],
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.journal(
            "branch_publish",
            format!("{name} tag={tag} level={level} {}B", data.len()),
        );

        // Records are spread over the online publishers round-robin.
        let publishers = state.online(SiteRole::BranchPublisher);
        let branch = state
            .branches
            .get_mut(name)
            .ok_or_else(|| ServiceError::NotFound(format!("branch {name}")))?;
        let site = match publishers.len() {
            0 => SiteId::new(SiteRole::BranchPublisher, 0),
            n => publishers[branch.records.len() % n],
        };
        branch.records.push(Record {
            site,
            data: String::from_utf8_lossy(data).into_owned(),
        });
        Ok(())
    }

    async fn dump_bor(&self, name: &BranchName, site: SiteId) -> Result<String, ServiceError> {
        let mut state = self.lock();
        state.journal("branch_dumpbor", format!("{name} @ {site}"));
        state.require_online(site, SiteRole::BranchPublisher)?;

        let branch = state.branch(name)?;
        let held = branch.records.iter().filter(|r| r.site == site).count();
        let stages: Vec<&str> = branch.stages.iter().map(|s| s.kind().name()).collect();
        Ok(format!(
            "branch {name} (tag {}, level {}) @ {site}: {held} record(s), stages [{}]",
            branch.tag,
            branch.level,
            stages.join(", ")
        ))
    }

    async fn search(
        &self,
        name: &BranchName,
        site: SiteId,
        database: &DatabaseName,
        prefix: &KeyPrefix,
        expression: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let mut state = self.lock();
        state.journal(
            "branch_search",
            format!("{name} @ {site} {database}:{prefix} '{expression}'"),
        );
        state.require_online(site, SiteRole::BranchPublisher)?;

        let branch = state.branch(name)?;
        let schema = format!(";schema:{database}:{prefix}");
        let indexed = branch.stages.iter().any(|s| {
            s.kind() == OperatorKind::Indexer
                && s.parameters_str().is_some_and(|p| p.ends_with(&schema))
        });
        if !indexed {
            return Err(ServiceError::InvalidArgument(format!(
                "branch {name} has no index on {database}:{prefix}"
            )));
        }

        // Each `&`-joined term matches on its text after an optional `scope:` prefix.
        let terms: Vec<&str> = expression
            .split('&')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.split_once(':').map_or(t, |(_, rest)| rest))
            .collect();
        Ok(branch
            .records
            .iter()
            .filter(|r| r.site == site && terms.iter().all(|t| r.data.contains(t)))
            .map(|r| r.data.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Metadata service
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Statfs {
    sites: usize,
    online_sites: usize,
    objects: usize,
    object_bytes: usize,
    branches: usize,
}

#[async_trait]
impl MetadataService for LoopbackRuntime {
    async fn cluster_status(&self, role: SiteRole) -> Result<String, ServiceError> {
        let mut state = self.lock();
        state.journal("get_cluster", role.to_string());
        let lines: Vec<String> = state
            .sites
            .iter()
            .filter(|(id, _)| id.role() == Some(role))
            .map(|(id, entry)| format!("{id} {:?} {}", entry.state, entry.endpoint))
            .collect();
        Ok(lines.join("\n"))
    }

    async fn active_sites(&self, role: SiteRole) -> Result<Vec<SiteId>, ServiceError> {
        let mut state = self.lock();
        state.journal("active_site", role.to_string());
        Ok(state.online(role))
    }

    async fn active_site_count(&self, role: SiteRole) -> Result<u32, ServiceError> {
        let mut state = self.lock();
        state.journal("active_site_size", role.to_string());
        Ok(state.online(role).len() as u32)
    }

    async fn offline(&self, site: SiteId, force: bool) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.journal("offline", format!("{site} force={force}"));
        state.site_mut(site)?.state = SiteState::Offline;
        Ok(())
    }

    async fn online(&self, site: SiteId) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.journal("online", site.to_string());
        state.site_mut(site)?.state = SiteState::Online;
        Ok(())
    }

    async fn add_site(&self, endpoint: SiteEndpoint, site: SiteId) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.journal("addsite", format!("{site} at {endpoint}"));
        if state.sites.contains_key(&site) {
            return Err(ServiceError::InvalidArgument(format!(
                "site {site} already registered"
            )));
        }
        state.sites.insert(
            site,
            SiteEntry {
                endpoint,
                state: SiteState::Online,
            },
        );
        Ok(())
    }

    async fn remove_site(
        &self,
        endpoint: SiteEndpoint,
        site: SiteId,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.journal("rmvsite", format!("{site} at {endpoint}"));
        if state.site(site)?.endpoint != endpoint {
            return Err(ServiceError::InvalidArgument(format!(
                "site {site} is not registered at {endpoint}"
            )));
        }
        state.sites.remove(&site);
        Ok(())
    }

    async fn shutdown(&self, site: SiteId) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.journal("shutdown", site.to_string());
        state.site(site)?;
        state.sites.remove(&site);
        Ok(())
    }

    async fn statfs(&self) -> Result<String, ServiceError> {
        let mut state = self.lock();
        state.journal("statfs", String::new());
        let stats = Statfs {
            sites: state.sites.len(),
            online_sites: state
                .sites
                .values()
                .filter(|e| e.state == SiteState::Online)
                .count(),
            objects: state.objects.len(),
            object_bytes: state.objects.values().map(Vec::len).sum(),
            branches: state.branches.len(),
        };
        serde_json::to_string_pretty(&stats)
            .map_err(|e| ServiceError::InvalidArgument(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[async_trait]
impl ObjectStore for LoopbackRuntime {
    async fn query(&self, file: FileUuid, block: BlockId) -> Result<Vec<SiteId>, ServiceError> {
        let mut state = self.lock();
        state.journal("query_obj", format!("{file}:{block}"));
        let mut sites: Vec<SiteId> = state
            .objects
            .keys()
            .filter(|(_, f, b)| *f == file && *b == block)
            .map(|(site, _, _)| *site)
            .filter(|site| {
                state
                    .sites
                    .get(site)
                    .is_some_and(|e| e.state == SiteState::Online)
            })
            .collect();
        sites.sort();
        Ok(sites)
    }

    async fn write(
        &self,
        object: ObjectAddress,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.journal(
            "write_obj",
            format!(
                "{}:{} on {} offset={offset} {}B",
                object.file,
                object.block,
                object.site,
                data.len()
            ),
        );
        state.require_online(object.site, SiteRole::ObjectStorage)?;

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| out_of_range("offset", offset))?;
        let end = object_extent("offset", end)?;
        let start = end - data.len();
        let bytes = state
            .objects
            .entry((object.site, object.file, object.block))
            .or_default();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn read(
        &self,
        object: ObjectAddress,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, ServiceError> {
        let mut state = self.lock();
        state.journal(
            "read_obj",
            format!(
                "{}:{} on {} offset={offset} length={length}",
                object.file, object.block, object.site
            ),
        );
        state.require_online(object.site, SiteRole::ObjectStorage)?;

        let bytes = state.object(&object)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
        let end = start
            .saturating_add(usize::try_from(length).unwrap_or(usize::MAX))
            .min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    async fn delete(&self, object: ObjectAddress) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.journal(
            "del_obj",
            format!("{}:{} on {}", object.file, object.block, object.site),
        );
        state.require_online(object.site, SiteRole::ObjectStorage)?;
        state
            .objects
            .remove(&(object.site, object.file, object.block))
            .map(|_| ())
            .ok_or_else(|| not_found(&object))
    }

    async fn truncate(&self, object: ObjectAddress, length: u64) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.journal(
            "trunc_obj",
            format!(
                "{}:{} on {} length={length}",
                object.file, object.block, object.site
            ),
        );
        state.require_online(object.site, SiteRole::ObjectStorage)?;
        let length = object_extent("length", length)?;
        let bytes = state
            .objects
            .get_mut(&(object.site, object.file, object.block))
            .ok_or_else(|| not_found(&object))?;
        bytes.resize(length, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::compile;

    fn runtime() -> LoopbackRuntime {
        LoopbackRuntime::new()
            .with_sites(SiteRole::ObjectStorage, 2, "127.0.0.1", 9000)
            .with_sites(SiteRole::BranchPublisher, 2, "127.0.0.1", 9100)
    }

    fn osd(ordinal: u64) -> SiteId {
        SiteId::new(SiteRole::ObjectStorage, ordinal)
    }

    fn bp(ordinal: u64) -> SiteId {
        SiteId::new(SiteRole::BranchPublisher, ordinal)
    }

    fn object(site: SiteId) -> ObjectAddress {
        ObjectAddress {
            file: FileUuid::new(77),
            block: BlockId::new(1),
            site,
        }
    }

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    #[tokio::test]
    async fn objects_write_read_truncate_delete() {
        let rt = runtime();
        let obj = object(osd(1));

        rt.write(obj, 4, b"hello").await.unwrap();
        assert_eq!(rt.read(obj, 0, 64).await.unwrap(), b"\0\0\0\0hello");
        assert_eq!(rt.read(obj, 5, 2).await.unwrap(), b"el");
        assert_eq!(rt.query(obj.file, obj.block).await.unwrap(), vec![osd(1)]);

        rt.truncate(obj, 6).await.unwrap();
        assert_eq!(rt.read(obj, 0, 64).await.unwrap(), b"\0\0\0\0he");

        rt.delete(obj).await.unwrap();
        assert!(matches!(
            rt.read(obj, 0, 1).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn objects_require_an_online_storage_site() {
        let rt = runtime();
        assert!(matches!(
            rt.write(object(bp(0)), 0, b"x").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            rt.write(object(osd(9)), 0, b"x").await,
            Err(ServiceError::NotFound(_))
        ));

        rt.offline(osd(0), false).await.unwrap();
        assert_eq!(rt.site_state(osd(0)), Some(SiteState::Offline));
        assert!(rt.write(object(osd(0)), 0, b"x").await.is_err());
    }

    #[tokio::test]
    async fn object_positions_past_the_size_limit_are_rejected() {
        let rt = runtime();
        let obj = object(osd(0));

        for offset in [u64::MAX, 1_000_000_000_000, MAX_OBJECT_SIZE] {
            assert!(matches!(
                rt.write(obj, offset, b"x").await,
                Err(ServiceError::InvalidArgument(_))
            ));
        }
        rt.write(obj, MAX_OBJECT_SIZE - 1, b"x").await.unwrap();
        assert_eq!(rt.read(obj, u64::MAX, u64::MAX).await.unwrap(), b"");

        assert!(matches!(
            rt.truncate(obj, MAX_OBJECT_SIZE + 1).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        rt.truncate(obj, 3).await.unwrap();
        assert_eq!(rt.read(obj, 0, u64::MAX).await.unwrap(), b"\0\0\0");
    }

    #[tokio::test]
    async fn ports_saturate_for_high_ordinals() {
        let rt = LoopbackRuntime::new().with_sites(SiteRole::Metadata, 65_537, "h", 1000);
        let last = SiteId::new(SiteRole::Metadata, 65_536);
        let wrapped = SiteEndpoint {
            host: "h".into(),
            port: 1000,
        };
        assert!(rt.remove_site(wrapped, last).await.is_err());
        let saturated = SiteEndpoint {
            host: "h".into(),
            port: u16::MAX,
        };
        rt.remove_site(saturated, last).await.unwrap();
    }

    #[tokio::test]
    async fn created_branches_keep_their_parsed_pipeline() {
        let rt = runtime();
        let compiled = compile("filter:1:0:l:png,indexer:2:1:l:bdb:img:png").unwrap();
        rt.create_branch(BranchCreate {
            name: branch("feed"),
            tag: "t".into(),
            level: 0,
            pipeline: Some(compiled.container.to_wire_blob()),
        })
        .await
        .unwrap();

        assert_eq!(rt.branch_stages(&branch("feed")), Some(compiled.container));

        let again = rt
            .create_branch(BranchCreate {
                name: branch("feed"),
                tag: "t".into(),
                level: 0,
                pipeline: None,
            })
            .await;
        assert!(matches!(again, Err(ServiceError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn malformed_pipeline_blocks_are_rejected() {
        let rt = runtime();
        let result = rt
            .create_branch(BranchCreate {
                name: branch("bad"),
                tag: "t".into(),
                level: 0,
                pipeline: Some(vec![1, 0, 0]),
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Wire(_))));
        assert_eq!(rt.branch_stages(&branch("bad")), None);
    }

    #[tokio::test]
    async fn search_needs_a_matching_index() {
        let rt = runtime();
        let compiled = compile("indexer:1:0:l:plain:img:png").unwrap();
        rt.create_branch(BranchCreate {
            name: branch("feed"),
            tag: "t".into(),
            level: 0,
            pipeline: Some(compiled.container.to_wire_blob()),
        })
        .await
        .unwrap();

        for line in ["type=png color=rgb", "type=jpg color=rgb", "type=png color=cmyk"] {
            rt.publish(&branch("feed"), "t", 0, line.as_bytes()).await.unwrap();
        }

        let db = DatabaseName::new("img").unwrap();
        let prefix = KeyPrefix::new("png").unwrap();
        let expr = "r:type=png & tag:color=rgb";
        let mut hits = rt.search(&branch("feed"), bp(0), &db, &prefix, expr).await.unwrap();
        hits.extend(rt.search(&branch("feed"), bp(1), &db, &prefix, expr).await.unwrap());
        assert_eq!(hits, vec!["type=png color=rgb".to_string()]);

        let other = KeyPrefix::new("jpg").unwrap();
        assert!(matches!(
            rt.search(&branch("feed"), bp(0), &db, &other, expr).await,
            Err(ServiceError::InvalidArgument(_))
        ));

        let bor = rt.dump_bor(&branch("feed"), bp(0)).await.unwrap();
        assert!(bor.contains("2 record(s)"), "{bor}");
        assert!(bor.contains("stages [indexer]"), "{bor}");
    }

    #[tokio::test]
    async fn address_table_membership() {
        let rt = runtime();
        let endpoint = SiteEndpoint {
            host: "10.0.0.5".into(),
            port: 8500,
        };
        let mds = SiteId::new(SiteRole::Metadata, 3);

        rt.add_site(endpoint.clone(), mds).await.unwrap();
        assert_eq!(rt.active_sites(SiteRole::Metadata).await.unwrap(), vec![mds]);
        assert!(rt.add_site(endpoint.clone(), mds).await.is_err());

        let wrong = SiteEndpoint {
            host: "10.0.0.6".into(),
            port: 8500,
        };
        assert!(matches!(
            rt.remove_site(wrong, mds).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        rt.remove_site(endpoint, mds).await.unwrap();
        assert_eq!(rt.active_site_count(SiteRole::Metadata).await.unwrap(), 0);

        assert_eq!(rt.active_site_count(SiteRole::BranchPublisher).await.unwrap(), 2);
        rt.shutdown(bp(1)).await.unwrap();
        assert_eq!(rt.active_site_count(SiteRole::BranchPublisher).await.unwrap(), 1);
        assert!(matches!(rt.shutdown(bp(1)).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn every_call_is_journaled() {
        let rt = runtime();
        rt.statfs().await.unwrap();
        rt.cluster_status(SiteRole::ObjectStorage).await.unwrap();

        let journal = rt.journal();
        let calls: Vec<&str> = journal.iter().map(|c| c.call).collect();
        assert_eq!(calls, ["statfs", "get_cluster"]);
        assert!(journal[0].at <= journal[1].at);
    }
}
