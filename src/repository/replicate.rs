use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, BTreeSet};

use super::{CommitEntry, RemoteNode, RepositoryError};
use crate::graph::{CommitId, RawHead, RepoId, SignedData};

/// Copy the commits of `repository` that `target` lacks, plus the verified
/// heads, from `source` to `target`. Returns the number of commits sent.
///
/// Heads whose owner signature does not verify are left behind.
pub async fn replicate(
    source: &dyn RemoteNode,
    target: &dyn RemoteNode,
    repository: &RepoId,
) -> Result<usize, RepositoryError> {
    let verified: Vec<SignedData<RawHead>> = source
        .get_heads(repository)
        .await?
        .into_iter()
        .filter(|head| head.value().repository == *repository && head.verify(&repository.owner))
        .collect();
    if verified.is_empty() {
        log::debug!("Nothing to replicate for {}", repository);
        return Ok(0);
    }

    let required: BTreeSet<CommitId> = verified.iter().map(|head| head.value().commit).collect();
    let target_info = target.get_heads_info(repository).await?;
    let existing: BTreeSet<CommitId> = target_info.heads.union(&target_info.bases).copied().collect();

    let entries: Vec<CommitEntry> = source
        .download(repository, required, existing)
        .await?
        .map_ok(|mut entry| {
            entry.head = None;
            entry
        })
        .try_collect()
        .await?;
    let count = entries.len();

    target
        .upload(repository, stream::iter(entries).boxed())
        .await?;
    target.save(repository, BTreeMap::new(), verified).await?;

    log::info!("Replicated {} commits of {}", count, repository);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentOp, Value};
    use crate::identity::{OwnerKeys, SimKey};
    use crate::repository::{MemoryNode, NodeRepository, Repository};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_replicate_copies_history_and_heads() {
        let keys = Arc::new(OwnerKeys::generate());
        let repo_id = RepoId::new(keys.pub_key(), "doc");
        let key = SimKey::generate();
        let source = Arc::new(MemoryNode::new());
        let target = Arc::new(MemoryNode::new());

        let repo: NodeRepository<DocumentOp> =
            NodeRepository::new(source.clone(), repo_id.clone(), keys.clone(), key.clone());
        let mut parents = BTreeMap::new();
        parents.insert(CommitId::ROOT, vec![DocumentOp::insert(Value::int(1))]);
        let a = repo.create_commit(parents, 1).unwrap();
        let mut parents = BTreeMap::new();
        parents.insert(a.id(), vec![DocumentOp::insert(Value::int(2))]);
        let b = repo.create_commit(parents, 2).unwrap();
        let b_id = b.id();
        repo.push(vec![a, b], [b_id].into_iter().collect()).await.unwrap();

        assert_eq!(replicate(source.as_ref(), target.as_ref(), &repo_id).await.unwrap(), 2);
        assert_eq!(target.commit_count(&repo_id).await, 2);

        let mirror: NodeRepository<DocumentOp> =
            NodeRepository::new(target.clone(), repo_id.clone(), keys, key);
        assert_eq!(mirror.get_heads().await.unwrap(), [b_id].into_iter().collect());

        // Second run only re-sends nothing new
        assert_eq!(replicate(source.as_ref(), target.as_ref(), &repo_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replicate_skips_forged_heads() {
        let owner = Arc::new(OwnerKeys::generate());
        let repo_id = RepoId::new(owner.pub_key(), "doc");
        let source = Arc::new(MemoryNode::new());
        let target = Arc::new(MemoryNode::new());

        let forger: NodeRepository<DocumentOp> = NodeRepository::new(
            source.clone(),
            repo_id.clone(),
            Arc::new(OwnerKeys::generate()),
            SimKey::generate(),
        );
        let mut parents = BTreeMap::new();
        parents.insert(CommitId::ROOT, vec![DocumentOp::insert(Value::Null)]);
        let c = forger.create_commit(parents, 1).unwrap();
        let c_id = c.id();
        forger.push(vec![c], [c_id].into_iter().collect()).await.unwrap();

        assert_eq!(replicate(source.as_ref(), target.as_ref(), &repo_id).await.unwrap(), 0);
        assert_eq!(target.commit_count(&repo_id).await, 0);
    }
}
