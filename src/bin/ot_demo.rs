//! Two replicas editing one document and converging through an in-memory node
//!
//! Run with: RUST_LOG=debug cargo run --bin ot_demo

use std::sync::Arc;

use otgraph::document::{document_system, DocumentOp, DocumentState, FieldPolicy, Value};
use otgraph::graph::RepoId;
use otgraph::identity::{OwnerKeys, SimKey};
use otgraph::{MemoryNode, NodeRepository, Repository, StateManager, SyncConfig};

type Replica = StateManager<DocumentOp, DocumentState>;

fn open_replica(node: &Arc<MemoryNode>, repo_id: &RepoId, keys: &Arc<OwnerKeys>, key: &SimKey) -> anyhow::Result<Replica> {
    let repository: Arc<dyn Repository<DocumentOp>> = Arc::new(NodeRepository::new(
        node.clone(),
        repo_id.clone(),
        keys.clone(),
        key.clone(),
    ));
    let system = Arc::new(document_system(FieldPolicy::GreaterWins)?);
    Ok(StateManager::new(system, repository, DocumentState::new(), SyncConfig::default()))
}

fn print_state(name: &str, replica: &Replica) {
    let elements: Vec<String> = replica.state().elements.iter().map(|v| format!("{:?}", v)).collect();
    println!("   {} @ {}: elements [{}]", name, replica.base(), elements.join(", "));
    for (field, value) in &replica.state().fields {
        println!("   {}   {} = {:?}", name, field, value);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("\n🔀 otgraph convergence demo");
    println!("===========================");

    let node = Arc::new(MemoryNode::new());
    let keys = Arc::new(OwnerKeys::generate());
    let key = SimKey::generate();
    let repo_id = RepoId::new(keys.pub_key(), "shopping-list");

    let mut alice = open_replica(&node, &repo_id, &keys, &key)?;
    let mut bob = open_replica(&node, &repo_id, &keys, &key)?;

    println!("\n📝 Concurrent edits");
    alice.apply_local(DocumentOp::insert(Value::string("milk")));
    alice.apply_local(DocumentOp::set_field("priority", None, Some(Value::int(1))));
    bob.apply_local(DocumentOp::insert(Value::string("eggs")));
    bob.apply_local(DocumentOp::set_field("priority", None, Some(Value::int(3))));
    print_state("alice", &alice);
    print_state("bob", &bob);

    println!("\n🔄 Syncing");
    let report = alice.sync().await?;
    println!("   alice pushed {} commits", report.pushed);
    let report = bob.sync().await?;
    println!("   bob pushed {} commits ({} merges)", report.pushed, report.merge_commits);
    let report = alice.sync().await?;
    println!("   alice applied {} remote diffs", report.applied);

    println!("\n✅ Result");
    print_state("alice", &alice);
    print_state("bob", &bob);

    if alice.state() == bob.state() && alice.base() == bob.base() {
        println!("\n🎉 Replicas converged at {}", alice.base());
    } else {
        println!("\n❌ Replicas diverged");
    }
    Ok(())
}
