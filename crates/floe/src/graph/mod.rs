//! Asset graph and job definitions.
//!
//! Assets form a DAG through their declared dependencies. The graph is built
//! once, validated (unknown references, cycles) and then shared read-only.
//! Topological order is deterministic: among ready assets, the one defined
//! first goes first.

mod key;

pub use key::{AssetKey, JobKey};

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::action::AssetAction;
use crate::error::GraphError;

/// A defined asset.
#[derive(Clone)]
pub struct AssetNode {
    pub key: AssetKey,
    pub dependencies: Vec<AssetKey>,
    pub action: Arc<dyn AssetAction>,
}

impl std::fmt::Debug for AssetNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetNode")
            .field("key", &self.key)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// One asset of a job plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub asset: AssetKey,
    /// Dependencies that are members of the same job.
    pub in_job: Vec<AssetKey>,
    /// Dependencies outside the job; they must already be materialized.
    pub external: Vec<AssetKey>,
}

/// A job's assets in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    pub job: JobKey,
    pub steps: Vec<PlanStep>,
}

/// Collects asset and job definitions.
#[derive(Default)]
pub struct AssetGraphBuilder {
    assets: IndexMap<AssetKey, AssetNode>,
    jobs: IndexMap<JobKey, Vec<AssetKey>>,
}

impl AssetGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_asset(
        &mut self,
        key: AssetKey,
        dependencies: impl IntoIterator<Item = AssetKey>,
        action: Arc<dyn AssetAction>,
    ) -> Result<&mut Self, GraphError> {
        if self.assets.contains_key(&key) {
            return Err(GraphError::DuplicateAsset {
                asset: key.to_string(),
            });
        }

        let mut seen = HashSet::new();
        let dependencies = dependencies
            .into_iter()
            .filter(|dep| seen.insert(dep.clone()))
            .collect();

        self.assets.insert(
            key.clone(),
            AssetNode {
                key,
                dependencies,
                action,
            },
        );
        Ok(self)
    }

    pub fn define_job(
        &mut self,
        key: JobKey,
        assets: impl IntoIterator<Item = AssetKey>,
    ) -> Result<&mut Self, GraphError> {
        if self.jobs.contains_key(&key) {
            return Err(GraphError::DuplicateJob {
                job: key.to_string(),
            });
        }

        let mut members: Vec<AssetKey> = Vec::new();
        for asset in assets {
            if !members.contains(&asset) {
                members.push(asset);
            }
        }
        self.jobs.insert(key, members);
        Ok(self)
    }

    /// Validate references and compute the topological order.
    pub fn build(self) -> Result<AssetGraph, GraphError> {
        for node in self.assets.values() {
            if let Some(dependency) = node
                .dependencies
                .iter()
                .find(|dep| !self.assets.contains_key(*dep))
            {
                return Err(GraphError::UnknownDependency {
                    asset: node.key.to_string(),
                    dependency: dependency.to_string(),
                });
            }
        }

        for (job, members) in &self.jobs {
            if let Some(asset) = members.iter().find(|a| !self.assets.contains_key(*a)) {
                return Err(GraphError::UnknownJobMember {
                    job: job.to_string(),
                    asset: asset.to_string(),
                });
            }
        }

        let order = topological_order(&self.assets)?;

        let mut dependents: HashMap<AssetKey, Vec<AssetKey>> = HashMap::new();
        for node in self.assets.values() {
            for dep in &node.dependencies {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(node.key.clone());
            }
        }

        Ok(AssetGraph {
            assets: self.assets,
            jobs: self.jobs,
            order,
            dependents,
        })
    }
}

/// Kahn's algorithm with definition order as tie-break.
fn topological_order(assets: &IndexMap<AssetKey, AssetNode>) -> Result<Vec<AssetKey>, GraphError> {
    let index = |key: &AssetKey| assets.get_index_of(key);

    let mut remaining: Vec<usize> = assets.values().map(|n| n.dependencies.len()).collect();
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); assets.len()];
    for (i, node) in assets.values().enumerate() {
        for dep in &node.dependencies {
            if let Some(d) = index(dep) {
                downstream[d].push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..assets.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(assets.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &next in &downstream[i] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < assets.len() {
        return Err(GraphError::CycleDetected {
            assets: find_cycle(assets, &remaining),
        });
    }

    Ok(order
        .into_iter()
        .filter_map(|i| assets.get_index(i).map(|(key, _)| key.clone()))
        .collect())
}

/// Walk unresolved dependencies until a node repeats; the repeated segment
/// is a cycle. Every unresolved node has at least one unresolved dependency.
fn find_cycle(assets: &IndexMap<AssetKey, AssetNode>, remaining: &[usize]) -> Vec<String> {
    let unresolved = |i: usize| remaining.get(i).is_some_and(|&n| n > 0);

    let Some(start) = (0..assets.len()).find(|&i| unresolved(i)) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = path.iter().position(|&i| i == current) {
            let mut cycle: Vec<String> = path[pos..]
                .iter()
                .rev()
                .filter_map(|&i| assets.get_index(i).map(|(k, _)| k.to_string()))
                .collect();
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return cycle;
        }
        path.push(current);

        let next = assets.get_index(current).and_then(|(_, node)| {
            node.dependencies
                .iter()
                .filter_map(|dep| assets.get_index_of(dep))
                .find(|&d| unresolved(d))
        });
        match next {
            Some(next) => current = next,
            None => return Vec::new(),
        }
    }
}

/// Validated, immutable asset graph.
pub struct AssetGraph {
    assets: IndexMap<AssetKey, AssetNode>,
    jobs: IndexMap<JobKey, Vec<AssetKey>>,
    order: Vec<AssetKey>,
    dependents: HashMap<AssetKey, Vec<AssetKey>>,
}

impl AssetGraph {
    pub fn builder() -> AssetGraphBuilder {
        AssetGraphBuilder::new()
    }

    pub fn asset(&self, key: &AssetKey) -> Option<&AssetNode> {
        self.assets.get(key)
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetNode> {
        self.assets.values()
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.assets.contains_key(key)
    }

    pub fn job(&self, key: &JobKey) -> Option<&[AssetKey]> {
        self.jobs.get(key).map(Vec::as_slice)
    }

    pub fn jobs(&self) -> impl Iterator<Item = (&JobKey, &[AssetKey])> {
        self.jobs.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Every asset, dependencies first.
    pub fn topological_order(&self) -> &[AssetKey] {
        &self.order
    }

    /// Direct dependencies of an asset.
    pub fn dependencies(&self, key: &AssetKey) -> Option<&[AssetKey]> {
        self.assets.get(key).map(|n| n.dependencies.as_slice())
    }

    /// Every asset that depends on `key`, directly or transitively.
    pub fn dependents(&self, key: &AssetKey) -> BTreeSet<AssetKey> {
        let mut found = BTreeSet::new();
        let mut queue: VecDeque<&AssetKey> = VecDeque::from([key]);
        while let Some(current) = queue.pop_front() {
            for next in self.dependents.get(current).into_iter().flatten() {
                if found.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        found
    }

    /// The job's assets in topological order, with each asset's dependencies
    /// split into in-job and external.
    pub fn job_plan(&self, job: &JobKey) -> Result<JobPlan, GraphError> {
        let members = self.jobs.get(job).ok_or_else(|| GraphError::UnknownJob {
            job: job.to_string(),
        })?;
        let member_set: HashSet<&AssetKey> = members.iter().collect();

        let steps = self
            .order
            .iter()
            .filter(|key| member_set.contains(key))
            .filter_map(|key| self.assets.get(key))
            .map(|node| {
                let (in_job, external) = node
                    .dependencies
                    .iter()
                    .cloned()
                    .partition(|dep| member_set.contains(dep));
                PlanStep {
                    asset: node.key.clone(),
                    in_job,
                    external,
                }
            })
            .collect();

        Ok(JobPlan {
            job: job.clone(),
            steps,
        })
    }
}
