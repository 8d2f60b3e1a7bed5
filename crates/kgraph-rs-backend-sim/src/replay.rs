//! Replays a launch plan on simulated FIFO streams and reports ordering hazards.
//!
//! Each stream carries a vector clock. A launch ticks its own stream, a
//! record snapshots the stream clock into the event, and a wait merges the
//! event snapshot into the waiting stream. A dependency across streams is
//! safe only when the consumer's clock has already observed the producer.

use std::collections::{HashMap, HashSet};

use kgraph_rs::graph::{GraphError, KernelGraph, NodeId};
use kgraph_rs::wire::{export_launch_plan, LaunchPlan, SyncOp};
use tracing::debug;

type VectorClock = HashMap<u64, u64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hazard {
    /// Consumer may start before a producer on another stream has finished.
    UnorderedDependency { producer: NodeId, consumer: NodeId },
    /// Consumer is launched before its producer.
    UseBeforeLaunch { producer: NodeId, consumer: NodeId },
    /// Wait on an event nothing has recorded yet; the runtime treats it as a no-op.
    WaitBeforeRecord { event: u64, waiter: NodeId },
    /// Event recorded or waited on more than once.
    EventReused { event: u64, node: NodeId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub launched: usize,
    pub streams: usize,
    pub events: usize,
    pub hazards: Vec<Hazard>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.hazards.is_empty()
    }
}

pub fn replay_graph(graph: &KernelGraph) -> Result<ReplayReport, GraphError> {
    let plan = export_launch_plan(graph)?;
    Ok(replay_launch_plan(&plan))
}

pub fn replay_launch_plan(plan: &LaunchPlan) -> ReplayReport {
    let mut clocks: HashMap<u64, VectorClock> = HashMap::new();
    let mut events: HashMap<u64, VectorClock> = HashMap::new();
    let mut waited: HashSet<u64> = HashSet::new();
    let mut stamps: HashMap<NodeId, (u64, u64)> = HashMap::new();
    let mut hazards = Vec::new();

    for record in &plan.records {
        let clock = clocks.entry(record.stream).or_default();

        if let Some(SyncOp::Wait { event }) = record.sync {
            if !waited.insert(event) {
                hazards.push(Hazard::EventReused {
                    event,
                    node: record.node,
                });
            }
            match events.get(&event) {
                Some(snapshot) => merge(clock, snapshot),
                None => hazards.push(Hazard::WaitBeforeRecord {
                    event,
                    waiter: record.node,
                }),
            }
        }

        for &producer in &record.deps {
            match stamps.get(&producer) {
                None => hazards.push(Hazard::UseBeforeLaunch {
                    producer,
                    consumer: record.node,
                }),
                Some(&(stream, tick)) if stream != record.stream => {
                    if clock.get(&stream).copied().unwrap_or(0) < tick {
                        hazards.push(Hazard::UnorderedDependency {
                            producer,
                            consumer: record.node,
                        });
                    }
                }
                Some(_) => {}
            }
        }

        let tick = clock.entry(record.stream).or_insert(0);
        *tick += 1;
        stamps.insert(record.node, (record.stream, *tick));

        if let Some(SyncOp::Record { event }) = record.sync {
            if events.insert(event, clock.clone()).is_some() {
                hazards.push(Hazard::EventReused {
                    event,
                    node: record.node,
                });
            }
        }
    }

    debug!(
        graph = %plan.graph,
        launched = plan.records.len(),
        hazards = hazards.len(),
        "replayed launch plan"
    );

    ReplayReport {
        launched: plan.records.len(),
        streams: clocks.len(),
        events: events.len(),
        hazards,
    }
}

fn merge(into: &mut VectorClock, from: &VectorClock) {
    for (&stream, &tick) in from {
        let entry = into.entry(stream).or_insert(0);
        *entry = (*entry).max(tick);
    }
}
