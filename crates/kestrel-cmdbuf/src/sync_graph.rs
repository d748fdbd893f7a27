//! Intra-buffer dependency tracking.
//!
//! Sync points are arena indices handed out in allocation order, one per
//! recorded command. A command may only wait on sync points produced by
//! commands appended strictly earlier, so every dependency edge points
//! backward and the graph is acyclic by construction. Allocation order
//! doubles as the deterministic tie-break when the schedule is computed.

use std::collections::BinaryHeap;

use crate::error::CmdBufError;

/// Handle to a dependency produced by one recorded command, meaningful only
/// within the buffer that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncPointId(pub u32);

/// Arena of sync points: index = sync point id, value = producing command.
#[derive(Debug, Default)]
pub(crate) struct SyncGraph {
    producer: Vec<u32>,
}

impl SyncGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate the sync point produced by command `command_index`.
    pub(crate) fn allocate(&mut self, command_index: u32) -> SyncPointId {
        let id = SyncPointId(self.producer.len() as u32);
        self.producer.push(command_index);
        id
    }

    /// Every sync point allocated so far, in allocation order.
    pub(crate) fn all_ids(&self) -> impl Iterator<Item = SyncPointId> + '_ {
        (0..self.producer.len() as u32).map(SyncPointId)
    }

    /// The command that produces `id`, or an error for ids this graph never
    /// allocated.
    pub(crate) fn producer_of(&self, id: SyncPointId) -> Result<u32, CmdBufError> {
        self.producer
            .get(id.0 as usize)
            .copied()
            .ok_or(CmdBufError::InvalidSyncPoint(id))
    }

    /// Validate a wait list for the command about to be appended at
    /// `command_index`: every id must exist and be produced strictly
    /// earlier. Forward references cannot be minted through the public API,
    /// but ids are plain integers and a caller can fabricate one.
    pub(crate) fn validate_waits(
        &self,
        command_index: u32,
        waits: &[SyncPointId],
    ) -> Result<(), CmdBufError> {
        for &id in waits {
            if self.producer_of(id)? >= command_index {
                return Err(CmdBufError::InvalidSyncPoint(id));
            }
        }
        Ok(())
    }
}

/// The compiled execution order of a finalized buffer, computed once at
/// finalize time and reused by every submission.
#[derive(Debug, Clone)]
pub(crate) struct Schedule {
    /// Command indices in dispatch order.
    pub(crate) order: Vec<u32>,
    /// Per command: indices of the commands whose completion it waits on.
    pub(crate) deps: Vec<Vec<u32>>,
}

impl Schedule {
    /// Topologically sort `command_count` commands whose dependencies are
    /// given by `waits_of` (command index -> producing command indices).
    ///
    /// Kahn's algorithm with a min-index ready heap: ties are broken by
    /// recording order, so the result is deterministic and, for a graph
    /// whose edges all point backward, stable under re-computation.
    pub(crate) fn build(
        command_count: u32,
        graph: &SyncGraph,
        waits_of: impl Fn(u32) -> Vec<SyncPointId>,
    ) -> Result<Self, CmdBufError> {
        let n = command_count as usize;
        let mut deps: Vec<Vec<u32>> = Vec::with_capacity(n);
        let mut dependents: Vec<Vec<u32>> = vec![Vec::new(); n];
        let mut in_degree = vec![0u32; n];

        for consumer in 0..command_count {
            let mut producers: Vec<u32> = waits_of(consumer)
                .iter()
                .map(|&id| graph.producer_of(id))
                .collect::<Result<_, _>>()?;
            producers.sort_unstable();
            producers.dedup();
            for &producer in &producers {
                dependents[producer as usize].push(consumer);
                in_degree[consumer as usize] += 1;
            }
            deps.push(producers);
        }

        // Min-heap over command indices (BinaryHeap is a max-heap).
        let mut ready: BinaryHeap<std::cmp::Reverse<u32>> = (0..command_count)
            .filter(|&cmd| in_degree[cmd as usize] == 0)
            .map(std::cmp::Reverse)
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(std::cmp::Reverse(cmd)) = ready.pop() {
            order.push(cmd);
            for &next in &dependents[cmd as usize] {
                in_degree[next as usize] -= 1;
                if in_degree[next as usize] == 0 {
                    ready.push(std::cmp::Reverse(next));
                }
            }
        }

        // Edges only point backward, so a cycle is unreachable.
        debug_assert_eq!(order.len(), n, "dependency graph left commands unscheduled");

        Ok(Self { order, deps })
    }
}
