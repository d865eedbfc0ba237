//! Parallel Evaluation
//!
//! Runs the dirty operations of a graph on a rayon pool.
//!
//! The calling thread owns the graph for the whole pass and coordinates it
//! without ever being one of the workers that evaluate bodies. It dispatches
//! every operation whose dependencies are done, then waits on a channel for
//! results:
//!
//! 1. Operations of the schedule with no pending dependency are spawned.
//! 2. Each worker evaluates one operation body against read-only copies of
//!    its predecessors' outputs and sends the output back.
//! 3. On completion the dependents' counters are decremented and any that
//!    reach zero are spawned.
//! 4. When nothing is in flight the outputs are written to their operation
//!    slots and the finished operations are marked clean.
//!
//! A failing body keeps its operation dirty and none of its dependents are
//! dispatched. Cancellation is checked before every dispatch: once observed,
//! bodies already running finish but nothing new starts. Operations the
//! scheduler reports as blocked by a cycle stay dirty and are listed in the
//! report.
//!
//! If the caller is itself a pool thread, waiting for results keeps running
//! queued pool jobs, so a single-threaded pool still makes progress.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, TryRecvError};
use rayon::{Scope, ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace, warn};

use crate::config::GraphConfig;
use crate::error::{DepsgraphError, Result};
use crate::graph::{Depsgraph, OperationId, OperationKey, OperationOutput, Recalc};
use crate::pipeline;
use crate::store::{DatablockId, DatablockStore};

use super::scheduler::{self, dependencies_in, dependents_in, Schedule};

/// How long a pool thread sleeps on the channel when it found no pool job
/// to run while waiting.
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Shareable cancellation request for an evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop dispatching new operations in every pass holding this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What an operation body sees: its own key and the outputs of the
/// operations it depends on.
#[derive(Debug)]
pub struct OperationContext {
    pub operation: OperationId,
    pub key: OperationKey,
    /// Predecessor outputs. `None` for predecessors never evaluated.
    pub inputs: Vec<(OperationId, Option<OperationOutput>)>,
}

impl OperationContext {
    /// Datablock owning the operation.
    pub fn owner(&self) -> DatablockId {
        self.key.component.id
    }
}

/// Host supplied evaluation of operations.
pub trait OperationBody: Send + Sync {
    fn evaluate(&self, context: &OperationContext) -> anyhow::Result<OperationOutput>;
}

impl<F> OperationBody for F
where
    F: Fn(&OperationContext) -> anyhow::Result<OperationOutput> + Send + Sync,
{
    fn evaluate(&self, context: &OperationContext) -> anyhow::Result<OperationOutput> {
        self(context)
    }
}

/// Outcome of one evaluation pass.
#[derive(Debug, Default)]
pub struct EvalReport {
    /// The relations were rebuilt before scheduling.
    pub rebuilt: bool,
    /// Operations that completed, in completion order.
    pub evaluated: Vec<OperationId>,
    /// Operations whose body failed. They stay dirty.
    pub failed: Vec<(OperationId, DepsgraphError)>,
    /// Scheduled operations that were never dispatched.
    pub pending: usize,
    /// Dirty operations on or behind a flushing cycle. They stay dirty.
    pub blocked: Vec<OperationId>,
    pub cancelled: bool,
}

impl EvalReport {
    /// Every dirty operation ran successfully.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.pending == 0 && self.blocked.is_empty() && !self.cancelled
    }
}

/// Evaluates graphs, optionally on a dedicated thread pool.
#[derive(Debug)]
pub struct Evaluator {
    pool: Option<ThreadPool>,
}

impl Evaluator {
    /// Evaluator for graphs configured with `config`. Builds a dedicated
    /// pool when `worker_threads` is set.
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let pool = match config.worker_threads {
            Some(threads) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("depsgraph-eval-{i}"))
                    .build()?,
            ),
            None => None,
        };
        Ok(Self { pool })
    }

    /// Rebuild relations if they are stale, then evaluate every dirty
    /// operation.
    pub fn evaluate<B>(
        &self,
        graph: &mut Depsgraph,
        store: &DatablockStore,
        body: &B,
        token: &CancellationToken,
    ) -> Result<EvalReport>
    where
        B: OperationBody + ?Sized,
    {
        let rebuilt = pipeline::relations_update(graph, store)?;
        let schedule = scheduler::schedule(graph);

        let outcome = {
            let graph = &*graph;
            let schedule = &schedule;
            // The closure runs on this thread; only the bodies go to the pool.
            match &self.pool {
                Some(pool) => pool.in_place_scope(|s| dispatch(s, graph, schedule, body, token)),
                None => rayon::in_place_scope(|s| dispatch(s, graph, schedule, body, token)),
            }
        };

        let report = apply(graph, outcome, rebuilt, schedule.blocked().to_vec());
        debug!(
            evaluated = report.evaluated.len(),
            failed = report.failed.len(),
            pending = report.pending,
            blocked = report.blocked.len(),
            cancelled = report.cancelled,
            "evaluation finished"
        );
        Ok(report)
    }
}

struct Outcome {
    outputs: Vec<(OperationId, OperationOutput)>,
    failed: Vec<(OperationId, anyhow::Error)>,
    pending: usize,
    cancelled: bool,
}

type Finished = (OperationId, anyhow::Result<OperationOutput>);

fn dispatch<'scope, B>(
    s: &Scope<'scope>,
    graph: &'scope Depsgraph,
    schedule: &Schedule,
    body: &'scope B,
    token: &CancellationToken,
) -> Outcome
where
    B: OperationBody + ?Sized,
{
    let relaxed = schedule.relaxed();
    let index: HashMap<OperationId, usize> = schedule
        .order()
        .iter()
        .enumerate()
        .map(|(i, &op)| (op, i))
        .collect();
    let mut remaining: HashMap<OperationId, usize> = schedule
        .order()
        .iter()
        .map(|&op| (op, dependencies_in(graph, op, &index, relaxed).count()))
        .collect();
    let mut ready: BinaryHeap<Reverse<OperationId>> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(&op, _)| Reverse(op))
        .collect();

    let mut results: HashMap<OperationId, OperationOutput> = HashMap::new();
    let mut outputs = Vec::new();
    let mut failed = Vec::new();
    let mut dispatched = 0;
    let mut cancelled = false;

    let (sender, receiver) = unbounded::<Finished>();

    let spawn = |op: OperationId, results: &HashMap<OperationId, OperationOutput>| {
        let node = graph.operation(op);
        let inputs = node
            .inlinks()
            .iter()
            .map(|&relation| {
                let from = graph.relation(relation).from;
                let output = results.get(&from).or_else(|| graph.operation(from).output()).cloned();
                (from, output)
            })
            .collect();
        let context = OperationContext {
            operation: op,
            key: node.key().clone(),
            inputs,
        };
        let sender = sender.clone();
        trace!(operation = %graph.operation_label(op), "dispatch");

        s.spawn(move |_| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| body.evaluate(&context)))
                .unwrap_or_else(|_| Err(anyhow::anyhow!("operation body panicked")));
            // The receiver outlives every job of this scope.
            let _ = sender.send((op, result));
        });
    };

    let mut in_flight = 0usize;
    loop {
        while let Some(Reverse(op)) = ready.pop() {
            if token.is_cancelled() {
                cancelled = true;
                ready.push(Reverse(op));
                break;
            }
            spawn(op, &results);
            in_flight += 1;
            dispatched += 1;
        }
        if in_flight == 0 {
            break;
        }

        let Some((op, result)) = next_result(&receiver) else {
            break;
        };
        in_flight -= 1;
        match result {
            Ok(output) => {
                results.insert(op, output.clone());
                outputs.push((op, output));
                for dependent in dependents_in(graph, op, &index, relaxed) {
                    if let Some(count) = remaining.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(Reverse(dependent));
                        }
                    }
                }
            }
            Err(error) => {
                warn!(operation = %graph.operation_label(op), %error, "operation failed");
                failed.push((op, error));
            }
        }
    }

    Outcome {
        outputs,
        failed,
        pending: schedule.len() - dispatched,
        cancelled,
    }
}

/// Wait for the next finished operation. A pool thread keeps executing
/// queued pool jobs while it waits, since the job it waits for may be
/// queued behind it.
fn next_result(receiver: &Receiver<Finished>) -> Option<Finished> {
    if rayon::current_thread_index().is_none() {
        return receiver.recv().ok();
    }
    loop {
        match receiver.try_recv() {
            Ok(finished) => return Some(finished),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }
        if matches!(rayon::yield_now(), Some(rayon::Yield::Executed)) {
            continue;
        }
        match receiver.recv_timeout(IDLE_WAIT) {
            Ok(finished) => return Some(finished),
            Err(RecvTimeoutError::Disconnected) => return None,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

/// Store outputs on their operations and clean what finished.
fn apply(graph: &mut Depsgraph, outcome: Outcome, rebuilt: bool, blocked: Vec<OperationId>) -> EvalReport {
    let mut evaluated = Vec::with_capacity(outcome.outputs.len());
    for (op, output) in outcome.outputs {
        let node = &mut graph.operations[op.index()];
        node.output = Some(output);
        node.needs_update = false;
        evaluated.push(op);
    }

    for component in &mut graph.components {
        if component.recalc.is_empty() {
            continue;
        }
        let done = component
            .operations
            .values()
            .all(|op| !graph.operations[op.index()].needs_update);
        if done {
            component.recalc = Recalc::NONE;
        }
    }

    let failed = outcome
        .failed
        .into_iter()
        .map(|(op, source)| {
            let name = graph.operation_label(op);
            (op, DepsgraphError::Operation { name, source })
        })
        .collect();

    EvalReport {
        rebuilt,
        evaluated,
        failed,
        pending: outcome.pending,
        blocked,
        cancelled: outcome.cancelled,
    }
}
