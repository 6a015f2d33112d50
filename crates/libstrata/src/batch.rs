//! Batch / operation pipeline — groups operations that share a target and
//! message kind so they travel as one network message instead of one per
//! call.
//!
//! Operations are partitioned into runs of consecutive same-`(target_key,
//! kind)` entries via a single left-to-right pass building a lookup map
//! plus an explicit first-seen-order replay list, rather than a sort,
//! which would silently reorder same-target ties. `execute` then drives
//! one async call per run and ANDs the results together.

use std::collections::HashMap;
use std::future::Future;

use strata_core::wire::{MessageType, Safety};

/// One pipeline operation: an opaque key identifying its target (typically
/// `"{namespace}\0{name}"`), the message kind that will carry it, and
/// caller-supplied data describing the operation itself.
pub struct Operation<D> {
    pub target_key: String,
    pub kind: MessageType,
    pub data: D,
}

impl<D> Operation<D> {
    pub fn new(target_key: impl Into<String>, kind: MessageType, data: D) -> Self {
        Self {
            target_key: target_key.into(),
            kind,
            data,
        }
    }
}

/// An ordered list of operations sharing one safety level.
pub struct Batch<D> {
    pub safety: Safety,
    ops: Vec<Operation<D>>,
}

impl<D> Batch<D> {
    pub fn new(safety: Safety) -> Self {
        Self {
            safety,
            ops: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, target_key: impl Into<String>, kind: MessageType, data: D) {
        self.ops.push(Operation::new(target_key, kind, data));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Group by `(target_key, kind)`, run `exec` once per run in
    /// first-seen order with that run's full op data, and return the
    /// logical AND of every run's result. Each call owns its run's data
    /// outright, so a closure returning an `async move` block needs no
    /// borrowed state threaded through an await point.
    pub async fn execute<Exec, Fut>(self, mut exec: Exec) -> bool
    where
        Exec: FnMut(String, MessageType, Safety, Vec<D>) -> Fut,
        Fut: Future<Output = bool>,
    {
        let safety = self.safety;
        let mut order: Vec<(String, MessageType)> = Vec::new();
        let mut groups: HashMap<(String, MessageType), Vec<D>> = HashMap::new();

        for op in self.ops {
            let key = (op.target_key, op.kind);
            match groups.get_mut(&key) {
                Some(bucket) => bucket.push(op.data),
                None => {
                    order.push(key.clone());
                    groups.insert(key, vec![op.data]);
                }
            }
        }

        let mut overall = true;
        for (target_key, kind) in order {
            let data = groups
                .remove(&(target_key.clone(), kind))
                .expect("run key was just recorded");
            let ok = exec(target_key, kind, safety, data).await;
            overall &= ok;
        }
        overall
    }
}

/// Build the target key an object operation groups under: `namespace` and
/// `name` joined by a NUL, which can never appear inside either (wire
/// strings are themselves NUL-terminated).
pub fn target_key(namespace: &str, name: &str) -> String {
    format!("{namespace}\0{name}")
}
