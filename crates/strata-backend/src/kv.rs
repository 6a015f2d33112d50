//! KV backend capability set (spec §4.3).
//!
//! Spec models cursor-based iteration (`get_all`/`get_by_prefix` return an
//! opaque iterator consumed op-by-op via `iterate`); we materialize both as
//! `Vec<(String, Vec<u8>)>` instead, since the dispatcher already has to
//! buffer the full result set to know how many `KvValue` reply ops to
//! append before it can backpatch the reply's `count`.

use strata_core::StrataError;

/// One mutation inside a `batch_execute` call.
pub enum KvOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

pub trait KvBackend: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StrataError>;
    fn get_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, StrataError>;
    fn get_by_prefix(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StrataError>;

    /// Apply `ops` against `namespace` as a single backend transaction.
    fn batch_execute(&self, namespace: &str, ops: &[KvOp]) -> Result<(), StrataError>;

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StrataError> {
        self.batch_execute(
            namespace,
            &[KvOp::Put {
                key: key.to_string(),
                value: value.to_vec(),
            }],
        )
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), StrataError> {
        self.batch_execute(
            namespace,
            &[KvOp::Delete {
                key: key.to_string(),
            }],
        )
    }
}
