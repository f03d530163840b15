use thiserror::Error;

use super::mem_port::MemStatus;
use super::scheduler::AccelEvent;

#[derive(Debug, Error)]
pub enum AccelError {
  #[error("invalid array geometry: {0}")]
  Geometry(String),

  #[error("invalid job configuration: {0}")]
  Job(String),

  #[error("accelerator busy, trigger rejected")]
  Busy,

  #[error("{stream} transaction at {addr:#x} failed with status {status:?}")]
  Transaction {
    stream: &'static str,
    addr: u64,
    status: MemStatus,
  },

  #[error("{stream} slot is {got} bytes, beat is {expected} bytes")]
  SlotWidth {
    stream: &'static str,
    expected: usize,
    got: usize,
  },

  #[error("{event:?} armed while {pending:?} is still pending")]
  ContinuationPending { event: AccelEvent, pending: AccelEvent },

  #[error("{event:?} delivered but {pending:?} was pending")]
  UnexpectedEvent {
    event: AccelEvent,
    pending: Option<AccelEvent>,
  },

  #[error("{stream} stream ended after {done} of {tot_len} beats")]
  StreamIncomplete {
    stream: &'static str,
    done: u64,
    tot_len: u64,
  },

  #[error("memory port lock poisoned")]
  PortPoisoned,
}

pub type AccelResult<T> = Result<T, AccelError>;
