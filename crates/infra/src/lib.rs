//! Infrastructure: job ledger implementations and the stale-job sweeper.

pub mod ledger;
pub mod sweeper;

pub use ledger::{InMemoryJobLedger, JobLedger, PostgresJobLedger};
pub use sweeper::{StaleJobSweeper, SweeperHandle};
