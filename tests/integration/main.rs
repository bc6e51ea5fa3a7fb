//! Integration tests for the AEGIS decision core.
//!
//! Everything runs in-process: a snapshot feed, a recording broker built on
//! the paper venue, and an in-memory (or temp-file) SQLite ledger.

mod harness;
mod mock_broker;
mod pipeline;
mod restart;
mod scenarios;
