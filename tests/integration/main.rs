//! Integration tests: full scan cycles and ledger persistence against
//! in-process doubles. No network access.

mod mock_provider;
mod persistence;
mod scan_cycle;
