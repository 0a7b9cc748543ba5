//! Core engine: the fetch -> screen -> evaluate -> record -> alert cycle,
//! plus the paper-trading ledger and the periodic tasks around it.

pub mod cooldown;
pub mod cycle;
pub mod heartbeat;
pub mod ledger;
pub mod scanner;
pub mod settlement;
