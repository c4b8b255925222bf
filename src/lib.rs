//! In-process mock banking datastore: login and registration against a seeded
//! account store, a single-slot session, an append-only transaction ledger and a
//! change notification bus, persisted as JSON snapshots through [`Storage`].

#[macro_use]
extern crate log;

pub mod features;

pub use features::*;
