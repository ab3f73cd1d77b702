// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Core types and contracts of the Portal payment-channel node.
//!
//! This crate does not talk to the network or the filesystem itself. It defines the pieces the
//! other crates agree on:
//!  * the [`Logger`] trait and `log_*` macros used throughout the workspace,
//!  * the [`ChannelEngine`] contract the node drives, together with the [`Event`]s it emits,
//!  * the [`ChainListener`] interface through which chain data reaches the engine,
//!  * the persisted-state layout ([`util::persist`]),
//!  * [`PendingEventTracker`], the rendezvous the funding workflow blocks on.
//!
//! [`Logger`]: util::logger::Logger
//! [`ChannelEngine`]: ln::engine::ChannelEngine
//! [`Event`]: events::Event
//! [`ChainListener`]: chain::ChainListener
//! [`PendingEventTracker`]: util::event_tracker::PendingEventTracker

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[macro_use]
pub mod util;
pub mod chain;
pub mod events;
pub mod ln;
pub mod sign;
