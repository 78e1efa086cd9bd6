// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A synchronous client for [TUF repositories][spec].
//!
//! This crate implements the core TUF client workflow: establishing trust in a root of trust
//! metadata file shipped out-of-band, walking the root key-rotation chain, and refreshing
//! timestamp, snapshot, and targets metadata with full rollback/freeze/fast-forward/mix-and-match
//! attack protection, before ever handing an application a target file's bytes.
//!
//! [`Client`] is the entry point: construct one with [`Client::init`], call [`Client::update`]
//! to (re-)establish trust, then use [`Client::targets`]/[`Client::target`]/[`Client::download`]
//! to inspect or fetch the targets the repository currently vouches for.
//!
//! Metadata persistence is abstracted behind [`LocalStore`] ([`FilesystemStore`] or
//! [`MemoryStore`] are provided); reaching the repository itself is abstracted behind
//! [`RemoteStore`], with [`TransportRemoteStore`] providing one for any [`Transport`]
//! ([`FilesystemTransport`] for local/test repositories, [`HttpTransport`] behind the `http`
//! feature for real ones).
//!
//! Delegated targets roles (TUF 5.5) are out of scope: this client only ever trusts the single,
//! top-level `targets` role a repository's `snapshot.json` names.
//!
//! [spec]: https://theupdateframework.github.io/
//!
//! # Testing
//!
//! Unit tests are run in the usual manner: `cargo test`. Tests that exercise [`HttpTransport`]
//! require the `http` feature: `cargo test --features http`.

#![forbid(missing_debug_implementations, missing_copy_implementations)]
#![deny(rust_2018_idioms)]
// missing_docs is on its own line to make it easy to comment out when making changes.
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

mod client;
mod datastore;
mod decode;
pub mod download;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
mod io;
mod keydb;
pub mod schema;
mod transport;
mod urlpath;

pub use crate::client::{Client, Limits, TargetsDelta};
pub use crate::datastore::{FilesystemStore, LocalStore, MemoryStore};
pub use crate::download::{Destination, FileDestination, VecDestination};
/// An HTTP transport that includes retries.
#[cfg(feature = "http")]
pub use crate::http::{ClientSettings, HttpTransport, RetryRead};
pub use crate::transport::{
    DefaultTransport, FilesystemTransport, RemoteStore, Transport, TransportError,
    TransportErrorKind, TransportRemoteStore,
};
