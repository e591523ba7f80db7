#![doc = "umbrella-sync-core: reconciliation engine for umbrella-sync."]

//! This crate holds everything that decides *what* to send to the destination list API:
//! entry normalization, pagination, the add/remove delta, chunked mutation and the
//! high-volume ignore list. Transport, config persistence and the CLI live in the
//! `umbrella-sync` crate and plug in through the traits in [`contract`].
//!
//! # Usage
//! Implement [`contract::ListApi`] and [`contract::IgnoreStore`], then call
//! [`synchronise::synchronise`] with the files to mirror.

pub mod blockfile;
pub mod contract;
pub mod delta;
pub mod error;
pub mod fetch;
pub mod ignore;
pub mod matcher;
pub mod mutate;
pub mod normalize;
pub mod synchronise;

pub use error::{ApiError, SyncError};
