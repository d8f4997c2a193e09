#![doc = "press-sync-core: core logic library for press-sync."]

//! This crate holds the WordPress → Hexo migration pipeline: fetching, HTML to
//! Markdown conversion, image localization, idempotent writes and the commit step.
//! Network and git access go through the traits in [`contract`].
//!
//! # Usage
//! Build a [`config::SyncConfig`], pick a [`contract::SourceClient`] and a
//! [`contract::VersionControl`], then call [`synchronise::synchronise`].

pub mod config;
pub mod contract;
pub mod document;
pub mod download;
pub mod error;
pub mod images;
pub mod markdown;
pub mod output;
pub mod posts;
pub mod publish;
pub mod synchronise;
pub mod taxonomy;
pub mod transform;
