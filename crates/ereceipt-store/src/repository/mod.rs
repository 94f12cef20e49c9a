//! # Repository Module
//!
//! SQL access for the store, isolated behind repository types.
//!
//! ```text
//! Storage::set(key, value)
//!      │
//!      ▼
//! KeyValueRepository::upsert(key, value)
//!      │  INSERT .. ON CONFLICT(key) DO UPDATE
//!      ▼
//! key_value_store table
//! ```
//!
//! ## Available Repositories
//!
//! - [`kv::KeyValueRepository`] - String values addressed by key

pub mod kv;
