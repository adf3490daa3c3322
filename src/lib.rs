//! # formfill
//!
//! Upload spreadsheet templates, fill their `{{placeholder}}` tokens and keep
//! a log of every fill.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ HTTP/CLI │──▶│ Template     │──▶│ Placeholder  │──▶│  SQLite  │
//! │          │   │ Store (dir)  │   │ Filler       │   │  log     │
//! └──────────┘   └──────────────┘   └──────┬───────┘   └──────────┘
//!                                          │
//!                                    signature images
//!                                     (HTTP fetch)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! formfill init                               # create upload dir + database
//! formfill upload ./sample_v2_form.xlsx       # add a template
//! formfill fill sample_v2_form.xlsx --field name=Ada
//! formfill serve                              # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration + environment overrides |
//! | [`models`] | Core data types |
//! | [`error`] | Domain error type |
//! | [`version`] | Version tags from file names |
//! | [`templates`] | Template store (upload directory) |
//! | [`xlsx`] | Workbook package reading and patching |
//! | [`placeholder`] | Token matching and substitution |
//! | [`fetch`] | Signature image download |
//! | [`fill`] | Placeholder filler |
//! | [`records`] | Fill record log |
//! | [`service`] | Fill pipeline shared by HTTP and CLI |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod fill;
pub mod migrate;
pub mod models;
pub mod placeholder;
pub mod records;
pub mod server;
pub mod service;
pub mod templates;
pub mod version;
pub mod xlsx;
