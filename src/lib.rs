//! # PaperRoute
//!
//! Intake core for a document pipeline: scanned letters and photos land in a
//! watch directory, are run through OCR, and come out as structured,
//! classified Markdown routed to a recipient.
//!
//! This crate holds the pieces every later stage depends on: the validated
//! configuration, the data records passed between stages, and the OCR client.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ config.yaml  │──▶│ ConfigLoader │──▶│   Config     │
//! │ + .env + ${} │   │  (cached)    │   │ (validated)  │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │
//!                     ┌────────────────────────┤
//!                     ▼                        ▼
//!              ┌──────────────┐        ┌──────────────┐
//!              │  OcrClient   │──────▶ │  OcrResult   │
//!              │ retry/backoff│        │  (models)    │
//!              └──────────────┘        └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! paperroute check                 # load and validate config.yaml
//! paperroute ocr scan.pdf          # extract text from one file
//! paperroute ocr scan.pdf --json   # ... as an OcrResult JSON object
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | YAML configuration, env substitution, caching loader |
//! | [`models`] | Validated pipeline records |
//! | [`retry`] | Bounded exponential backoff |
//! | [`ocr`] | DeepFellow OCR client |

pub mod config;
pub mod models;
pub mod ocr;
pub mod retry;
