//! Pipeline stages for Markdown-to-thread conversion.
//!
//! Each submodule implements one transformation step, so each is testable on
//! its own and the external capabilities (lexer, stripper, rasteriser) can be
//! swapped behind their traits.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ lexer ──▶ raster ──▶ substitute ──▶ normalize ──▶ segment ──▶ run
//! (file)   (blocks)  (cards,    (offset       (strip around  (posts)    (snapshot,
//!                     parallel)  replacement)  tokens)                   spans)
//! ```
//!
//! 1. [`input`]      — read a file or stdin into a UTF-8 document
//! 2. [`lexer`]      — fenced code blocks and tables with exact byte spans
//! 3. [`raster`]     — render blocks to PNG cards; CPU work on `spawn_blocking`
//! 4. [`substitute`] — fan out rasterisation, replace each rendered block by
//!    its [`placeholder`] token
//! 5. [`normalize`]  — Markdown → plain text with [`strip`], tokens protected
//! 6. [`segment`]    — split into length-bounded posts at lines and [`breaks`]
//! 7. [`cursor`]     — map a raw cursor offset to the post being edited
//!
//! [`run`] strings the stages together into one immutable snapshot.

pub mod breaks;
pub mod cursor;
pub mod encode;
pub mod input;
pub mod lexer;
pub mod normalize;
pub mod placeholder;
pub mod raster;
pub mod run;
pub mod segment;
pub mod strip;
pub mod substitute;
