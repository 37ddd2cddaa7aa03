//! Stego worker: runs steganography jobs against an external tool and
//! streams their progress.

pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod process;
pub mod workspace;
