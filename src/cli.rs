use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stash", about = "Capture, enrich and search personal content", version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture a text note
    AddText {
        /// Note body
        text: String,

        /// Optional title; derived from the first line when omitted
        #[arg(long)]
        title: Option<String>,
    },

    /// Capture a web link
    AddLink {
        /// URL to capture
        url: String,
    },

    /// Capture a file or image from disk
    AddFile {
        /// Path to the file
        path: PathBuf,
    },

    /// Search captured items with a natural-language query
    Search {
        /// Free-text query, e.g. "images with dog"
        query: String,

        /// Maximum number of results
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Minimum semantic similarity score [0.0, 1.0]
        #[arg(long)]
        min_score: Option<f32>,
    },

    /// Show a single item with its content and media
    Show {
        /// Item id
        id: u64,
    },

    /// List all items and their pipeline status
    Status {},

    /// Re-run enrichment for an item
    Retry {
        /// Item id
        id: u64,
    },

    /// Delete an item together with its vector and stored assets
    Delete {
        /// Item id
        id: u64,
    },

    /// Run the enrichment queue until all pending jobs are drained
    Process {},
}
