use clap::{Parser, Subcommand};

/// Cross-checks ranked-choice election results across independent counting
/// backends.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (directory path) Location of the elections repository. The repository
    /// holds one directory per completed election under completed/.
    #[clap(long, value_parser, default_value = "elections")]
    pub repo: String,

    /// (file path or program name) The single-shot counting backend to
    /// invoke. Looked up on PATH when not an absolute path.
    #[clap(long, value_parser, default_value = "fullcount")]
    pub fullcount_bin: String,

    /// (file path or program name) The iterative counting backend to invoke.
    /// Looked up on PATH when not an absolute path.
    #[clap(long, value_parser, default_value = "stepcount")]
    pub stepcount_bin: String,

    /// Backend invocation timeout, in seconds. An expired timeout aborts the
    /// election being processed.
    #[clap(long, value_parser, default_value_t = 600)]
    pub timeout_secs: u64,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard
    /// output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run every backend over the given elections and verify that their
    /// results agree.
    Compare {
        /// Election names. When empty, every completed election in the
        /// repository is checked.
        #[clap(value_parser)]
        elections: Vec<String>,
    },
    /// Run a single backend over one election and print the canonical result
    /// as JSON.
    Run {
        /// Backend name: fullcount or stepcount.
        #[clap(short, long, value_parser)]
        backend: String,
        /// Election name.
        #[clap(value_parser)]
        election: String,
    },
    /// Parse the master ballot of an election and print it as JSON, keyed by
    /// voter id.
    Dump {
        /// Election name.
        #[clap(value_parser)]
        election: String,
    },
}
