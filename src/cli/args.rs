//! Command-line argument parsing for nomad.

use crate::config::{
    ClientConfig, DEFAULT_AUTH_RELAYER, DEFAULT_DATA_DIR, DEFAULT_INDEXER_API,
    DEFAULT_TIMEOUT_SECS,
};
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Nomad - post, follow and moderate from a name-anchored identity
#[derive(Parser, Debug)]
#[command(name = "nomad", version)]
#[command(about = "Client for a name-anchored decentralized social network")]
pub struct Cli {
    /// Relayer / indexer base URL
    #[arg(long, global = true, env = "NOMAD_INDEXER_API", default_value = DEFAULT_INDEXER_API)]
    pub indexer_api: String,

    /// Subdomain auth relayer base URL
    #[arg(long, global = true, env = "NOMAD_AUTH_RELAYER", default_value = DEFAULT_AUTH_RELAYER)]
    pub auth_relayer: String,

    /// Directory of the local store
    #[arg(long, global = true, env = "NOMAD_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// HTTP request timeout in seconds
    #[arg(long, global = true, env = "NOMAD_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Client configuration from flags and environment.
    pub fn config(&self) -> Result<ClientConfig> {
        let config = ClientConfig {
            indexer_api: self.indexer_api.clone(),
            auth_relayer_url: self.auth_relayer.clone(),
            data_dir: self.data_dir.clone(),
            request_timeout: Duration::from_secs(self.timeout_secs.max(1)),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the local identity
    Identity {
        #[command(subcommand)]
        command: IdentityCommand,
    },
    /// Publish a post
    Post {
        /// Post body
        body: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        topic: Option<String>,
        /// Tag, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Blocked identities may not reply
        #[arg(long)]
        no_blocks: bool,
        /// Only followed identities may reply
        #[arg(long)]
        follows_only: bool,
        /// Write at this offset, truncating the log there first
        #[arg(long)]
        truncate_at: Option<u64>,
    },
    /// Reply to a post
    Reply {
        /// Parent post hash
        parent: String,
        body: String,
    },
    /// Follow an identity
    Follow { tld: String },
    /// Block an identity
    Block { tld: String },
    /// Like a post
    Like { reference: String },
    /// Mute a name locally
    Mute { name: String },
    /// Unmute a name
    Unmute { name: String },
    /// Hide a post locally
    Hide { hash: String },
    /// Unhide a post
    Unhide { hash: String },
    /// Manage saved views
    Views {
        #[command(subcommand)]
        command: ViewsCommand,
    },
    /// Reconcile pending commits with the relayer
    Flush,
    /// Show the current log offset of the active identity
    Offset,
    /// Subdomain accounts on the auth relayer
    Subdomain {
        #[command(subcommand)]
        command: SubdomainCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum IdentityCommand {
    /// Store a new identity encrypted under a password
    Add {
        tld: String,
        #[arg(long, default_value = "")]
        subdomain: String,
        /// Hex private key; a fresh key is generated when omitted
        #[arg(long)]
        private_key: Option<String>,
        /// Register the public key with a development relayer
        #[arg(long)]
        register: bool,
    },
    /// Show the active identity
    Show {
        /// Decrypt the key to print the public key
        #[arg(long)]
        unlock: bool,
    },
    /// List saved identities
    List,
    /// Forget the active identity's stored token
    Remove,
}

#[derive(Subcommand, Debug)]
pub enum ViewsCommand {
    /// List saved views
    List,
    /// Add a saved view
    Add {
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Replace the saved view at an index
    Set {
        index: usize,
        #[command(flatten)]
        view: ViewArgs,
    },
}

/// Fields of a saved view
#[derive(clap::Args, Debug, Clone)]
pub struct ViewArgs {
    pub title: String,
    #[arg(long, default_value = "")]
    pub heading: String,
    #[arg(long, default_value = "")]
    pub icon_url: String,
    #[arg(long = "posted-by")]
    pub posted_by: Vec<String>,
    #[arg(long = "replied-by")]
    pub replied_by: Vec<String>,
    #[arg(long = "liked-by")]
    pub liked_by: Vec<String>,
    #[arg(long = "tag")]
    pub allowed_tags: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum SubdomainCommand {
    /// Log a subdomain in
    Login { tld: String, subdomain: String },
    /// Register a subdomain
    Signup {
        tld: String,
        subdomain: String,
        #[arg(long)]
        email: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_post() {
        let cli = Cli::try_parse_from([
            "nomad", "post", "hello", "--title", "hi", "--tag", "a", "--tag", "b", "--no-blocks",
        ])
        .unwrap();
        match cli.command {
            Command::Post {
                body,
                title,
                tags,
                no_blocks,
                follows_only,
                truncate_at,
                ..
            } => {
                assert_eq!(body, "hello");
                assert_eq!(truncate_at, None);
                assert_eq!(title.as_deref(), Some("hi"));
                assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
                assert!(no_blocks);
                assert!(!follows_only);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_post_truncate_at() {
        let cli = Cli::try_parse_from(["nomad", "post", "fixed", "--truncate-at", "3"]).unwrap();
        match cli.command {
            Command::Post { truncate_at, .. } => assert_eq!(truncate_at, Some(3)),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "nomad",
            "offset",
            "--indexer-api",
            "https://relayer.example",
            "--timeout-secs",
            "3",
        ])
        .unwrap();
        let config = cli.config().unwrap();
        assert_eq!(config.indexer_api, "https://relayer.example");
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }
}
