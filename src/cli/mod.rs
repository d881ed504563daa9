//! Command-line interface for nomad.
//!
//! Commands for managing the local identity, writing records to the
//! identity's log, and editing local preferences.

pub mod args;
pub mod commands;
pub mod utils;

use crate::Result;
use clap::Parser;

pub use args::{Cli, Command};
use args::{IdentityCommand, SubdomainCommand, ViewsCommand};
use commands::Preference;

/// Main entry point for the CLI application
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;

    match cli.command {
        Command::Identity { command } => match command {
            IdentityCommand::Add {
                tld,
                subdomain,
                private_key,
                register,
            } => {
                commands::identity_add(&config, &tld, &subdomain, private_key.as_deref(), register)
                    .await
            }
            IdentityCommand::Show { unlock } => commands::identity_show(&config, unlock),
            IdentityCommand::List => commands::identity_list(&config),
            IdentityCommand::Remove => commands::identity_remove(&config),
        },
        Command::Post {
            body,
            title,
            topic,
            tags,
            no_blocks,
            follows_only,
            truncate_at,
        } => {
            let draft = commands::draft_post(body, title, topic, tags, no_blocks, follows_only);
            commands::post(&config, draft, truncate_at).await
        }
        Command::Reply { parent, body } => commands::reply(&config, &parent, &body).await,
        Command::Follow { tld } => commands::follow(&config, &tld).await,
        Command::Block { tld } => commands::block(&config, &tld).await,
        Command::Like { reference } => commands::like(&config, &reference).await,
        Command::Mute { name } => commands::preference(&config, Preference::Mute(&name)),
        Command::Unmute { name } => commands::preference(&config, Preference::Unmute(&name)),
        Command::Hide { hash } => commands::preference(&config, Preference::Hide(&hash)),
        Command::Unhide { hash } => commands::preference(&config, Preference::Unhide(&hash)),
        Command::Views { command } => match command {
            ViewsCommand::List => commands::views_list(&config),
            ViewsCommand::Add { view } => commands::views_add(&config, view),
            ViewsCommand::Set { index, view } => commands::views_set(&config, index, view),
        },
        Command::Flush => commands::flush(&config).await,
        Command::Offset => commands::offset(&config).await,
        Command::Subdomain { command } => match command {
            SubdomainCommand::Login { tld, subdomain } => {
                commands::subdomain_login(&config, &tld, &subdomain).await
            }
            SubdomainCommand::Signup {
                tld,
                subdomain,
                email,
            } => commands::subdomain_signup(&config, &tld, &subdomain, &email).await,
        },
    }
}
