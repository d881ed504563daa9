//! Command implementations for the nomad CLI.

use crate::{
    actions::DraftPost,
    auth::AuthRelayerClient,
    cache::{ViewDefinition, ViewFilter},
    cli::args::ViewArgs,
    cli::utils::{
        format_timestamp, open_session, prompt_for_new_password, prompt_for_password,
        unlocked_session,
    },
    config::ClientConfig,
    crypto::IdentityKey,
    identity::Identity,
    log::{current_timestamp_millis, AppendReceipt, ModerationType},
    relayer::HttpRelayer,
    Result,
};
use tracing::{info, warn};

fn report(action: &str, receipt: &AppendReceipt) {
    info!(
        refhash = %receipt.refhash,
        offset = receipt.offset,
        next_offset = receipt.next_offset,
        committed = format_timestamp(receipt.timestamp),
        "✅ {} committed",
        action
    );
    println!("{}", receipt.refhash);
}

/// Execute identity add command
pub async fn identity_add(
    config: &ClientConfig,
    tld: &str,
    subdomain: &str,
    private_key: Option<&str>,
    register: bool,
) -> Result<()> {
    let identity = Identity::with_subdomain(tld, subdomain)?;
    let key = match private_key {
        Some(hex_key) => IdentityKey::from_hex(hex_key)?,
        None => IdentityKey::generate(),
    };
    let password = prompt_for_new_password(&format!("New password for {}", identity))?;

    let mut session = open_session(config)?;
    let public_key = session.add_tld(identity.clone(), key, &password)?;

    if register {
        let relayer = HttpRelayer::new(&config.indexer_api, config.request_timeout)?;
        relayer.register_identity(&identity, &public_key).await?;
        info!(identity = %identity, "registered public key with relayer");
    }

    info!(identity = %identity, public_key = %public_key.to_hex(), "✅ Identity stored");
    println!("{} {}", identity, public_key.to_hex());
    Ok(())
}

/// Execute identity show command
pub fn identity_show(config: &ClientConfig, unlock: bool) -> Result<()> {
    let session = if unlock {
        unlocked_session(config)?
    } else {
        open_session(config)?
    };
    match session.current_identity() {
        Some(identity) => {
            let public_key = session.public_key_hex().unwrap_or_else(|| "(locked)".into());
            println!("{} {}", identity, public_key);
        }
        None => warn!("No identity stored"),
    }
    Ok(())
}

/// Execute identity list command
pub fn identity_list(config: &ClientConfig) -> Result<()> {
    let session = open_session(config)?;
    let current = session.current_identity().map(Identity::username);
    for username in session.identities().saved_identities()? {
        let marker = if current.as_deref() == Some(username.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{} {}", marker, username);
    }
    Ok(())
}

/// Execute identity remove command
pub fn identity_remove(config: &ClientConfig) -> Result<()> {
    let session = open_session(config)?;
    session.identities().remove_identity()?;
    info!("Removed stored identity token");
    Ok(())
}

/// Execute post command
///
/// With `truncate_at`, the post is written at that offset and the log is
/// truncated there first.
pub async fn post(
    config: &ClientConfig,
    draft: DraftPost,
    truncate_at: Option<u64>,
) -> Result<()> {
    let mut session = unlocked_session(config)?;
    let posted = match truncate_at {
        Some(offset) => session.send_post_at(draft, offset, true).await?,
        None => session.send_post(draft).await?,
    };
    report("Post", &posted.post);
    for (setting, outcome) in &posted.settings {
        match outcome {
            Ok(receipt) => report(&format!("{:?} setting", setting), receipt),
            Err(e) => warn!(setting = ?setting, error = %e, "⚠️  Setting not applied"),
        }
    }
    Ok(())
}

/// Execute reply command
pub async fn reply(config: &ClientConfig, parent: &str, body: &str) -> Result<()> {
    let mut session = unlocked_session(config)?;
    let receipt = session.send_reply(parent, DraftPost::new(body)).await?;
    report("Reply", &receipt);
    Ok(())
}

/// Execute follow command
pub async fn follow(config: &ClientConfig, tld: &str) -> Result<()> {
    let mut session = unlocked_session(config)?;
    let receipt = session.follow_user(tld).await?;
    report("Follow", &receipt);
    Ok(())
}

/// Execute block command
pub async fn block(config: &ClientConfig, tld: &str) -> Result<()> {
    let mut session = unlocked_session(config)?;
    let receipt = session.block_user(tld).await?;
    report("Block", &receipt);
    Ok(())
}

/// Execute like command
pub async fn like(config: &ClientConfig, reference: &str) -> Result<()> {
    let mut session = unlocked_session(config)?;
    let receipt = session.send_moderation(reference, ModerationType::Like).await?;
    report("Like", &receipt);
    Ok(())
}

/// Local preference edits
pub enum Preference<'a> {
    Mute(&'a str),
    Unmute(&'a str),
    Hide(&'a str),
    Unhide(&'a str),
}

/// Execute mute / unmute / hide / unhide commands
pub fn preference(config: &ClientConfig, edit: Preference<'_>) -> Result<()> {
    let mut session = open_session(config)?;
    let data = match edit {
        Preference::Mute(name) => session.mute_name(name)?,
        Preference::Unmute(name) => session.unmute_name(name)?,
        Preference::Hide(hash) => session.hide_post(hash)?,
        Preference::Unhide(hash) => session.unhide_post(hash)?,
    };
    info!(
        muted = data.muted_names.len(),
        hidden = data.hidden_post_hashes.len(),
        "Preferences saved"
    );
    Ok(())
}

fn view_definition(args: ViewArgs) -> ViewDefinition {
    ViewDefinition {
        title: args.title,
        heading: args.heading,
        icon_url: args.icon_url,
        filter: ViewFilter {
            posted_by: args.posted_by,
            replied_by: args.replied_by,
            liked_by: args.liked_by,
            allowed_tags: args.allowed_tags,
        },
    }
}

/// Execute views list command
pub fn views_list(config: &ClientConfig) -> Result<()> {
    let mut session = open_session(config)?;
    let data = session.fetch_current_user_data()?;
    if data.saved_views.is_empty() {
        info!("No saved views");
    }
    for (index, view) in data.saved_views.iter().enumerate() {
        println!(
            "{:>3}  {}  posted_by={:?} replied_by={:?} liked_by={:?} tags={:?}",
            index,
            view.title,
            view.filter.posted_by,
            view.filter.replied_by,
            view.filter.liked_by,
            view.filter.allowed_tags
        );
    }
    Ok(())
}

/// Execute views add command
pub fn views_add(config: &ClientConfig, args: ViewArgs) -> Result<()> {
    let mut session = open_session(config)?;
    let data = session.create_view(view_definition(args))?;
    info!(views = data.saved_views.len(), "✅ View saved");
    Ok(())
}

/// Execute views set command
pub fn views_set(config: &ClientConfig, index: usize, args: ViewArgs) -> Result<()> {
    let mut session = open_session(config)?;
    session.save_custom_view(view_definition(args), index)?;
    info!(index, "✅ View replaced");
    Ok(())
}

/// Execute flush command
pub async fn flush(config: &ClientConfig) -> Result<()> {
    let mut session = open_session(config)?;
    let report = session.flush_update_queue(current_timestamp_millis()).await?;
    for hash in &report.confirmed {
        println!("confirmed {}", hash);
    }
    for hash in &report.pending {
        println!("pending   {}", hash);
    }
    Ok(())
}

/// Execute offset command
pub async fn offset(config: &ClientConfig) -> Result<()> {
    let session = open_session(config)?;
    let identity = session
        .current_identity()
        .cloned()
        .ok_or_else(|| crate::NomadError::invalid_input("No identity stored"))?;
    let offset = session.log().resolve_offset(&identity).await?;
    println!("{} {}", identity, offset);
    Ok(())
}

/// Execute subdomain login command
pub async fn subdomain_login(config: &ClientConfig, tld: &str, subdomain: &str) -> Result<()> {
    let client = AuthRelayerClient::new(&config.auth_relayer_url, config.request_timeout)?;
    let password = prompt_for_password(&format!("Password for {}.{}", subdomain, tld))?;
    let payload = client.login(tld, subdomain, password.as_str()).await?;
    println!("{}", payload);
    Ok(())
}

/// Execute subdomain signup command
pub async fn subdomain_signup(
    config: &ClientConfig,
    tld: &str,
    subdomain: &str,
    email: &str,
) -> Result<()> {
    let client = AuthRelayerClient::new(&config.auth_relayer_url, config.request_timeout)?;
    let password = prompt_for_new_password(&format!("New password for {}.{}", subdomain, tld))?;
    client
        .signup(tld, subdomain, email, password.as_str())
        .await?;
    info!(tld, subdomain, "✅ Subdomain registered");
    Ok(())
}

/// Builds a draft from post flags.
pub fn draft_post(
    body: String,
    title: Option<String>,
    topic: Option<String>,
    tags: Vec<String>,
    no_blocks: bool,
    follows_only: bool,
) -> DraftPost {
    let mut settings = Vec::new();
    if no_blocks {
        settings.push(ModerationType::NoBlocks);
    }
    if follows_only {
        settings.push(ModerationType::FollowsOnly);
    }
    DraftPost {
        title,
        body,
        topic,
        tags,
        settings,
    }
}
