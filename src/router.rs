use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::domain::{ChatRef, DeliveryReport};
use crate::error::BotError;
use crate::fetcher::{BoundedFetcher, Fetcher, SpotdlFetcher};
use crate::link::{Expander, LinkExpander, extract_spotify_link};
use crate::outbox::{Outbox, TelegramOutbox};
use crate::pipeline::Pipeline;
use crate::quota::{FileQuotaStore, QuotaStore};
use crate::resolver::{Resolver, SpotdlResolver};

pub const WELCOME_TEXT: &str = "Welcome to tunedrop!\n\n\
Send me a Spotify track, album or playlist link and I will send the songs back as MP3 files.\n\
To look a song up by name, use /search <song name>.";

pub const HELP_TEXT: &str = "HELP\n\n\
1. Download by link: paste a Spotify track, album or playlist link into the chat.\n\
2. Download by search: /search artist - song name\n\
   Example: /search Tarkan - Kuzu Kuzu\n\
3. Whole playlist as one zip file: /playlist <link>";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "show the welcome message")]
    Start,
    #[command(description = "show usage help")]
    Help,
    #[command(description = "download the songs behind a Spotify link")]
    Get(String),
    #[command(description = "search for a song by name and download the best match")]
    Search(String),
    #[command(description = "download a playlist or album as one zip archive")]
    Playlist(String),
}

/// What an inbound message asks for, independent of the chat library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Start,
    Help,
    Usage(&'static str),
    Links(String),
    Search(String),
    Bundle(String),
}

pub fn route_command(command: Command) -> Inbound {
    match command {
        Command::Start => Inbound::Start,
        Command::Help => Inbound::Help,
        Command::Get(args) => match first_arg(&args) {
            Some(link) => Inbound::Links(link),
            None => Inbound::Usage("Usage: /get <spotify link>"),
        },
        Command::Search(args) => {
            let query = args.trim();
            if query.is_empty() {
                Inbound::Usage(
                    "Please tell me what to search for.\nExample: /search Duman - Senden Daha Guzel",
                )
            } else {
                Inbound::Search(query.to_string())
            }
        }
        Command::Playlist(args) => match first_arg(&args) {
            Some(link) => Inbound::Bundle(link),
            None => Inbound::Usage("Usage: /playlist <spotify playlist or album link>"),
        },
    }
}

/// Plain text runs the link flow when it carries a Spotify link, and gets
/// the help text otherwise.
pub fn route_text(text: &str) -> Inbound {
    match extract_spotify_link(text) {
        Some(link) => Inbound::Links(link),
        None => Inbound::Help,
    }
}

fn first_arg(args: &str) -> Option<String> {
    args.split_whitespace().next().map(str::to_string)
}

pub type SpotdlPipeline =
    Pipeline<FileQuotaStore, SpotdlResolver, BoundedFetcher<SpotdlFetcher>>;

pub struct BotState {
    pub pipeline: SpotdlPipeline,
    pub expander: LinkExpander,
}

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    dispatch(bot, msg.chat.id, route_command(cmd), state).await
}

pub async fn handle_text(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    dispatch(bot, msg.chat.id, route_text(text), state).await
}

async fn dispatch(
    bot: Bot,
    chat_id: ChatId,
    inbound: Inbound,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    match inbound {
        Inbound::Start => {
            bot.send_message(chat_id, WELCOME_TEXT).await?;
        }
        Inbound::Help => {
            bot.send_message(chat_id, HELP_TEXT).await?;
        }
        Inbound::Usage(text) => {
            bot.send_message(chat_id, text).await?;
        }
        request => {
            // Long batches run on their own task so other chats keep being served.
            tokio::spawn(run_request(bot, ChatRef(chat_id.0), request, state));
        }
    }
    Ok(())
}

async fn run_request(bot: Bot, chat: ChatRef, request: Inbound, state: Arc<BotState>) {
    let outbox = TelegramOutbox::new(bot);
    let result = serve_request(&state.pipeline, &state.expander, chat, request, &outbox).await;
    log_result(chat, result);
}

/// Runs a download request through the pipeline. Links are expanded only
/// after the quota gate passes, so an exhausted quota costs no lookups.
pub async fn serve_request<Q, R, F>(
    pipeline: &Pipeline<Q, R, F>,
    expander: &dyn Expander,
    chat: ChatRef,
    request: Inbound,
    outbox: &dyn Outbox,
) -> Result<DeliveryReport, BotError>
where
    Q: QuotaStore,
    R: Resolver,
    F: Fetcher,
{
    match request {
        Inbound::Links(link) => {
            pipeline.quota_gate(chat, outbox).await?;
            let link = expander.expand_or_keep(&link).await;
            pipeline.deliver_links(chat, &link, outbox).await
        }
        Inbound::Bundle(link) => {
            pipeline.quota_gate(chat, outbox).await?;
            let link = expander.expand_or_keep(&link).await;
            pipeline.deliver_bundle(chat, &link, outbox).await
        }
        Inbound::Search(query) => pipeline.deliver_search(chat, &query, outbox).await,
        Inbound::Start | Inbound::Help | Inbound::Usage(_) => Ok(DeliveryReport::default()),
    }
}

fn log_result(chat: ChatRef, result: Result<DeliveryReport, BotError>) {
    match result {
        Ok(report) => tracing::info!(
            %chat,
            attempted = report.attempted(),
            delivered = report.delivered(),
            "request finished"
        ),
        // the user has already been told
        Err(err @ (BotError::QuotaExhausted { .. } | BotError::ResolutionEmpty(_))) => {
            tracing::info!(%chat, reason = %err, "request stopped")
        }
        Err(err) => tracing::error!(%chat, error = %err, "request failed"),
    }
}
