use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::Chat;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use botbot::alerts::AlertLayer;
use botbot::chatbot::engine::{FeedbackPress, IncomingText};
use botbot::chatbot::feedback::{EvictionPolicy, FeedbackStore, KeepForever, TimeToLive};
use botbot::chatbot::message::ChatType;
use botbot::chatbot::{ChatbotConfig, ChatbotEngine, InferenceClient, TelegramClient};
use botbot::config::Config;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "botbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("botbot.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(AlertLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting botbot...");
    info!("Loaded config from {config_path}");
    info!("Inference endpoint: {}", config.inference_endpoint);

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            Some(me.username().to_string())
        }
        Err(e) => {
            warn!("Failed to get bot info, mentions won't be detected: {e}");
            None
        }
    };

    let policy: Box<dyn EvictionPolicy> = match config.feedback_ttl {
        Some(ttl) => {
            info!("Feedback entries expire after {:?}", ttl);
            Box::new(TimeToLive(ttl))
        }
        None => Box::new(KeepForever),
    };

    let chatbot_config = ChatbotConfig {
        bot_username,
        reply_threshold: config.group_reply_threshold,
        data_dir: config.data_dir.clone(),
        ..ChatbotConfig::default()
    };
    let engine = Arc::new(ChatbotEngine::new(
        chatbot_config,
        Arc::new(InferenceClient::new(config.inference_endpoint.clone())),
        Arc::new(TelegramClient::new(bot.clone())),
        FeedbackStore::new(policy),
    ));

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
                .branch(
                    dptree::filter(|msg: Message| msg.text().is_some_and(|t| !t.starts_with('/')))
                        .endpoint(handle_text),
                ),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn chat_type(chat: &Chat) -> ChatType {
    if chat.is_private() {
        ChatType::Private
    } else if chat.is_group() {
        ChatType::Group
    } else if chat.is_supergroup() {
        ChatType::Supergroup
    } else {
        ChatType::Channel
    }
}

async fn handle_command(msg: Message, cmd: Command, engine: Arc<ChatbotEngine>) -> ResponseResult<()> {
    match cmd {
        Command::Start => {
            engine
                .handle_start(msg.chat.id.0, chat_type(&msg.chat), msg.id.0 as i64)
                .await;
        }
    }
    Ok(())
}

async fn handle_text(msg: Message, engine: Arc<ChatbotEngine>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user = msg.from.as_ref();

    let incoming = IncomingText {
        message_id: msg.id.0 as i64,
        chat_id: msg.chat.id.0,
        chat_type: chat_type(&msg.chat),
        user_id: user.map(|u| u.id.0 as i64).unwrap_or(0),
        username: user.and_then(|u| u.username.clone()),
        text: text.to_string(),
    };
    engine.handle_text(incoming).await;
    Ok(())
}

async fn handle_callback(q: CallbackQuery, engine: Arc<ChatbotEngine>) -> ResponseResult<()> {
    let source = q
        .message
        .as_ref()
        .and_then(|m| m.regular_message())
        .map(|m| (m.chat.id.0, m.id.0 as i64));

    let press = FeedbackPress {
        query_id: q.id.0.clone(),
        user_id: q.from.id.0 as i64,
        username: q.from.username.clone(),
        data: q.data.clone().unwrap_or_default(),
        source,
    };
    engine.handle_feedback(press).await;
    Ok(())
}
