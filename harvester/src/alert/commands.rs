//! Operator command surface. Answers come from the store's aggregate counts,
//! never from pipeline state, so the listener needs no coordination with the
//! ingestion task.

use crate::store::RecordStore;
use async_trait::async_trait;
use harvester_core::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub update_id: i64,
    pub chat_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub text: String,
}

/// Inbound side of the alert channel.
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    async fn poll_commands(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<InboundCommand>>;

    async fn reply(&self, chat_id: i64, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TotalStats,
    Stats,
    Info,
    Other,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        // "/stats@SomeBot extra" addresses the bot explicitly in group chats
        let word = text.split_whitespace().next().unwrap_or_default();
        let word = word.split('@').next().unwrap_or_default();
        match word {
            "/totalstats" => Command::TotalStats,
            "/stats" => Command::Stats,
            "/info" => Command::Info,
            _ => Command::Other,
        }
    }
}

pub struct CommandListener {
    channel: Arc<dyn OperatorChannel>,
    store: Arc<dyn RecordStore>,
    tag: String,
    poll_timeout: Duration,
}

impl CommandListener {
    pub fn new(
        channel: Arc<dyn OperatorChannel>,
        store: Arc<dyn RecordStore>,
        tag: String,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            store,
            tag,
            poll_timeout,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut offset = None;
        loop {
            match self.channel.poll_commands(offset, self.poll_timeout).await {
                Ok(commands) => {
                    for command in commands {
                        offset = Some(command.update_id + 1);
                        self.handle(&command).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Polling operator commands failed");
                    tokio::time::sleep(POLL_ERROR_PAUSE).await;
                }
            }
        }
    }

    pub async fn respond(&self, command: Command, sender_id: Option<i64>) -> String {
        match command {
            Command::TotalStats => match self.store.count_all().await {
                Ok(count) => format!("Total saved records: {count}"),
                Err(e) => format!("[{}] Could not count records: {e}", self.tag),
            },
            Command::Stats => match self.store.count_by_tag(&self.tag).await {
                Ok(count) => format!("Total saved records for {}: {count}", self.tag),
                Err(e) => format!("[{}] Could not count records: {e}", self.tag),
            },
            Command::Info => match sender_id {
                Some(id) => format!("Your ID is {id}"),
                None => "Your ID is unknown".to_string(),
            },
            Command::Other => format!("[{}] All seems fine here! :)", self.tag),
        }
    }

    async fn handle(&self, inbound: &InboundCommand) {
        let Some(chat_id) = inbound.chat_id else {
            return;
        };

        let command = Command::parse(&inbound.text);
        debug!(?command, chat_id, "Operator command");

        let answer = self.respond(command, inbound.sender_id).await;
        if let Err(e) = self.channel.reply(chat_id, &answer).await {
            warn!(error = %e, chat_id, "Failed to answer operator command");
        }
    }
}
