use async_trait::async_trait;
use camino::Utf8Path;
use teloxide::payloads::SendAudioSetters;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};

use crate::domain::{AudioTags, ChatRef};
use crate::error::BotError;

/// A previously sent notice that can be edited or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeRef(pub i32);

/// Outbound side of the chat platform, as seen by the delivery pipeline.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send_notice(&self, chat: ChatRef, text: &str) -> Result<NoticeRef, BotError>;
    async fn edit_notice(&self, chat: ChatRef, notice: NoticeRef, text: &str)
    -> Result<(), BotError>;
    async fn delete_notice(&self, chat: ChatRef, notice: NoticeRef) -> Result<(), BotError>;
    async fn send_audio(
        &self,
        chat: ChatRef,
        path: &Utf8Path,
        tags: &AudioTags,
    ) -> Result<(), BotError>;
    async fn send_document(&self, chat: ChatRef, path: &Utf8Path) -> Result<(), BotError>;
}

#[derive(Clone)]
pub struct TelegramOutbox {
    bot: Bot,
}

impl TelegramOutbox {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn chat_id(chat: ChatRef) -> ChatId {
    ChatId(chat.0)
}

/// Audio upload with title, performer and, when known, duration set.
fn audio_request(
    bot: &Bot,
    chat: ChatRef,
    path: &Utf8Path,
    tags: &AudioTags,
) -> <Bot as Requester>::SendAudio {
    let request = bot
        .send_audio(chat_id(chat), InputFile::file(path.as_std_path().to_path_buf()))
        .title(tags.title.clone())
        .performer(tags.performer.clone());
    if tags.duration_seconds > 0 {
        request.duration(tags.duration_seconds)
    } else {
        request
    }
}

#[async_trait]
impl Outbox for TelegramOutbox {
    async fn send_notice(&self, chat: ChatRef, text: &str) -> Result<NoticeRef, BotError> {
        let message = self
            .bot
            .send_message(chat_id(chat), text)
            .await
            .map_err(|err| BotError::Chat(err.to_string()))?;
        Ok(NoticeRef(message.id.0))
    }

    async fn edit_notice(
        &self,
        chat: ChatRef,
        notice: NoticeRef,
        text: &str,
    ) -> Result<(), BotError> {
        self.bot
            .edit_message_text(chat_id(chat), MessageId(notice.0), text)
            .await
            .map_err(|err| BotError::Chat(err.to_string()))?;
        Ok(())
    }

    async fn delete_notice(&self, chat: ChatRef, notice: NoticeRef) -> Result<(), BotError> {
        self.bot
            .delete_message(chat_id(chat), MessageId(notice.0))
            .await
            .map_err(|err| BotError::Chat(err.to_string()))?;
        Ok(())
    }

    async fn send_audio(
        &self,
        chat: ChatRef,
        path: &Utf8Path,
        tags: &AudioTags,
    ) -> Result<(), BotError> {
        let request = audio_request(&self.bot, chat, path, tags);
        request
            .await
            .map_err(|err| BotError::UploadFailed(err.to_string()))?;
        Ok(())
    }

    async fn send_document(&self, chat: ChatRef, path: &Utf8Path) -> Result<(), BotError> {
        self.bot
            .send_document(chat_id(chat), InputFile::file(path.as_std_path().to_path_buf()))
            .await
            .map_err(|err| BotError::UploadFailed(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use teloxide::requests::HasPayload;
    use teloxide::types::Recipient;

    use super::*;

    fn tags(duration_seconds: u32) -> AudioTags {
        AudioTags {
            title: "Kuzu Kuzu".to_string(),
            performer: "Tarkan".to_string(),
            duration_seconds,
        }
    }

    #[test]
    fn audio_request_carries_tags() {
        let bot = Bot::new("123:test");
        let request = audio_request(&bot, ChatRef(7), Utf8Path::new("song.mp3"), &tags(215));
        let payload = request.payload_ref();
        assert_eq!(payload.chat_id, Recipient::Id(ChatId(7)));
        assert_eq!(payload.title.as_deref(), Some("Kuzu Kuzu"));
        assert_eq!(payload.performer.as_deref(), Some("Tarkan"));
        assert_eq!(payload.duration, Some(215));
    }

    #[test]
    fn unknown_duration_is_left_out() {
        let bot = Bot::new("123:test");
        let request = audio_request(&bot, ChatRef(7), Utf8Path::new("song.mp3"), &tags(0));
        assert_eq!(request.payload_ref().duration, None);
    }
}
