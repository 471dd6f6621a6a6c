//! Context assembly — stored thread history plus the new turn.
//!
//! Output order:
//!
//! 1. The thread's original prompt (never truncated)
//! 2. Up to `max_history_turns` completed turns, oldest first
//! 3. The current user turn, with language and style instructions appended
//!
//! A completed turn is a prompt row immediately followed by a reply row.
//! Prompt rows without a reply (including the one just stored for the
//! current turn) are skipped.

use threadsage_core::error::SessionError;
use threadsage_core::message::{ContextEntry, ImageRef};
use threadsage_core::session::{ResponseStyle, StoredMessage, Thread};
use threadsage_core::store::SessionStore;

/// Prompt used when a user sends only an image.
pub const IMAGE_FALLBACK_PROMPT: &str = "Describe the image";

/// Language codes with a dedicated answer instruction.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "vi", "en", "ja", "ko", "fr", "es", "de", "ru", "zh", "zh-TW", "ar",
];

pub fn is_supported_language(code: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&code)
}

/// Answer-language and formatting instruction for `code`.
pub fn language_instruction(code: &str) -> &'static str {
    match code {
        "vi" => {
            "Hãy trả lời bằng tiếng Việt. Trình bày rõ ràng, từng bước. Sử dụng Markdown để định dạng. Viết công thức toán học dễ đọc (ví dụ: f'(x), e^x, x > 0)."
        }
        "ja" => "日本語で応答してください。マークダウンを使用して応答をフォーマットしてください。",
        "ko" => "한국어로 응답하십시오. 마크다운을 사용하여 응답 형식을 지정하십시오.",
        "fr" => "Répondez en français. Formatez la réponse en utilisant Markdown.",
        "es" => "Responde en español. Formatea la respuesta usando Markdown.",
        "de" => "Antworten Sie auf Deutsch. Formatieren Sie die Antwort mit Markdown.",
        "ru" => "Отвечайте на русском языке. Отформатируйте ответ, используя Markdown.",
        "zh" => "请用中文回答。使用 Markdown 格式化回答。",
        "zh-TW" => "請用繁體中文回答。使用 Markdown 格式化回答。",
        "ar" => "الرجاء الرد باللغة العربية. قم بتنسيق الإجابة باستخدام Markdown.",
        _ => "Please respond in English. Format the response using Markdown.",
    }
}

pub fn style_instruction(style: ResponseStyle) -> &'static str {
    match style {
        ResponseStyle::Simple => "Answer briefly.",
        ResponseStyle::Detailed => "Answer in detail, thoroughly and step by step.",
    }
}

/// The prompt text to store and send: the user's text, the image fallback,
/// or a validation error when there is neither.
pub fn effective_prompt(text: &str, image: Option<&ImageRef>) -> Result<String, SessionError> {
    let text = text.trim();
    match (text.is_empty(), image) {
        (false, _) => Ok(text.to_string()),
        (true, Some(_)) => Ok(IMAGE_FALLBACK_PROMPT.to_string()),
        (true, None) => Err(SessionError::Validation(
            "a question needs text or an image".into(),
        )),
    }
}

/// The turn being answered.
#[derive(Debug, Clone)]
pub struct TurnInput<'a> {
    /// Effective prompt, see [`effective_prompt`].
    pub text: &'a str,
    pub image: Option<&'a ImageRef>,
    pub style: ResponseStyle,
    pub language: &'a str,
}

/// A prompt row and the reply that answered it.
struct Turn<'m> {
    prompt: &'m StoredMessage,
    reply: &'m StoredMessage,
}

fn completed_turns(history: &[StoredMessage]) -> Vec<Turn<'_>> {
    history
        .windows(2)
        .filter(|pair| pair[0].is_prompt && !pair[1].is_prompt)
        .map(|pair| Turn {
            prompt: &pair[0],
            reply: &pair[1],
        })
        .collect()
}

/// Builds the ordered provider context for one generation.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    max_history_turns: usize,
}

impl ContextAssembler {
    pub fn new(max_history_turns: usize) -> Self {
        Self { max_history_turns }
    }

    pub fn max_history_turns(&self) -> usize {
        self.max_history_turns
    }

    /// Assemble from an already loaded history in creation order.
    pub fn assemble(
        &self,
        thread: &Thread,
        history: &[StoredMessage],
        turn: &TurnInput<'_>,
    ) -> Vec<ContextEntry> {
        let turns = completed_turns(history);
        let keep_from = turns.len().saturating_sub(self.max_history_turns);
        let kept = &turns[keep_from..];

        let mut entries = Vec::with_capacity(kept.len() * 2 + 2);

        let opening_turn = turns.is_empty() && turn.text == thread.original_prompt;
        if !opening_turn {
            entries.push(ContextEntry::user(&thread.original_prompt));
        }

        for (i, t) in kept.iter().enumerate() {
            let repeats_original =
                i == 0 && keep_from == 0 && t.prompt.body == thread.original_prompt;
            if !repeats_original {
                entries.push(ContextEntry::user(&t.prompt.body));
            }
            entries.push(ContextEntry::assistant(&t.reply.body));
        }

        let content = format!(
            "{}\n\n{}\n{}",
            turn.text,
            language_instruction(turn.language),
            style_instruction(turn.style)
        );
        let current = ContextEntry::user(content);
        entries.push(match turn.image {
            Some(image) => current.with_image(image.clone()),
            None => current,
        });
        entries
    }

    /// Load the thread's history from `store` and assemble.
    pub async fn load(
        &self,
        store: &dyn SessionStore,
        thread: &Thread,
        turn: &TurnInput<'_>,
    ) -> Result<Vec<ContextEntry>, SessionError> {
        let history = store.thread_messages(&thread.id).await?;
        Ok(self.assemble(thread, &history, turn))
    }
}
