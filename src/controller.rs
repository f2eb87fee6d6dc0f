use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::{AudioPlayer, PlayOutcome};
use crate::chat::{ANSWER_ERROR_TEXT, ChatSession, Role};
use crate::document::Document;
use crate::gemini::GeminiClient;

/// 界面状态：等待加载文档 / 对话中
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Upload,
    Chat,
}

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Load(PathBuf),
    Ask(String),
    /// 1-based message index, or the last answer
    Speak(Option<usize>),
    Stop,
    History,
    Reset,
    Help,
    Quit,
}

impl UserCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Self::Ask(line.to_string()));
        }

        let (cmd, arg) = match line.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };
        match cmd {
            "/load" if !arg.is_empty() => Some(Self::Load(PathBuf::from(arg))),
            "/speak" if arg.is_empty() => Some(Self::Speak(None)),
            "/speak" => arg.parse().ok().map(|n| Self::Speak(Some(n))),
            "/stop" => Some(Self::Stop),
            "/history" => Some(Self::History),
            "/reset" => Some(Self::Reset),
            "/quit" | "/exit" => Some(Self::Quit),
            _ => Some(Self::Help),
        }
    }
}

/// Results of model calls running in background tasks.
#[derive(Debug)]
pub enum ModelEvent {
    Answer {
        generation: u64,
        result: anyhow::Result<String>,
    },
    Speech {
        message_id: String,
        payload: Option<String>,
    },
}

#[derive(Debug)]
pub enum AudioEvent {
    /// Playback of a message's speech ended naturally or failed
    Ended(String),
}

pub struct CoreController {
    state: AppState,
    session: Option<ChatSession>,
    /// 每次加载或重置文档递增，丢弃旧会话的迟到回答
    generation: u64,
    is_loading: bool,
    generating_audio: Option<String>,
    client: Arc<GeminiClient>,
    player: Arc<AudioPlayer>,
    model_tx: mpsc::Sender<ModelEvent>,
    audio_tx: mpsc::Sender<AudioEvent>,
}

impl CoreController {
    pub fn new(
        client: Arc<GeminiClient>,
        player: Arc<AudioPlayer>,
        model_tx: mpsc::Sender<ModelEvent>,
        audio_tx: mpsc::Sender<AudioEvent>,
    ) -> Self {
        Self {
            state: AppState::Upload,
            session: None,
            generation: 0,
            is_loading: false,
            generating_audio: None,
            client,
            player,
            model_tx,
            audio_tx,
        }
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn session(&self) -> Option<&ChatSession> {
        self.session.as_ref()
    }

    /// Returns `false` when the user asked to quit.
    pub async fn handle_user_command(&mut self, command: UserCommand) -> bool {
        match command {
            UserCommand::Load(path) => self.load_document(&path),
            UserCommand::Ask(question) => self.ask(question),
            UserCommand::Speak(index) => self.speak(index),
            UserCommand::Stop => self.stop_audio(),
            UserCommand::History => self.print_history(),
            UserCommand::Reset => self.reset(),
            UserCommand::Help => print_help(),
            UserCommand::Quit => {
                self.player.stop();
                return false;
            }
        }
        true
    }

    pub fn load_document(&mut self, path: &std::path::Path) {
        match Document::load(path) {
            Ok(document) => {
                log::info!(
                    "Loaded document {} ({} pages, {} chars)",
                    document.name,
                    document.page_count,
                    document.text.len()
                );
                self.player.stop();
                let session = ChatSession::new(document);
                if let Some(greeting) = session.messages().first() {
                    println!("Model: {}", greeting.content);
                }
                self.session = Some(session);
                self.generation += 1;
                self.is_loading = false;
                self.state = AppState::Chat;
            }
            Err(e) => {
                log::error!("Failed to load document: {:#}", e);
                println!("Could not load {}: {:#}", path.display(), e);
            }
        }
    }

    fn ask(&mut self, question: String) {
        if self.is_loading {
            println!("(still waiting for the previous answer)");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            println!("Load a document first: /load <path>");
            return;
        };

        session.push_user(&question);
        let context = session.document().text.clone();
        let history = session.history_before_last().to_vec();
        let generation = self.generation;
        let client = self.client.clone();
        let tx = self.model_tx.clone();
        self.is_loading = true;

        tokio::spawn(async move {
            let result = client.generate_answer(&context, &question, &history).await;
            if let Err(e) = tx.send(ModelEvent::Answer { generation, result }).await {
                log::error!("Failed to deliver answer: {}", e);
            }
        });
    }

    /// Toggle speech for a message, like the play/stop button on a chat bubble.
    fn speak(&mut self, index: Option<usize>) {
        let Some(session) = self.session.as_ref() else {
            println!("Load a document first: /load <path>");
            return;
        };
        let message = match index {
            Some(i) => session.message_by_index(i),
            None => session.last_model_message(),
        };
        let Some(message) = message else {
            println!("No such message");
            return;
        };
        if message.role != Role::Model {
            println!("Only answers can be spoken");
            return;
        }

        if message.is_audio_playing {
            self.stop_audio();
            return;
        }
        if self.generating_audio.is_some() {
            println!("(already generating speech)");
            return;
        }

        let message_id = message.id.clone();
        let text = message.content.clone();
        let client = self.client.clone();
        let tx = self.model_tx.clone();
        self.generating_audio = Some(message_id.clone());

        tokio::spawn(async move {
            let payload = client.generate_speech(&text).await;
            if let Err(e) = tx.send(ModelEvent::Speech { message_id, payload }).await {
                log::error!("Failed to deliver speech: {}", e);
            }
        });
    }

    /// Stop playback and clear the speaking marker at the call site;
    /// a stopped session does not report `AudioEvent::Ended`.
    fn stop_audio(&mut self) {
        self.player.stop();
        if let Some(session) = self.session.as_mut() {
            session.clear_speaking();
        }
    }

    fn reset(&mut self) {
        self.player.stop();
        self.session = None;
        self.generation += 1;
        self.is_loading = false;
        self.generating_audio = None;
        self.state = AppState::Upload;
        println!("Document closed. Load another with /load <path>");
    }

    fn print_history(&self) {
        let Some(session) = self.session.as_ref() else {
            println!("No document loaded");
            return;
        };
        for (i, m) in session.messages().iter().enumerate() {
            let who = match m.role {
                Role::User => "You",
                Role::Model => "Model",
            };
            let marker = if m.is_audio_playing { " [speaking]" } else { "" };
            println!("{:>3}. {}{}: {}", i + 1, who, marker, m.content);
        }
    }

    pub async fn handle_model_event(&mut self, event: ModelEvent) {
        match event {
            ModelEvent::Answer { generation, result } => {
                if generation != self.generation {
                    log::debug!("Dropping answer for a closed document");
                    return;
                }
                self.is_loading = false;
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                let content = match result {
                    Ok(answer) => answer,
                    Err(_) => ANSWER_ERROR_TEXT.to_string(),
                };
                println!("Model: {}", content);
                session.push_model(content);
            }
            ModelEvent::Speech { message_id, payload } => {
                self.generating_audio = None;
                let Some(payload) = payload else {
                    println!("(speech unavailable)");
                    return;
                };
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if session.message_by_id(&message_id).is_none() {
                    return;
                }

                session.mark_speaking(&message_id);
                let tx = self.audio_tx.clone();
                let ended_id = message_id.clone();
                let outcome = self
                    .player
                    .play(
                        &payload,
                        Box::new(move || {
                            // 回调可能在音频线程中触发，不能 await
                            if let Err(e) = tx.try_send(AudioEvent::Ended(ended_id)) {
                                log::warn!("Failed to report playback end: {}", e);
                            }
                        }),
                    )
                    .await;
                if outcome == PlayOutcome::Started {
                    println!("(speaking... /stop to stop)");
                }
            }
        }
    }

    pub async fn handle_audio_event(&mut self, event: AudioEvent) {
        match event {
            AudioEvent::Ended(message_id) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if session.speaking().is_some_and(|m| m.id == message_id) {
                    session.clear_speaking();
                    log::debug!("Finished speaking message {}", message_id);
                }
            }
        }
    }
}

pub fn print_help() {
    println!("Commands:");
    println!("  <question>      ask about the loaded document");
    println!("  /load <path>    load a document (text, pages separated by form feeds)");
    println!("  /speak [n]      read message n (or the last answer) aloud; again to stop");
    println!("  /stop           stop speaking");
    println!("  /history        list messages");
    println!("  /reset          close the document");
    println!("  /quit           exit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PcmS16LeDecoder;
    use crate::audio::testing::{FakeBackend, FakeProvider};
    use crate::config::Config;
    use std::io::Write;

    struct Fixture {
        controller: CoreController,
        backend: FakeBackend,
        audio_rx: mpsc::Receiver<AudioEvent>,
        _model_rx: mpsc::Receiver<ModelEvent>,
    }

    fn fixture() -> Fixture {
        let config = Config::new().unwrap();
        let client = Arc::new(GeminiClient::new(&config, "test-key".into()).unwrap());
        // 内存里的假输出，不碰声卡
        let provider = FakeProvider::new();
        let backend = provider.backend();
        let player = Arc::new(AudioPlayer::new(
            Box::new(provider),
            Box::new(PcmS16LeDecoder::new(24000, 1)),
            24000,
            1,
        ));
        let (model_tx, model_rx) = mpsc::channel(10);
        let (audio_tx, audio_rx) = mpsc::channel(10);
        Fixture {
            controller: CoreController::new(client, player, model_tx, audio_tx),
            backend,
            audio_rx,
            _model_rx: model_rx,
        }
    }

    fn write_doc(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("studymate-{}-{}", std::process::id(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(UserCommand::parse("  "), None);
        assert_eq!(UserCommand::parse("What is ATP?"), Some(UserCommand::Ask("What is ATP?".into())));
        assert_eq!(UserCommand::parse("/load  notes.txt "), Some(UserCommand::Load("notes.txt".into())));
        assert_eq!(UserCommand::parse("/load"), Some(UserCommand::Help));
        assert_eq!(UserCommand::parse("/speak"), Some(UserCommand::Speak(None)));
        assert_eq!(UserCommand::parse("/speak 3"), Some(UserCommand::Speak(Some(3))));
        assert_eq!(UserCommand::parse("/speak x"), None);
        assert_eq!(UserCommand::parse("/stop"), Some(UserCommand::Stop));
        assert_eq!(UserCommand::parse("/exit"), Some(UserCommand::Quit));
        assert_eq!(UserCommand::parse("/nope"), Some(UserCommand::Help));
    }

    #[tokio::test]
    async fn test_load_and_reset() {
        let Fixture { mut controller, audio_rx: _audio_rx, _model_rx, .. } = fixture();
        assert_eq!(controller.state(), AppState::Upload);

        let path = write_doc("load.txt", "page one\x0cpage two");
        controller.handle_user_command(UserCommand::Load(path.clone())).await;
        assert_eq!(controller.state(), AppState::Chat);
        assert_eq!(controller.session().unwrap().document().page_count, 2);

        controller.handle_user_command(UserCommand::Reset).await;
        assert_eq!(controller.state(), AppState::Upload);
        assert!(controller.session().is_none());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_load_failure_keeps_state() {
        let Fixture { mut controller, audio_rx: _audio_rx, _model_rx, .. } = fixture();
        controller
            .handle_user_command(UserCommand::Load("/nonexistent/studymate.txt".into()))
            .await;
        assert_eq!(controller.state(), AppState::Upload);
    }

    #[tokio::test]
    async fn test_answers_appended_and_stale_answers_dropped() {
        let Fixture { mut controller, audio_rx: _audio_rx, _model_rx, .. } = fixture();
        let path = write_doc("answers.txt", "content");
        controller.load_document(&path);
        let generation = controller.generation;

        controller
            .handle_model_event(ModelEvent::Answer { generation, result: Ok("42".into()) })
            .await;
        controller
            .handle_model_event(ModelEvent::Answer {
                generation,
                result: Err(anyhow::anyhow!("offline")),
            })
            .await;
        controller
            .handle_model_event(ModelEvent::Answer {
                generation: generation + 7,
                result: Ok("stale".into()),
            })
            .await;

        let messages = controller.session().unwrap().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "42");
        assert_eq!(messages[2].content, ANSWER_ERROR_TEXT);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_failed_playback_clears_speaking_marker() {
        let Fixture { mut controller, mut audio_rx, _model_rx, .. } = fixture();
        let path = write_doc("speech.txt", "content");
        controller.load_document(&path);
        let greeting_id = controller.session().unwrap().messages()[0].id.clone();

        // 无效负载：play 失败并立即回调
        controller
            .handle_model_event(ModelEvent::Speech {
                message_id: greeting_id.clone(),
                payload: Some("not-valid-base64!!".into()),
            })
            .await;
        assert_eq!(controller.session().unwrap().speaking().unwrap().id, greeting_id);

        let event = audio_rx.recv().await.unwrap();
        controller.handle_audio_event(event).await;
        assert!(controller.session().unwrap().speaking().is_none());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_stop_clears_speaking_marker() {
        let Fixture { mut controller, audio_rx: _audio_rx, _model_rx, .. } = fixture();
        let path = write_doc("stop.txt", "content");
        controller.load_document(&path);
        let greeting_id = controller.session().unwrap().messages()[0].id.clone();

        controller.session.as_mut().unwrap().mark_speaking(&greeting_id);
        controller.handle_user_command(UserCommand::Stop).await;
        assert!(controller.session().unwrap().speaking().is_none());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_finished_playback_clears_speaking_marker() {
        let Fixture { mut controller, backend, mut audio_rx, _model_rx } = fixture();
        let path = write_doc("finished.txt", "content");
        controller.load_document(&path);
        let greeting_id = controller.session().unwrap().messages()[0].id.clone();

        controller
            .handle_model_event(ModelEvent::Speech {
                message_id: greeting_id.clone(),
                payload: Some("AAAAQACA".into()),
            })
            .await;
        assert_eq!(backend.started(), 1);
        assert_eq!(controller.session().unwrap().speaking().unwrap().id, greeting_id);

        backend.finish(0);
        let event = audio_rx.recv().await.unwrap();
        controller.handle_audio_event(event).await;
        assert!(controller.session().unwrap().speaking().is_none());
        let _ = std::fs::remove_file(path);
    }
}
