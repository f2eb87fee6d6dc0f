mod audio;
mod chat;
mod config;
mod controller;
mod document;
mod gemini;

use audio::{AlsaProvider, AudioPlayer};
use config::Config;
use controller::{AudioEvent, CoreController, ModelEvent, UserCommand};
use gemini::GeminiClient;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().map_err(anyhow::Error::msg)?;
    log::info!("{} {} starting", config.app_name, config.app_version);

    let Some(api_key) = Config::api_key() else {
        anyhow::bail!("No API key found. Please set the GEMINI_API_KEY (or API_KEY) environment variable.");
    };

    // 音频播放：输出设备在第一次播放时才打开
    let decoder = audio::create_decoder(
        config.audio_stream_format,
        config.audio_sample_rate,
        config.audio_channels,
    )?;
    let player = Arc::new(AudioPlayer::new(
        Box::new(AlsaProvider::new(config.audio_device, config.audio_period_size)),
        decoder,
        config.audio_sample_rate,
        config.audio_channels,
    ));
    let client = Arc::new(GeminiClient::new(&config, api_key)?);

    // 创建通道，用于组件间通信
    let (tx_user, mut rx_user) = mpsc::channel::<UserCommand>(100);
    let (tx_model, mut rx_model) = mpsc::channel::<ModelEvent>(100);
    let (tx_audio, mut rx_audio) = mpsc::channel::<AudioEvent>(100);

    let mut controller = CoreController::new(client, player.clone(), tx_model, tx_audio);

    // 第一个参数可直接指定文档
    if let Some(path) = std::env::args().nth(1) {
        controller.load_document(&PathBuf::from(path));
    } else {
        println!("Load a document to begin: /load <path>  (/help for commands)");
    }

    // 读取标准输入，每行一条命令
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(cmd) = UserCommand::parse(&line) {
                        if tx_user.send(cmd).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    let _ = tx_user.send(UserCommand::Quit).await;
                    break;
                }
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    // 主事件循环
    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(cmd) = rx_user.recv() => {
                if !controller.handle_user_command(cmd).await {
                    break;
                }
            }

            Some(event) = rx_model.recv() => {
                controller.handle_model_event(event).await;
            }

            Some(event) = rx_audio.recv() => {
                controller.handle_audio_event(event).await;
            }
        }
    }

    player.stop();
    Ok(())
}
