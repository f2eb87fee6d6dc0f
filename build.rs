use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    model: Model,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    device: String,
    sample_rate: u32,
    channels: u16,
    stream_format: String,
    period_size: usize,
}

#[derive(Deserialize)]
struct Model {
    api_base: String,
    chat_model: String,
    tts_model: String,
    voice: String,
    context_char_limit: usize,
    request_timeout_secs: u64,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_DEVICE={}", config.audio.device);
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_STREAM_FORMAT={}", config.audio.stream_format);
    println!("cargo:rustc-env=AUDIO_PERIOD_SIZE={}", config.audio.period_size);

    // 模型配置
    println!("cargo:rustc-env=MODEL_API_BASE={}", config.model.api_base);
    println!("cargo:rustc-env=MODEL_CHAT={}", config.model.chat_model);
    println!("cargo:rustc-env=MODEL_TTS={}", config.model.tts_model);
    println!("cargo:rustc-env=MODEL_VOICE={}", config.model.voice);
    println!("cargo:rustc-env=MODEL_CONTEXT_CHAR_LIMIT={}", config.model.context_char_limit);
    println!("cargo:rustc-env=MODEL_REQUEST_TIMEOUT_SECS={}", config.model.request_timeout_secs);
}
