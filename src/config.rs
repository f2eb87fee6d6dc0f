/// 运行时读取 API Key 的环境变量，按顺序查找
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone)]
pub struct Config {
    // 应用信息
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 音频配置
    pub audio_device: &'static str,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_stream_format: &'static str,
    pub audio_period_size: usize,

    // 模型配置
    pub api_base: &'static str,
    pub chat_model: &'static str,
    pub tts_model: &'static str,
    pub voice: &'static str,
    pub context_char_limit: usize,
    pub request_timeout_secs: u64,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            audio_device: env!("AUDIO_DEVICE"),
            audio_sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            audio_channels: env!("AUDIO_CHANNELS").parse()
                .map_err(|_| "Failed to parse AUDIO_CHANNELS")?,
            audio_stream_format: env!("AUDIO_STREAM_FORMAT"),
            audio_period_size: env!("AUDIO_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_PERIOD_SIZE")?,

            api_base: env!("MODEL_API_BASE"),
            chat_model: env!("MODEL_CHAT"),
            tts_model: env!("MODEL_TTS"),
            voice: env!("MODEL_VOICE"),
            context_char_limit: env!("MODEL_CONTEXT_CHAR_LIMIT").parse()
                .map_err(|_| "Failed to parse MODEL_CONTEXT_CHAR_LIMIT")?,
            request_timeout_secs: env!("MODEL_REQUEST_TIMEOUT_SECS").parse()
                .map_err(|_| "Failed to parse MODEL_REQUEST_TIMEOUT_SECS")?,
        })
    }

    /// API Key 不编译进二进制，运行时从环境变量读取
    pub fn api_key() -> Option<String> {
        API_KEY_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
    }
}
