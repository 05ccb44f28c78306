//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AGENTFLOW__*` 覆盖（双下划线表示嵌套，如 `AGENTFLOW__FLOW__AGENT_RECURSION_LIMIT=3`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub flow: FlowSection,
    pub storage: StorageSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 构建状态时保留的历史轮数
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_history_turns: default_max_history_turns(),
        }
    }
}

fn default_max_history_turns() -> usize {
    20
}

/// [llm] 段：后端选择与超时；具体 model_id 以 bot 配置为准，这里是兜底
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmProviderSection,
    #[serde(default)]
    pub openai: LlmProviderSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmProviderSection::default(),
            openai: LlmProviderSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmProviderSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [flow] 段：阶段图参数
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSection {
    /// plan 阶段最多调用次数（bot 配置可覆盖）
    #[serde(default = "default_agent_recursion_limit")]
    pub agent_recursion_limit: usize,
    /// 意图检索器未声明阈值时使用
    #[serde(default = "default_intention_threshold")]
    pub intention_threshold: f32,
    /// 被选中时强制走全量知识检索的工具名
    #[serde(default = "default_retrieval_tools")]
    pub retrieval_tools: Vec<String>,
    #[serde(default = "default_scene")]
    pub scene: String,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_enable_trace")]
    pub enable_trace: bool,
    /// 天气工具的查询端点，`{city}` 会被替换
    #[serde(default = "default_weather_endpoint")]
    pub weather_endpoint: String,
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            agent_recursion_limit: default_agent_recursion_limit(),
            intention_threshold: default_intention_threshold(),
            retrieval_tools: default_retrieval_tools(),
            scene: default_scene(),
            tool_timeout_secs: default_tool_timeout_secs(),
            enable_trace: default_enable_trace(),
            weather_endpoint: default_weather_endpoint(),
        }
    }
}

fn default_agent_recursion_limit() -> usize {
    5
}

fn default_intention_threshold() -> f32 {
    0.4
}

fn default_retrieval_tools() -> Vec<String> {
    vec![
        "QA".into(),
        "service_availability".into(),
        "explain_abbr".into(),
    ]
}

fn default_scene() -> String {
    crate::tools::COMMON_SCENE.to_string()
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_enable_trace() -> bool {
    true
}

fn default_weather_endpoint() -> String {
    "https://wttr.in/{city}?format=3".to_string()
}

/// [storage] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageSection {
    /// SQLite 会话历史；未设置时使用内存存储
    pub history_db: Option<PathBuf>,
    /// bot 定义文件（TOML，`[[bots]]`）
    pub bots_file: Option<PathBuf>,
    /// 内存检索的语料文件（TOML，`[[documents]]`）
    pub corpus_file: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 AGENTFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AGENTFLOW__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AGENTFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
