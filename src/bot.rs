//! Bot 配置：LLM 设置、分类型 Prompt、启用的工具、知识库与意图检索器
//!
//! 配置按 (bot_id, version) 存取；INACTIVE 或不存在的 bot 在进入阶段图之前即被拒绝。
//! InMemoryBotStore 可从 TOML 文件（`[[bots]]` 数组）加载。

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::retrieval::RetrieverRef;

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum BotVersion {
    #[default]
    Test,
    Prod,
}

impl fmt::Display for BotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotVersion::Test => write!(f, "TEST"),
            BotVersion::Prod => write!(f, "PROD"),
        }
    }
}

impl std::str::FromStr for BotVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TEST" => Ok(BotVersion::Test),
            "PROD" => Ok(BotVersion::Prod),
            other => Err(format!("unknown bot version: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum BotStatus {
    #[default]
    Active,
    Inactive,
}

/// Prompt 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptType {
    General,
    Rag,
    ConvSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    #[serde(rename = "type")]
    pub kind: PromptType,
    pub text: String,
}

/// 检索参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverSettings {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

/// 知识库检索器（qd 模式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseRetriever {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub index: String,
    #[serde(default)]
    pub config: RetrieverSettings,
}

/// 意图检索器的类型：intent 产出意图 few-shot，faq 产出可直接返回的答案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntentionKind {
    #[default]
    Intent,
    Faq,
}

/// 意图检索器（qq 模式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentionRetriever {
    pub index: String,
    /// 只保留 score 严格大于该阈值的结果
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(rename = "type", default)]
    pub kind: IntentionKind,
    #[serde(default)]
    pub config: RetrieverSettings,
}

fn default_threshold() -> f32 {
    0.4
}

/// LLM 设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(rename = "type", default)]
    pub provider: String,
    pub model_id: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.01
}

fn default_max_tokens() -> u32 {
    4096
}

/// bot 启用的工具；profiles 非空时仅对列出的用户画像可见
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotTool {
    pub name: String,
    #[serde(default)]
    pub profiles: Option<Vec<String>>,
}

/// 完整 bot 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub bot_id: String,
    #[serde(default)]
    pub version: BotVersion,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: BotStatus,
    #[serde(default)]
    pub knowledge_base_retrievers: Vec<KnowledgeBaseRetriever>,
    #[serde(default)]
    pub intention_retrievers: Vec<IntentionRetriever>,
    pub llm: LlmSettings,
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub tools: Vec<BotTool>,
    /// 覆盖全局 [flow].agent_recursion_limit
    #[serde(default)]
    pub agent_recursion_limit: Option<usize>,
}

impl BotConfig {
    /// 取指定类型的 prompt 文本；同类型出现多次时以最后一条为准
    pub fn prompt(&self, kind: PromptType) -> Option<&str> {
        self.prompts
            .iter()
            .rev()
            .find(|p| p.kind == kind)
            .map(|p| p.text.as_str())
    }

    /// 对给定用户画像可见的工具名（保持配置顺序）
    pub fn enabled_tools(&self, profile: Option<&str>) -> Vec<String> {
        self.tools
            .iter()
            .filter(|t| match (&t.profiles, profile) {
                (None, _) => true,
                (Some(list), _) if list.is_empty() => true,
                (Some(list), Some(p)) => list.iter().any(|x| x == p),
                (Some(_), None) => false,
            })
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn knowledge_retriever_refs(&self) -> Vec<RetrieverRef> {
        self.knowledge_base_retrievers
            .iter()
            .map(|r| RetrieverRef::new(&r.index, r.config.top_k))
            .collect()
    }

    pub fn intention_retriever_refs(&self) -> Vec<RetrieverRef> {
        self.intention_retrievers
            .iter()
            .map(|r| RetrieverRef::new(&r.index, r.config.top_k))
            .collect()
    }

    /// 按索引名找意图检索器
    pub fn intention_retriever(&self, index: &str) -> Option<&IntentionRetriever> {
        self.intention_retrievers.iter().find(|r| r.index == index)
    }

    pub fn is_active(&self) -> bool {
        self.status == BotStatus::Active
    }
}

/// bot 配置存储（读多写少）
#[async_trait]
pub trait BotConfigStore: Send + Sync {
    async fn get_config(
        &self,
        bot_id: &str,
        version: BotVersion,
    ) -> Result<Option<BotConfig>, AgentError>;
}

/// 读取并校验 bot：不存在返回 BotNotFound，INACTIVE 返回 BotInactive
pub async fn load_active_bot(
    store: &dyn BotConfigStore,
    bot_id: &str,
    version: BotVersion,
) -> Result<BotConfig, AgentError> {
    let bot = store
        .get_config(bot_id, version)
        .await?
        .ok_or_else(|| AgentError::BotNotFound {
            bot_id: bot_id.to_string(),
            version: version.to_string(),
        })?;
    if !bot.is_active() {
        return Err(AgentError::BotInactive(bot_id.to_string()));
    }
    Ok(bot)
}

#[derive(Deserialize)]
struct BotsFile {
    #[serde(default)]
    bots: Vec<BotConfig>,
}

/// 内存 bot 存储
#[derive(Default)]
pub struct InMemoryBotStore {
    bots: RwLock<HashMap<(String, BotVersion), BotConfig>>,
}

impl InMemoryBotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bots(bots: impl IntoIterator<Item = BotConfig>) -> Self {
        let map = bots
            .into_iter()
            .map(|b| ((b.bot_id.clone(), b.version), b))
            .collect();
        Self {
            bots: RwLock::new(map),
        }
    }

    /// 解析 TOML 文本中的 `[[bots]]`
    pub fn from_toml_str(content: &str) -> Result<Self, AgentError> {
        let file: BotsFile =
            toml::from_str(content).map_err(|e| AgentError::ConfigError(e.to_string()))?;
        Ok(Self::with_bots(file.bots))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::ConfigError(format!("read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub async fn put(&self, bot: BotConfig) {
        self.bots
            .write()
            .await
            .insert((bot.bot_id.clone(), bot.version), bot);
    }

    pub async fn len(&self) -> usize {
        self.bots.read().await.len()
    }
}

#[async_trait]
impl BotConfigStore for InMemoryBotStore {
    async fn get_config(
        &self,
        bot_id: &str,
        version: BotVersion,
    ) -> Result<Option<BotConfig>, AgentError> {
        Ok(self
            .bots
            .read()
            .await
            .get(&(bot_id.to_string(), version))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTS: &str = r#"
[[bots]]
bot_id = "a1b2"
version = "TEST"
name = "Test Bot"

[bots.llm]
type = "openai"
model_id = "gpt-4o-mini"

[[bots.prompts]]
type = "GENERAL"
text = "You are a customer service chatbot."

[[bots.prompts]]
type = "CONV_SUMMARY"
text = "History: {history} Question: {question}"

[[bots.intention_retrievers]]
index = "test-intent"

[[bots.intention_retrievers]]
index = "test-faq"
type = "faq"
threshold = 0.8

[[bots.tools]]
name = "get_weather"

[[bots.tools]]
name = "transfer"
profiles = ["vip"]

[[bots]]
bot_id = "old"
version = "PROD"
name = "Retired"
status = "INACTIVE"

[bots.llm]
model_id = "gpt-4o-mini"
"#;

    #[test]
    fn test_parse_bots_file() {
        let store = InMemoryBotStore::from_toml_str(BOTS).unwrap();
        let bots = store.bots.try_read().unwrap();
        let bot = bots.get(&("a1b2".to_string(), BotVersion::Test)).unwrap();
        assert_eq!(bot.llm.max_tokens, 4096);
        assert_eq!(bot.prompt(PromptType::General), Some("You are a customer service chatbot."));
        assert!(bot.prompt(PromptType::Rag).is_none());
        assert_eq!(bot.intention_retrievers[0].threshold, 0.4);
        assert_eq!(bot.intention_retrievers[1].kind, IntentionKind::Faq);
    }

    #[test]
    fn test_enabled_tools_respects_profiles() {
        let store = InMemoryBotStore::from_toml_str(BOTS).unwrap();
        let bots = store.bots.try_read().unwrap();
        let bot = bots.get(&("a1b2".to_string(), BotVersion::Test)).unwrap();
        assert_eq!(bot.enabled_tools(None), vec!["get_weather".to_string()]);
        assert_eq!(
            bot.enabled_tools(Some("vip")),
            vec!["get_weather".to_string(), "transfer".to_string()]
        );
    }

    #[tokio::test]
    async fn test_load_active_bot_rejects_missing_and_inactive() {
        let store = InMemoryBotStore::from_toml_str(BOTS).unwrap();
        assert!(load_active_bot(&store, "a1b2", BotVersion::Test).await.is_ok());
        assert!(matches!(
            load_active_bot(&store, "a1b2", BotVersion::Prod).await,
            Err(AgentError::BotNotFound { .. })
        ));
        assert!(matches!(
            load_active_bot(&store, "old", BotVersion::Prod).await,
            Err(AgentError::BotInactive(_))
        ));
    }
}
