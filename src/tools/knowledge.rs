//! 知识库工具
//!
//! - knowledge_base_retrieve（LOOP）：qd 检索，结果回灌给下一轮规划；
//! - QA（ONCE）：检索后直接按 RAG prompt 生成答案。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::flow::prompts::rag_messages;
use crate::llm::CompletionRequest;
use crate::retrieval::RetrieveMode;
use crate::tools::schema::params_schema;
use crate::tools::{Tool, ToolContext, ToolMode, ToolOutput};

pub const NO_KNOWLEDGE: &str = "No relevant knowledge found.";

#[derive(Deserialize, JsonSchema)]
struct QueryArgs {
    /// The query used to retrieve the knowledge base
    query: String,
}

fn parse_query(kwargs: &Value) -> Result<String, String> {
    let args: QueryArgs =
        serde_json::from_value(kwargs.clone()).map_err(|e| format!("invalid args: {}", e))?;
    Ok(args.query)
}

/// 在 bot 配置的全部知识库上检索，返回段落正文
async fn retrieve_contexts(ctx: &ToolContext<'_>, query: &str) -> Result<Vec<String>, String> {
    let refs = ctx.state.chatbot_config.knowledge_retriever_refs();
    if refs.is_empty() {
        return Ok(Vec::new());
    }
    let docs = ctx
        .retriever
        .retrieve(query, &refs, RetrieveMode::Qd)
        .await
        .map_err(|e| e.to_string())?;
    Ok(docs.into_iter().map(|d| d.content).collect())
}

#[derive(Default)]
pub struct KnowledgeBaseRetrieveTool;

impl KnowledgeBaseRetrieveTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for KnowledgeBaseRetrieveTool {
    fn name(&self) -> &str {
        "knowledge_base_retrieve"
    }

    fn description(&self) -> &str {
        "Retrieve domain knowledge relevant to the query. The result is returned to you for further reasoning."
    }

    fn parameters_schema(&self) -> Value {
        params_schema::<QueryArgs>()
    }

    fn mode(&self) -> ToolMode {
        ToolMode::Loop
    }

    async fn invoke(&self, ctx: &ToolContext<'_>, kwargs: &Value) -> Result<ToolOutput, String> {
        let query = parse_query(kwargs)?;
        let contexts = retrieve_contexts(ctx, &query).await?;
        if contexts.is_empty() {
            return Ok(ToolOutput::ok(NO_KNOWLEDGE));
        }
        Ok(ToolOutput::ok(contexts.join("\n\n")))
    }
}

/// 检索 + 生成一步完成的问答工具
#[derive(Default)]
pub struct QaTool;

impl QaTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for QaTool {
    fn name(&self) -> &str {
        "QA"
    }

    fn description(&self) -> &str {
        "Answer a question about the product or service using the knowledge base."
    }

    fn parameters_schema(&self) -> Value {
        params_schema::<QueryArgs>()
    }

    fn mode(&self) -> ToolMode {
        ToolMode::Once
    }

    async fn invoke(&self, ctx: &ToolContext<'_>, kwargs: &Value) -> Result<ToolOutput, String> {
        let query = parse_query(kwargs)?;
        let contexts = retrieve_contexts(ctx, &query).await?;
        let state = ctx.state;
        let llm = &state.chatbot_config.llm;
        let messages = rag_messages(
            &state.chatbot_config,
            state.user_profile.as_deref(),
            &contexts,
            &query,
            &state.chat_history,
        );
        let request = CompletionRequest::new(&llm.model_id, messages)
            .with_sampling(llm.temperature, llm.max_tokens);
        let answer = ctx
            .llm
            .complete(&request)
            .await
            .map_err(|e| e.to_string())?;
        Ok(ToolOutput::ok(answer))
    }
}
