//! 阶段图集成测试：Mock LLM + 内存检索，覆盖各条路由路径

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agentflow::agent::{ChatRequest, ChatService, ServiceSettings, GENERIC_ERROR_ANSWER};
    use agentflow::bot::{BotConfig, InMemoryBotStore};
    use agentflow::config::FlowSection;
    use agentflow::core::{ChatbotState, IntentType};
    use agentflow::flow::{FlowContext, FlowEvent, StageGraph};
    use agentflow::llm::{LlmClient, MockLlmClient};
    use agentflow::memory::{ChatHistoryStore, InMemoryChatHistory, Role};
    use agentflow::retrieval::InMemoryRetriever;
    use agentflow::tools::reply::GREETING_TEMPLATE;
    use agentflow::tools::{register_builtin_tools, ToolRegistry, COMMON_SCENE};
    use serde_json::Map;

    const BOT: &str = r#"
bot_id = "demo"
name = "demo"

[llm]
model_id = "mock-model"

[[knowledge_base_retrievers]]
index = "kb"

[[intention_retrievers]]
index = "intent"

[[intention_retrievers]]
index = "faq"
type = "faq"

[[tools]]
name = "knowledge_base_retrieve"

[[prompts]]
type = "RAG"
text = "Docs:\n{context}"
"#;

    fn bot() -> BotConfig {
        toml::from_str(BOT).unwrap()
    }

    fn graph(llm: Arc<MockLlmClient>, retriever: InMemoryRetriever) -> StageGraph {
        graph_with_flow(llm, retriever, &FlowSection::default())
    }

    fn graph_with_flow(
        llm: Arc<MockLlmClient>,
        retriever: InMemoryRetriever,
        flow: &FlowSection,
    ) -> StageGraph {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, COMMON_SCENE, flow).unwrap();
        let llm: Arc<dyn LlmClient> = llm;
        StageGraph::new(FlowContext::new(
            Arc::new(registry),
            Arc::new(retriever),
            llm,
            5,
        ))
    }

    fn state(graph: &StageGraph, query: &str, limit: usize) -> ChatbotState {
        ChatbotState::new(bot(), query)
            .with_recursion_limit(limit)
            .with_retrieval_tool_names(FlowSection::default().retrieval_tools)
            .with_valid_tool_calling_names(
                graph.context().registry.names_with_loop_mode(COMMON_SCENE),
            )
    }

    /// 本地单次 HTTP 响应，返回带 `{city}` 占位的端点
    async fn serve_once(body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let resp = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(resp.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/{{city}}", addr)
    }

    async fn add_intent(retriever: &InMemoryRetriever, question: &str, tool: &str) {
        retriever
            .add_document("intent", question, Some(tool), Map::new())
            .await;
    }

    #[tokio::test]
    async fn test_greeting_once_tool() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "hello", "greeting").await;
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"name": "greeting", "kwargs": {}}"#,
        ]));
        let graph = graph(llm.clone(), retriever);

        let final_state = graph.run(state(&graph, "Hello", 5), None).await.unwrap();

        assert_eq!(final_state.answer(), Some(GREETING_TEMPLATE));
        assert_eq!(final_state.current_agent_recursion_num, 1);
        assert_eq!(final_state.intent_type, Some(IntentType::IntentionDetected));
        assert_eq!(final_state.current_intent_tools, vec!["greeting".to_string()]);
        assert_eq!(final_state.agent_chat_history.len(), 1);
        assert_eq!(llm.call_count(), 1);

        // 规划 prompt 里提供了意图工具、bot 工具和兜底工具
        let system = &llm.requests()[0].messages[0].content;
        assert!(system.contains("\"greeting\""));
        assert!(system.contains("knowledge_base_retrieve"));
        assert!(system.contains("give_final_response"));
    }

    #[tokio::test]
    async fn test_loop_twice_then_once() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "refund policy", "knowledge_base_retrieve").await;
        retriever
            .add_passage("kb", "refund policy: refunds are accepted within 7 days")
            .await;
        retriever
            .add_passage("kb", "refund shipping is paid by the buyer")
            .await;
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"name": "knowledge_base_retrieve", "kwargs": {"query": "refund policy"}}"#,
            r#"```json
{"name": "knowledge_base_retrieve", "kwargs": {"query": "refund shipping"}}
```"#,
            r#"{"name": "give_final_response", "kwargs": {"response": "Refunds are accepted within 7 days; the buyer pays shipping."}}"#,
        ]));
        let graph = graph(llm.clone(), retriever);

        let final_state = graph
            .run(state(&graph, "refund policy details", 5), None)
            .await
            .unwrap();

        let roles: Vec<Role> = final_state
            .agent_chat_history
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(
            roles,
            vec![Role::Assistant, Role::Tool, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(final_state.current_agent_recursion_num, 3);
        assert!(final_state.agent_chat_history[1]
            .content
            .contains("refunds are accepted within 7 days"));
        let answer = final_state.answer().unwrap();
        assert!(!answer.is_empty());
        assert!(answer.contains("7 days"));
        // 后续选中 give_final_response 不覆盖首个工具
        assert_eq!(
            final_state.extra_response["current_agent_intent_type"],
            "knowledge_base_retrieve"
        );
        assert_eq!(llm.call_count(), 3);
        // 第三次规划能看到前两轮工具结果
        assert_eq!(llm.requests()[2].messages.iter().filter(|m| m.role == Role::Tool).count(), 2);
    }

    #[tokio::test]
    async fn test_weather_result_feeds_back_into_planning() {
        let endpoint = serve_once("Paris: sunny +20C").await;
        let flow = FlowSection {
            weather_endpoint: endpoint,
            ..FlowSection::default()
        };
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "weather in paris", "get_weather").await;
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"name": "get_weather", "kwargs": {"city_name": "Paris"}}"#,
            r#"{"name": "give_final_response", "kwargs": {"response": "It is sunny in Paris, 20C."}}"#,
        ]));
        let graph = graph_with_flow(llm.clone(), retriever, &flow);

        let final_state = graph
            .run(state(&graph, "weather in paris", 5), None)
            .await
            .unwrap();

        let roles: Vec<Role> = final_state
            .agent_chat_history
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::Assistant, Role::Tool, Role::Assistant]);
        assert!(final_state.agent_chat_history[1]
            .content
            .contains("Paris: sunny +20C"));
        assert_eq!(final_state.current_agent_recursion_num, 2);
        assert_eq!(final_state.answer(), Some("It is sunny in Paris, 20C."));
        // 首次选中的工具决定本轮意图类型
        assert_eq!(final_state.extra_response["current_agent_intent_type"], "get_weather");
        assert_eq!(llm.call_count(), 2);
        assert!(llm.requests()[1]
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content.contains("Paris: sunny +20C")));
    }

    #[tokio::test]
    async fn test_loop_tool_exhausts_budget_then_rag() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "return window", "knowledge_base_retrieve").await;
        retriever
            .add_passage("kb", "return window is 30 days after delivery")
            .await;
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"name": "knowledge_base_retrieve", "kwargs": {"query": "return window"}}"#,
            r#"{"name": "knowledge_base_retrieve", "kwargs": {"query": "return window days"}}"#,
            "You can return items within 30 days.",
        ]));
        let graph = graph(llm.clone(), retriever);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let final_state = graph
            .run(state(&graph, "return window", 2), Some(&tx))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(final_state.current_agent_recursion_num, 2);
        assert_eq!(llm.call_count(), 3);
        let planning_calls = llm
            .requests()
            .iter()
            .filter(|r| r.messages[0].content.contains("## Tools"))
            .count();
        assert_eq!(planning_calls, 2);
        assert_eq!(final_state.answer(), Some("You can return items within 30 days."));
        assert_eq!(final_state.extra_response["current_agent_intent_type"], "final_rag");
        assert_eq!(final_state.contexts, vec!["return window is 30 days after delivery"]);

        let mut routes = Vec::new();
        while let Some(e) = rx.recv().await {
            if let FlowEvent::Route { from, to } = e {
                routes.push((from, to));
            }
        }
        assert!(routes.contains(&("agent".to_string(), "all_knowledge_retrieve".to_string())));
        assert_eq!(
            routes.iter().filter(|(from, _)| from == "tools_execution").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_faq_without_answer_is_not_a_fewshot() {
        let retriever = InMemoryRetriever::new();
        retriever
            .add_document("faq", "cancel my order", None, Map::new())
            .await;
        add_intent(&retriever, "cancel my order", "chat").await;
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"name": "chat", "kwargs": {"response": "Open the order page."}}"#,
        ]));
        let graph = graph(llm.clone(), retriever);

        let final_state = graph
            .run(state(&graph, "cancel my order", 5), None)
            .await
            .unwrap();

        assert_eq!(final_state.intent_type, Some(IntentType::IntentionDetected));
        assert_eq!(final_state.intention_fewshot_examples.len(), 1);
        assert_eq!(final_state.intention_fewshot_examples[0].intent, "chat");
        assert_eq!(final_state.agent_chat_history.len(), 1);
        assert_eq!(final_state.answer(), Some("Open the order page."));
        let system = &llm.requests()[0].messages[0].content;
        assert!(!system.contains("\"faq\""));
    }

    #[tokio::test]
    async fn test_recursion_limit_forces_rag_fallback() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "order status", "get_weather").await;
        retriever.add_passage("kb", "order status can be checked in the app").await;
        let llm = Arc::new(MockLlmClient::scripted([
            "I am not sure which tool to use.",
            "Check your order status in the app.",
        ]));
        let graph = graph(llm.clone(), retriever);

        let final_state = graph
            .run(state(&graph, "order status", 1), None)
            .await
            .unwrap();

        assert_eq!(final_state.current_agent_recursion_num, 1);
        assert!(!final_state.parse_tool_calling_ok);
        assert_eq!(final_state.answer(), Some("Check your order status in the app."));
        assert_eq!(final_state.agent_chat_history.len(), 2);
        assert_eq!(final_state.agent_chat_history[1].role, Role::User);
        assert_eq!(final_state.extra_response["current_agent_intent_type"], "final_rag");
        let rag_system = &llm.requests()[1].messages[0].content;
        assert!(rag_system.starts_with("Docs:\n"));
        assert!(rag_system.contains("order status can be checked in the app"));
    }

    #[tokio::test]
    async fn test_malformed_output_never_exceeds_limit() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "order status", "get_weather").await;
        let llm = Arc::new(MockLlmClient::scripted([
            "no tool 1",
            "no tool 2",
            "no tool 3",
            "fallback answer",
        ]));
        let graph = graph(llm.clone(), retriever);

        let final_state = graph
            .run(state(&graph, "order status", 3), None)
            .await
            .unwrap();

        assert_eq!(final_state.current_agent_recursion_num, 3);
        assert_eq!(final_state.agent_chat_history.len(), 6);
        assert_eq!(final_state.answer(), Some("fallback answer"));
        assert_eq!(llm.call_count(), 4);
    }

    #[tokio::test]
    async fn test_low_scores_route_to_full_retrieval() {
        let retriever = InMemoryRetriever::new();
        // Jaccard 分别为 0 与 2/5，均不超过阈值 0.4
        add_intent(&retriever, "weather in paris today please", "get_weather").await;
        add_intent(&retriever, "reset password for my account", "chat").await;
        retriever
            .add_passage("kb", "reset password from the login page")
            .await;
        let llm = Arc::new(MockLlmClient::scripted(["Use the login page."]));
        let graph = graph(llm.clone(), retriever);

        let final_state = graph
            .run(state(&graph, "reset password", 5), None)
            .await
            .unwrap();

        assert!(final_state.intention_fewshot_examples.is_empty());
        assert_eq!(final_state.intent_type, Some(IntentType::NoClearIntention));
        assert_eq!(final_state.current_agent_recursion_num, 0);
        assert_eq!(final_state.answer(), Some("Use the login page."));
        assert_eq!(final_state.extra_response["current_agent_intent_type"], "final_rag");
        assert_eq!(final_state.contexts.len(), 1);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_multiple_tool_names_then_recover() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "weather", "get_weather").await;
        let llm = Arc::new(MockLlmClient::scripted([
            r#"[{"name": "get_weather", "kwargs": {"city_name": "Paris"}},
{"name": "give_final_response", "kwargs": {"response": "sunny"}}]"#,
            r#"{"name": "give_final_response", "kwargs": {"response": "It is sunny."}}"#,
        ]));
        let graph = graph(llm.clone(), retriever);

        let final_state = graph.run(state(&graph, "weather", 3), None).await.unwrap();

        assert_eq!(final_state.current_agent_recursion_num, 2);
        assert_eq!(final_state.agent_chat_history.len(), 3);
        let error = &final_state.agent_chat_history[1];
        assert_eq!(error.role, Role::User);
        assert!(error.content.contains("get_weather, give_final_response"));
        assert_eq!(final_state.answer(), Some("It is sunny."));
        // 纠错提示出现在第二次规划的输入中
        let second = &llm.requests()[1].messages;
        assert_eq!(second.last().unwrap().content, error.content);
    }

    #[tokio::test]
    async fn test_unknown_tool_records_both_messages() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "launch", "chat").await;
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"name": "launch_rocket", "kwargs": {"target": "moon"}}"#,
            r#"{"name": "chat", "kwargs": {"response": "I can't launch rockets."}}"#,
        ]));
        let graph = graph(llm.clone(), retriever);

        let final_state = graph.run(state(&graph, "launch", 3), None).await.unwrap();

        let history = &final_state.agent_chat_history;
        assert_eq!(history[0].role, Role::Assistant);
        assert!(history[0].content.contains("launch_rocket"));
        assert_eq!(history[1].role, Role::User);
        assert!(history[1].content.contains("launch_rocket"));
        assert_eq!(final_state.answer(), Some("I can't launch rockets."));
        assert!(final_state
            .trace_infos
            .iter()
            .any(|t| t.contains("tool_calls parse failed")));
    }

    #[tokio::test]
    async fn test_loop_tool_returns_to_planning_once() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "store hours", "knowledge_base_retrieve").await;
        retriever.add_passage("kb", "store hours are 9 to 5").await;
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"name": "knowledge_base_retrieve", "kwargs": {"query": "store hours"}}"#,
            r#"{"name": "give_final_response", "kwargs": {"response": "9 to 5"}}"#,
        ]));
        let graph = graph(llm.clone(), retriever);

        let final_state = graph
            .run(state(&graph, "store hours", 5), None)
            .await
            .unwrap();

        let tool_results = final_state
            .agent_chat_history
            .iter()
            .filter(|m| m.role == Role::Tool)
            .count();
        assert_eq!(tool_results, 1);
        assert_eq!(final_state.current_agent_recursion_num, 2);
        assert_eq!(final_state.answer(), Some("9 to 5"));
        assert!(final_state.debug_infos["stage_elapsed_ms"]
            .get("tools_execution")
            .is_some());
    }

    #[tokio::test]
    async fn test_retrieval_tool_forces_rag() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "membership benefits", "QA").await;
        retriever.add_passage("kb", "membership benefits include free shipping").await;
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"name": "QA", "kwargs": {"query": "membership benefits"}}"#,
            "Free shipping.",
        ]));
        let graph = graph(llm.clone(), retriever);

        let final_state = graph
            .run(state(&graph, "membership benefits", 5), None)
            .await
            .unwrap();

        assert_eq!(final_state.current_agent_recursion_num, 1);
        assert_eq!(final_state.answer(), Some("Free shipping."));
        assert_eq!(final_state.contexts, vec!["membership benefits include free shipping"]);
    }

    #[tokio::test]
    async fn test_faq_match_returns_answer_without_llm() {
        let retriever = InMemoryRetriever::new();
        retriever
            .add_document(
                "faq",
                "how do i cancel my order",
                Some("Open the order page and press cancel."),
                Map::new(),
            )
            .await;
        let llm = Arc::new(MockLlmClient::new());
        let graph = graph(llm.clone(), retriever);

        let final_state = graph
            .run(state(&graph, "how do i cancel my order", 5), None)
            .await
            .unwrap();

        assert_eq!(final_state.intent_type, Some(IntentType::SimilarQueryFound));
        assert_eq!(final_state.answer(), Some("Open the order page and press cancel."));
        assert_eq!(final_state.current_agent_recursion_num, 0);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "hello", "greeting").await;
        let llm = Arc::new(MockLlmClient::new());
        llm.push_failure("service unavailable");
        let graph = graph(llm.clone(), retriever);

        let err = graph.run(state(&graph, "hello", 5), None).await.unwrap_err();
        assert!(err.to_string().contains("service unavailable"));
    }

    #[tokio::test]
    async fn test_events_stream() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "hello", "greeting").await;
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"name": "greeting", "kwargs": {"response": "Hi!"}}"#,
        ]));
        let graph = graph(llm, retriever);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        graph.run(state(&graph, "hello", 5), Some(&tx)).await.unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert!(matches!(
            events.first(),
            Some(FlowEvent::StageStarted { stage }) if stage == "query_preprocess"
        ));
        assert!(matches!(events.last(), Some(FlowEvent::Answer { text }) if text == "Hi!"));
        assert!(events.iter().any(|e| matches!(
            e,
            FlowEvent::Route { from, to } if from == "agent" && to == "final_results_preparation"
        )));
    }

    fn service(
        llm: Arc<MockLlmClient>,
        retriever: InMemoryRetriever,
        bots: Vec<BotConfig>,
        history: Arc<InMemoryChatHistory>,
    ) -> ChatService {
        ChatService::new(
            graph(llm, retriever),
            Arc::new(InMemoryBotStore::with_bots(bots)),
            history,
            ServiceSettings {
                max_history_turns: 10,
                agent_recursion_limit: 5,
                scene: COMMON_SCENE.to_string(),
                retrieval_tools: FlowSection::default().retrieval_tools,
                enable_trace: true,
            },
        )
    }

    #[tokio::test]
    async fn test_service_persists_and_rewrites_follow_up() {
        let mut bot = bot();
        bot.prompts.push(
            toml::from_str("type = \"CONV_SUMMARY\"\ntext = \"H:{history}\\nQ:{question}\"")
                .unwrap(),
        );
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "hello", "greeting").await;
        let history = Arc::new(InMemoryChatHistory::new());
        let llm = Arc::new(MockLlmClient::scripted([
            r#"{"name": "greeting", "kwargs": {"response": "Hi there"}}"#,
            "hello again",
            r#"{"name": "greeting", "kwargs": {"response": "Welcome back"}}"#,
        ]));
        let svc = service(llm.clone(), retriever, vec![bot], history.clone());

        let first = svc
            .handle(ChatRequest::new("demo", "hello").with_session("s1"), None)
            .await;
        assert_eq!(first.answer, "Hi there");
        assert_eq!(first.session_id, "s1");
        assert_eq!(first.intent_type.as_deref(), Some("intention detected"));
        assert!(first.trace.as_ref().map(|t| !t.is_empty()).unwrap_or(false));

        let second = svc
            .handle(ChatRequest::new("demo", "and again?").with_session("s1"), None)
            .await;
        assert_eq!(second.answer, "Welcome back");
        assert_eq!(second.extra_response["query_rewrite"], "hello again");

        let rewrite_prompt = &llm.requests()[1].messages[0].content;
        assert_eq!(rewrite_prompt, "H:USER: hello\nAI: Hi there\nQ:and again?");
        assert_eq!(history.load("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_service_errors_become_generic_answer() {
        let mut inactive = bot();
        inactive.bot_id = "sleepy".into();
        inactive.status = agentflow::bot::BotStatus::Inactive;
        let history = Arc::new(InMemoryChatHistory::new());
        let svc = service(
            Arc::new(MockLlmClient::new()),
            InMemoryRetriever::new(),
            vec![inactive],
            history.clone(),
        );

        let resp = svc.handle(ChatRequest::new("sleepy", "hi"), None).await;
        assert_eq!(resp.answer, GENERIC_ERROR_ANSWER);
        assert!(resp.session_id.starts_with("session_"));

        let resp = svc.handle(ChatRequest::new("missing", "hi"), None).await;
        assert_eq!(resp.answer, GENERIC_ERROR_ANSWER);

        let err = svc
            .try_handle(ChatRequest::new("missing", "hi"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, agentflow::AgentError::BotNotFound { .. }));
    }

    #[tokio::test]
    async fn test_service_trace_disabled() {
        let retriever = InMemoryRetriever::new();
        add_intent(&retriever, "hello", "greeting").await;
        let svc = service(
            Arc::new(MockLlmClient::scripted([r#"{"name": "greeting", "kwargs": {}}"#])),
            retriever,
            vec![bot()],
            Arc::new(InMemoryChatHistory::new()),
        );
        let resp = svc
            .handle(ChatRequest::new("demo", "hello").with_trace(false), None)
            .await;
        assert_eq!(resp.answer, GREETING_TEMPLATE);
        assert!(resp.trace.is_none());
    }
}
