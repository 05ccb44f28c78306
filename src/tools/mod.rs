//! 工具层：注册表、规划输出解析、执行器与内置工具

pub mod executor;
pub mod knowledge;
pub mod parser;
pub mod registry;
pub mod reply;
pub mod schema;
pub mod weather;

pub use executor::{ToolCallResult, ToolExecutor};
pub use knowledge::{KnowledgeBaseRetrieveTool, QaTool};
pub use parser::{extract_tool_calls, ParsedToolCalls, ToolCall, ToolCallError, ToolCallParser};
pub use registry::{
    required_params, RegistryError, Tool, ToolContext, ToolMode, ToolOutput, ToolRegistry,
    COMMON_SCENE,
};
pub use reply::ReplyTool;
pub use schema::tool_call_schema_json;
pub use weather::WeatherTool;

use crate::config::FlowSection;

/// 在指定 scene 下注册内置工具目录
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    scene: &str,
    flow: &FlowSection,
) -> Result<(), RegistryError> {
    registry.register(scene, ReplyTool::final_response())?;
    registry.register(scene, ReplyTool::rhetorical_question())?;
    registry.register(scene, ReplyTool::chat())?;
    registry.register(scene, ReplyTool::greeting())?;
    registry.register(scene, ReplyTool::comfort())?;
    registry.register(scene, ReplyTool::transfer())?;
    registry.register(scene, KnowledgeBaseRetrieveTool::new())?;
    registry.register(scene, QaTool::new())?;
    registry.register(
        scene,
        WeatherTool::new(&flow.weather_endpoint, flow.tool_timeout_secs),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, COMMON_SCENE, &FlowSection::default()).unwrap();
        assert_eq!(registry.len(), 9);
        let loops = registry.names_with_loop_mode(COMMON_SCENE);
        assert_eq!(loops.into_iter().collect::<Vec<_>>(), vec!["get_weather", "knowledge_base_retrieve"]);
        // 重复注册整个目录会失败
        assert!(register_builtin_tools(&mut registry, COMMON_SCENE, &FlowSection::default()).is_err());
    }
}
