use crate::errors::{AutoGlmError, AutoGlmResult};
use crate::llm::types::ToolDef;

/// Loads the phone tool definitions from prompts/tools/device.json.
/// The JSON is embedded at compile time via include_str!.
pub fn load_device_tools() -> AutoGlmResult<Vec<ToolDef>> {
    let json = include_str!("../../prompts/tools/device.json");
    serde_json::from_str(json)
        .map_err(|e| AutoGlmError::Config(format!("Failed to parse device tools: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_tools_cover_every_action() {
        let tools = load_device_tools().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "tap",
                "double_tap",
                "long_press",
                "swipe",
                "type_text",
                "launch_app",
                "back",
                "home",
                "wait",
                "finish"
            ]
        );
        assert!(tools.iter().all(|t| t.def_type == "function"));
    }
}
