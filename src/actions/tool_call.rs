use serde_json::Value;

use crate::actions::types::{Action, DeviceAction};

/// Map a function call from the model onto an [`Action`].
///
/// Never fails: unknown tools and bad arguments come back as `Finish` with an
/// explanatory message. Numeric arguments accept floats and truncate them.
pub fn tool_call_to_action(name: &str, args: &Value) -> Action {
    if name == "finish" {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Task completed");
        return Action::finish(message);
    }

    match build(name, args) {
        Ok(Some(action)) => Action::Do(action),
        Ok(None) => Action::finish(format!("Unknown tool: {name}")),
        Err(detail) => {
            tracing::warn!(tool = name, %detail, "invalid tool arguments");
            Action::finish(format!("Invalid tool call: {detail}"))
        }
    }
}

fn build(name: &str, args: &Value) -> Result<Option<DeviceAction>, String> {
    let action = match name {
        "tap" => DeviceAction::Tap {
            element: [require_int(args, "x")?, require_int(args, "y")?],
        },
        "double_tap" => DeviceAction::DoubleTap {
            element: [require_int(args, "x")?, require_int(args, "y")?],
        },
        "long_press" => DeviceAction::LongPress {
            element: [require_int(args, "x")?, require_int(args, "y")?],
        },
        "swipe" => DeviceAction::Swipe {
            start: [require_int(args, "start_x")?, require_int(args, "start_y")?],
            end: [require_int(args, "end_x")?, require_int(args, "end_y")?],
        },
        "type_text" => DeviceAction::Type {
            text: require_str(args, "text")?,
        },
        "launch_app" => DeviceAction::Launch {
            app: require_str(args, "app_name")?,
        },
        "back" => DeviceAction::Back,
        "home" => DeviceAction::Home,
        "wait" => DeviceAction::Wait {
            duration: match args.get("duration") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => format!("{n} seconds"),
                _ => "1 seconds".to_string(),
            },
        },
        _ => return Ok(None),
    };
    Ok(Some(action))
}

fn require_int(args: &Value, key: &str) -> Result<i32, String> {
    let value = present(args, key)?;
    let number = match value {
        Value::Number(n) => n
            .as_i64()
            .map(|i| i as f64)
            .or_else(|| n.as_f64()),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() && n.abs() <= i32::MAX as f64 => Ok(n.trunc() as i32),
        _ => Err(format!(
            "Expected number for '{key}', got {}: {value}",
            type_name(value)
        )),
    }
}

fn require_str(args: &Value, key: &str) -> Result<String, String> {
    match present(args, key)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(format!(
            "Expected string for '{key}', got {}: {other}",
            type_name(other)
        )),
    }
}

fn present<'a>(args: &'a Value, key: &str) -> Result<&'a Value, String> {
    match args.get(key) {
        None | Some(Value::Null) => Err(format!("Missing required argument: '{key}'")),
        Some(v) => Ok(v),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
