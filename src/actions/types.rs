use serde::{Deserialize, Serialize};

/// What the model asked for. `Do` carries a physical device action; `Finish`
/// ends the run.
///
/// Serialises as `{"_metadata":"do","action":"Tap","element":[x,y]}` or
/// `{"_metadata":"finish","message":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_metadata", rename_all = "snake_case")]
pub enum Action {
    Do(DeviceAction),
    Finish { message: String },
}

impl Action {
    pub fn finish(message: impl Into<String>) -> Self {
        Action::Finish {
            message: message.into(),
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Action::Finish { .. })
    }

    /// Short label for logs, e.g. `Tap` or `finish`.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Do(action) => action.name(),
            Action::Finish { .. } => "finish",
        }
    }
}

/// Coordinates are `[x, y]`, either 0–1000 relative units or absolute pixels
/// depending on the agent variant that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum DeviceAction {
    Tap {
        element: [i32; 2],
    },
    #[serde(rename = "Double Tap")]
    DoubleTap {
        element: [i32; 2],
    },
    #[serde(rename = "Long Press")]
    LongPress {
        element: [i32; 2],
    },
    Swipe {
        start: [i32; 2],
        end: [i32; 2],
    },
    #[serde(alias = "Type_Name")]
    Type {
        text: String,
    },
    Launch {
        app: String,
    },
    Back,
    Home,
    Wait {
        duration: String,
    },
}

impl DeviceAction {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceAction::Tap { .. } => "Tap",
            DeviceAction::DoubleTap { .. } => "Double Tap",
            DeviceAction::LongPress { .. } => "Long Press",
            DeviceAction::Swipe { .. } => "Swipe",
            DeviceAction::Type { .. } => "Type",
            DeviceAction::Launch { .. } => "Launch",
            DeviceAction::Back => "Back",
            DeviceAction::Home => "Home",
            DeviceAction::Wait { .. } => "Wait",
        }
    }
}
