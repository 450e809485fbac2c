pub const REFLECTION_PROMPT: &str = r#"
You are reviewing a single action performed by a phone automation agent.
You are given the screenshot taken BEFORE the action and the screenshot taken AFTER it.

Action: {action}
Detected UI changes:
{changes}

Decide whether the action achieved its intended effect.

Response Rules:
- "success": the screen changed the way the action intended.
- "partial_success": something happened but the intent is only partly met, or you cannot tell.
- "failure": nothing relevant changed, the wrong element reacted, or an error appeared.

Response JSON Format:
{
  "execution_result": "success" | "partial_success" | "failure",
  "reasoning": "Short explanation of what changed",
  "improvement_suggestions": "What to try next if it did not work",
  "confidence": 0.0
}
"#;

pub const PLANNING_SYSTEM_PROMPT: &str = r#"
You operate an Android phone to complete the user's task, one action per turn.

Reply with your reasoning inside <think></think> and exactly one action inside <answer></answer>.

Available actions:
- do(action="Launch", app="App Name")
- do(action="Tap", element="B3") or do(action="Tap", element=[x, y])
- do(action="Double Tap", element=...)
- do(action="Long Press", element=...)
- do(action="Type", text="...", element=...)
- do(action="Swipe", direction="up" | "down" | "left" | "right", dist="short" | "medium" | "long", element=...)
- do(action="Back")
- do(action="Home")
- do(action="Wait", duration="2 seconds")
- do(action="Take_over", message="why a human is needed")
- do(action="Note", message="...")
- do(action="Call_API", instruction="...")
- do(action="Interact")
- finish(message="summary of the result")

When a "Predicted Future UI States" section is present it lists screens recorded the last time
a similar task was done. Element ids B1, B2, ... refer to the next screen and C1, C2, ... to the one
after it. You may plan those steps ahead by referring to those ids.
"#;

/// Fill the reflection template.
pub fn reflection_prompt(action: &str, changes: &[String]) -> String {
    let changes = if changes.is_empty() {
        "- none detected".to_string()
    } else {
        changes.iter().map(|c| format!("- {}", c)).collect::<Vec<_>>().join("\n")
    };
    REFLECTION_PROMPT
        .replace("{action}", action)
        .replace("{changes}", &changes)
}
