//! Event contracts: the closed set of event types the core may publish,
//! plus typed builder helpers producing the payload maps.
//!
//! Producers inside the core publish only these types; consumers outside the
//! core may subscribe to any of them.

use serde_json::{json, Map, Value};

pub const DIALOGUE_USER_MESSAGE: &str = "dialogue.user_message";
pub const DIALOGUE_ASSISTANT_RESPONSE: &str = "dialogue.assistant_response";

pub const EMOTION_ANALYSIS_STARTED: &str = "emotion.analysis.started";
pub const EMOTION_RULE_SCORED: &str = "emotion.rule.scored";
pub const EMOTION_ANALYSIS_COMPLETED: &str = "emotion.analysis.completed";

pub const CHARACTER_EMOTION_CHANGED: &str = "character.emotion_changed";

pub const MEMORY_RECORDED: &str = "memory.recorded";
pub const MEMORY_CORE_UPDATED: &str = "memory.core.updated";
pub const MEMORY_FACT_UPSERTED: &str = "memory.fact.upserted";
pub const MEMORY_HABIT_RECORDED: &str = "memory.habit.recorded";
pub const MEMORY_EMOTIONAL_SNAPSHOT_ATTACHED: &str = "memory.emotional_snapshot.attached";

pub const AGENT_CREATED: &str = "agent.created";
pub const AGENT_MESSAGE_CREATED: &str = "agent.message.created";
pub const AGENT_WAKEUP_STARTED: &str = "agent.wakeup.started";
pub const AGENT_WAKEUP_COMPLETED: &str = "agent.wakeup.completed";

pub const OPERATION_WINDOW_CONNECTED: &str = "operation.window.connected";
pub const OPERATION_WINDOW_DISCONNECTED: &str = "operation.window.disconnected";
pub const OPERATION_INPUT_PERFORMED: &str = "operation.input.performed";
pub const OPERATION_TEMPLATE_MATCHED: &str = "operation.template.matched";
pub const OPERATION_ACTION_COMPLETED: &str = "operation.action.completed";

/// Every event type the core is allowed to publish.
pub const EVENT_NAMES: &[&str] = &[
    DIALOGUE_USER_MESSAGE,
    DIALOGUE_ASSISTANT_RESPONSE,
    EMOTION_ANALYSIS_STARTED,
    EMOTION_RULE_SCORED,
    EMOTION_ANALYSIS_COMPLETED,
    CHARACTER_EMOTION_CHANGED,
    MEMORY_RECORDED,
    MEMORY_CORE_UPDATED,
    MEMORY_FACT_UPSERTED,
    MEMORY_HABIT_RECORDED,
    MEMORY_EMOTIONAL_SNAPSHOT_ATTACHED,
    AGENT_CREATED,
    AGENT_MESSAGE_CREATED,
    AGENT_WAKEUP_STARTED,
    AGENT_WAKEUP_COMPLETED,
    OPERATION_WINDOW_CONNECTED,
    OPERATION_WINDOW_DISCONNECTED,
    OPERATION_INPUT_PERFORMED,
    OPERATION_TEMPLATE_MATCHED,
    OPERATION_ACTION_COMPLETED,
];

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn build_dialogue_user_message(session_id: &str, content: &str) -> Map<String, Value> {
    payload(json!({ "session_id": session_id, "content": content }))
}

pub fn build_dialogue_assistant_response(
    session_id: &str,
    content: &str,
    model: &str,
) -> Map<String, Value> {
    payload(json!({ "session_id": session_id, "content": content, "model": model }))
}

pub fn build_emotion_analysis_started(text_length: usize) -> Map<String, Value> {
    payload(json!({ "text_length": text_length }))
}

pub fn build_emotion_rule_scored(rule: &str, scores: &Map<String, Value>) -> Map<String, Value> {
    payload(json!({ "rule": rule, "scores": scores }))
}

pub fn build_emotion_analysis_completed(
    primary: &str,
    confidence: f64,
    valence: f64,
    arousal: f64,
    dominance: f64,
    intensity: f64,
) -> Map<String, Value> {
    payload(json!({
        "primary": primary,
        "confidence": confidence,
        "valence": valence,
        "arousal": arousal,
        "dominance": dominance,
        "intensity": intensity,
    }))
}

pub fn build_character_emotion_changed(
    from_state: &str,
    to_state: &str,
    intensity: f64,
) -> Map<String, Value> {
    payload(json!({ "from_state": from_state, "to_state": to_state, "intensity": intensity }))
}

pub fn build_memory_recorded(record_id: &str, session_id: &str) -> Map<String, Value> {
    payload(json!({ "record_id": record_id, "session_id": session_id }))
}

pub fn build_memory_core_updated(
    profile_id: &str,
    summary: &str,
    session_id: Option<&str>,
) -> Map<String, Value> {
    payload(json!({ "profile_id": profile_id, "summary": summary, "session_id": session_id }))
}

pub fn build_memory_fact_upserted(
    fact_id: &str,
    session_id: &str,
    subject: &str,
    predicate: &str,
    object: &str,
) -> Map<String, Value> {
    payload(json!({
        "fact_id": fact_id,
        "session_id": session_id,
        "subject": subject,
        "predicate": predicate,
        "object": object,
    }))
}

pub fn build_memory_habit_recorded(
    habit_id: &str,
    session_id: &str,
    task_type: &str,
    instruction: &str,
) -> Map<String, Value> {
    payload(json!({
        "habit_id": habit_id,
        "session_id": session_id,
        "task_type": task_type,
        "instruction": instruction,
    }))
}

pub fn build_memory_emotional_snapshot_attached(
    record_id: &str,
    session_id: &str,
    emotion: &Map<String, Value>,
) -> Map<String, Value> {
    payload(json!({ "record_id": record_id, "session_id": session_id, "emotion": emotion }))
}

pub fn build_agent_created(
    agent_id: &str,
    parent_id: Option<&str>,
    name: &str,
) -> Map<String, Value> {
    payload(json!({ "agent_id": agent_id, "parent_id": parent_id, "name": name }))
}

pub fn build_agent_message_created(
    message_id: &str,
    agent_id: &str,
    role: &str,
    content: &str,
) -> Map<String, Value> {
    payload(json!({
        "message_id": message_id,
        "agent_id": agent_id,
        "role": role,
        "content": content,
    }))
}

pub fn build_agent_wakeup_started(agent_id: &str, pending: usize) -> Map<String, Value> {
    payload(json!({ "agent_id": agent_id, "pending": pending }))
}

pub fn build_agent_wakeup_completed(
    agent_id: &str,
    message_id: &str,
    duration_ms: f64,
) -> Map<String, Value> {
    payload(json!({ "agent_id": agent_id, "message_id": message_id, "duration_ms": duration_ms }))
}

pub fn build_operation_window_connected(hwnd: u64, width: u32, height: u32) -> Map<String, Value> {
    payload(json!({ "hwnd": hwnd, "width": width, "height": height }))
}

pub fn build_operation_window_disconnected(hwnd: u64) -> Map<String, Value> {
    payload(json!({ "hwnd": hwnd }))
}

pub fn build_operation_input_performed(
    action: &str,
    hwnd: u64,
    params: &Map<String, Value>,
) -> Map<String, Value> {
    payload(json!({ "action": action, "hwnd": hwnd, "params": params }))
}

pub fn build_operation_template_matched(
    template: &str,
    threshold: f64,
    hit: &Map<String, Value>,
) -> Map<String, Value> {
    payload(json!({ "template": template, "threshold": threshold, "box": hit }))
}

pub fn build_operation_action_completed(
    action: &str,
    action_type: &str,
    status: &str,
    message: &str,
    duration: f64,
    data: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    payload(json!({
        "action": action,
        "action_type": action_type,
        "status": status,
        "message": message,
        "duration": duration,
        "data": data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_unique_and_dotted() {
        let mut seen = std::collections::HashSet::new();
        for name in EVENT_NAMES {
            assert!(seen.insert(name), "duplicate event name: {name}");
            assert!(name.contains('.'), "event name not dotted: {name}");
        }
    }

    #[test]
    fn builders_produce_expected_keys() {
        let user = build_dialogue_user_message("s1", "hi");
        assert_eq!(user["session_id"], "s1");
        assert_eq!(user["content"], "hi");

        let fact = build_memory_fact_upserted("f1", "s1", "user", "likes", "coffee");
        assert_eq!(fact["predicate"], "likes");

        let wakeup = build_agent_wakeup_started("a1", 3);
        assert_eq!(wakeup["pending"], 3);
    }

    #[test]
    fn core_updated_without_session_is_null() {
        let core = build_memory_core_updated("p1", "summary", None);
        assert!(core["session_id"].is_null());
    }
}
